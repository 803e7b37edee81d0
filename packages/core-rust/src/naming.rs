//! Naming rules that decide how a service member or event is dispatched.
//!
//! Classification is an explicit, ordered function over member names:
//! reserved label, lifecycle hook, node-signal listener, then action.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefix reserved for runtime-internal events (`$node.connected`, ...).
pub const INTERNAL_EVENT_PREFIX: char = '$';

/// Member label that is never dispatched.
pub const RESERVED_MEMBER: &str = "constructor";

static SIGNAL_LISTENER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^on[A-Z]").expect("signal listener pattern is a valid literal"));

// ---------------------------------------------------------------------------
// LifecycleHook
// ---------------------------------------------------------------------------

/// Lifecycle hooks a service may define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleHook {
    /// Runs once when the runtime accepts the service.
    Created,
    /// Runs after the service's dependencies are available.
    Started,
    /// Runs when the service is removed or the runtime stops.
    Stopped,
}

impl LifecycleHook {
    pub const ALL: [LifecycleHook; 3] = [Self::Created, Self::Started, Self::Stopped];

    /// Member name that implements this hook.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }

    #[must_use]
    pub fn from_member(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hook| hook.as_str() == name)
    }
}

// ---------------------------------------------------------------------------
// NodeSignal
// ---------------------------------------------------------------------------

/// Runtime signals about peer node connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeSignal {
    Connected,
    Updated,
    Disconnected,
}

impl NodeSignal {
    pub const ALL: [NodeSignal; 3] = [Self::Connected, Self::Updated, Self::Disconnected];

    /// Internal event name the runtime emits for this signal.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Connected => "$node.connected",
            Self::Updated => "$node.updated",
            Self::Disconnected => "$node.disconnected",
        }
    }

    /// Member name that listens for this signal.
    #[must_use]
    pub fn member_name(self) -> &'static str {
        match self {
            Self::Connected => "onNodeConnected",
            Self::Updated => "onNodeUpdated",
            Self::Disconnected => "onNodeDisconnected",
        }
    }

    #[must_use]
    pub fn from_member(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|signal| signal.member_name() == name)
    }
}

// ---------------------------------------------------------------------------
// MemberKind
// ---------------------------------------------------------------------------

/// Dispatch category of a service member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Reserved label; not exposed.
    Excluded,
    /// Lifecycle hook.
    Lifecycle(LifecycleHook),
    /// `onX` listener bound to a known node signal.
    Signal(NodeSignal),
    /// `onX` listener with no matching node signal.
    UnknownSignal,
    /// Remotely callable action.
    Action,
}

/// Classifies a member by name.
///
/// Lifecycle names are checked before the `onX` pattern, so they always win.
#[must_use]
pub fn classify_member(name: &str) -> MemberKind {
    if name == RESERVED_MEMBER {
        return MemberKind::Excluded;
    }
    if let Some(hook) = LifecycleHook::from_member(name) {
        return MemberKind::Lifecycle(hook);
    }
    if SIGNAL_LISTENER.is_match(name) {
        return NodeSignal::from_member(name).map_or(MemberKind::UnknownSignal, MemberKind::Signal);
    }
    MemberKind::Action
}

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Argument shape of a subscribed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `$`-prefixed runtime event: the payload is passed through whole.
    Internal,
    /// Application event: the payload is spread as positional arguments.
    Domain,
}

/// Classifies an event by its literal name prefix.
#[must_use]
pub fn event_kind(event: &str) -> EventKind {
    if event.starts_with(INTERNAL_EVENT_PREFIX) {
        EventKind::Internal
    } else {
        EventKind::Domain
    }
}

/// Service part of a dotted action name (text before the first `.`).
#[must_use]
pub fn service_of(name: &str) -> &str {
    name.split_once('.').map_or(name, |(service, _)| service)
}
