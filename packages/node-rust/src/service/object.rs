use std::sync::{Arc, Weak};

use async_trait::async_trait;
use brokerlink_core::Value;

use crate::facade::ServiceFacade;

/// An event a service has subscribed to through its own listener facility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventInterest {
    pub event_name: String,
}

impl EventInterest {
    #[must_use]
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
        }
    }
}

/// A plain service object exposed through the broker.
///
/// The adapter inspects `members()` once when the service is bound and sorts
/// each name into an action, a lifecycle hook, or a node-signal listener by
/// naming convention. All dispatch then goes through `invoke` (members) and
/// `emit` (subscribed events).
#[async_trait]
pub trait ServiceObject: Send + Sync + 'static {
    /// Service name. `None` or an empty name keeps the service unbound.
    fn name(&self) -> Option<&str>;

    /// Names of the callable members.
    fn members(&self) -> Vec<String>;

    /// Events the service listens to.
    fn event_interests(&self) -> Vec<EventInterest>;

    /// Calls a member with positional parameters.
    async fn invoke(&self, member: &str, params: Vec<Value>) -> anyhow::Result<Value>;

    /// Hands an event to the service's own listeners.
    async fn emit(&self, event: &str, args: Vec<Value>) -> anyhow::Result<()>;

    /// Drops every event listener. Called when the service is destroyed.
    fn remove_all_listeners(&self) {}

    /// Called once when the service is first registered with a facade.
    fn on_register(&self, _facade: Weak<ServiceFacade>) {}
}

/// Pointer identity of a service instance, independent of its vtable.
pub(crate) fn same_instance(a: &Arc<dyn ServiceObject>, b: &Arc<dyn ServiceObject>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
