//! Dispatch wrappers handed to the broker runtime.
//!
//! Each handler opens a fresh `RequestContext` scope for the invocation it
//! serves and calls the service member with the argument shape its category
//! requires. Results and errors pass through unchanged.

use std::fmt;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use brokerlink_core::{EventDelivery, Invocation, LifecycleHook, Value};
use futures_util::future::BoxFuture;
use tower::Service;
use tracing::{debug_span, Instrument};

use super::object::ServiceObject;
use crate::broker::BrokerAdapter;
use crate::context::{self, RequestContext};
use crate::error::BrokerError;

fn upgrade(adapter: &Weak<BrokerAdapter>) -> anyhow::Result<Arc<BrokerAdapter>> {
    adapter
        .upgrade()
        .ok_or_else(|| anyhow::Error::new(BrokerError::AdapterDropped))
}

// ---------------------------------------------------------------------------
// ActionHandler
// ---------------------------------------------------------------------------

/// Serves one action of one service.
#[derive(Clone)]
pub struct ActionHandler {
    service: Arc<str>,
    action: Arc<str>,
    instance: Arc<dyn ServiceObject>,
    adapter: Weak<BrokerAdapter>,
}

impl ActionHandler {
    pub(crate) fn new(
        service: Arc<str>,
        action: &str,
        instance: Arc<dyn ServiceObject>,
        adapter: Weak<BrokerAdapter>,
    ) -> Self {
        Self {
            service,
            action: Arc::from(action),
            instance,
            adapter,
        }
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Runs the action for `invocation`.
    ///
    /// The invocation record (minus its params) becomes the new context's
    /// parent call, so calls made by the action can reuse its call handle.
    ///
    /// # Errors
    ///
    /// Returns the member's error unchanged, or `AdapterDropped` if the
    /// owning adapter no longer exists.
    pub async fn handle(&self, mut invocation: Invocation) -> anyhow::Result<Value> {
        let adapter = upgrade(&self.adapter)?;
        let params = std::mem::take(&mut invocation.params);
        let span = debug_span!(
            "action",
            service = %self.service,
            action = %self.action,
            request_id = %invocation.request_id,
            depth = invocation.level,
        );
        let ctx = RequestContext::for_action(Arc::new(invocation), adapter);
        metrics::counter!("brokerlink_dispatch_total", "kind" => "action").increment(1);

        context::run(ctx, self.instance.invoke(&self.action, params))
            .instrument(span)
            .await
    }
}

impl Service<Invocation> for ActionHandler {
    type Response = Value;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, anyhow::Result<Value>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { handler.handle(invocation).await })
    }
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandler")
            .field("service", &self.service)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EventHandler
// ---------------------------------------------------------------------------

/// How an event payload reaches the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMode {
    /// Internal event: the payload is the single argument to `emit`.
    Payload,
    /// Domain event: an array payload is spread into positional arguments.
    Spread,
    /// Node-signal member bound directly: `invoke(member, [payload])`, no
    /// context scope.
    Listener { member: String },
}

/// Serves one subscribed event of one service.
#[derive(Clone)]
pub struct EventHandler {
    service: Arc<str>,
    event: Arc<str>,
    mode: EventMode,
    instance: Arc<dyn ServiceObject>,
    adapter: Weak<BrokerAdapter>,
}

impl EventHandler {
    pub(crate) fn new(
        service: Arc<str>,
        event: &str,
        mode: EventMode,
        instance: Arc<dyn ServiceObject>,
        adapter: Weak<BrokerAdapter>,
    ) -> Self {
        Self {
            service,
            event: Arc::from(event),
            mode,
            instance,
            adapter,
        }
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[must_use]
    pub fn mode(&self) -> &EventMode {
        &self.mode
    }

    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns the listener's error unchanged, or `AdapterDropped` if the
    /// owning adapter no longer exists.
    pub async fn handle(&self, delivery: EventDelivery) -> anyhow::Result<()> {
        metrics::counter!("brokerlink_dispatch_total", "kind" => "event").increment(1);
        let args = match &self.mode {
            EventMode::Listener { member } => {
                return self
                    .instance
                    .invoke(member, vec![delivery.payload])
                    .await
                    .map(|_| ());
            }
            EventMode::Payload => vec![delivery.payload.clone()],
            EventMode::Spread => spread(delivery.payload.clone()),
        };

        let adapter = upgrade(&self.adapter)?;
        let span = debug_span!(
            "event",
            service = %self.service,
            event = %self.event,
            sender = %delivery.sender,
        );
        let ctx = RequestContext::for_event(&delivery, adapter);
        context::run(ctx, self.instance.emit(&self.event, args))
            .instrument(span)
            .await
    }
}

/// Positional arguments of a domain event payload.
fn spread(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("service", &self.service)
            .field("event", &self.event)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// LifecycleHandler
// ---------------------------------------------------------------------------

/// Runs one lifecycle hook of one service.
#[derive(Clone)]
pub struct LifecycleHandler {
    service: Arc<str>,
    hook: LifecycleHook,
    instance: Arc<dyn ServiceObject>,
    adapter: Weak<BrokerAdapter>,
}

impl LifecycleHandler {
    pub(crate) fn new(
        service: Arc<str>,
        hook: LifecycleHook,
        instance: Arc<dyn ServiceObject>,
        adapter: Weak<BrokerAdapter>,
    ) -> Self {
        Self {
            service,
            hook,
            instance,
            adapter,
        }
    }

    #[must_use]
    pub fn hook(&self) -> LifecycleHook {
        self.hook
    }

    /// Runs the hook inside a fresh lifecycle context (empty request id,
    /// the runtime's node id), so calls it makes still see a context.
    ///
    /// # Errors
    ///
    /// Returns the hook's error unchanged, or `AdapterDropped` if the owning
    /// adapter no longer exists.
    pub async fn run(&self) -> anyhow::Result<()> {
        let adapter = upgrade(&self.adapter)?;
        let span = debug_span!("lifecycle", service = %self.service, hook = self.hook.as_str());
        let ctx = RequestContext::for_lifecycle(adapter);
        metrics::counter!("brokerlink_dispatch_total", "kind" => "lifecycle").increment(1);

        context::run(ctx, self.instance.invoke(self.hook.as_str(), Vec::new()))
            .instrument(span)
            .await
            .map(|_| ())
    }
}

impl fmt::Debug for LifecycleHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHandler")
            .field("service", &self.service)
            .field("hook", &self.hook)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
