//! Request-scoped context store.
//!
//! A `RequestContext` is bound to the dynamic extent of one future with
//! [`run`] and read back anywhere inside it with [`current`]. The binding is a
//! `tokio` task-local, so it survives `.await` points and concurrent or
//! interleaved futures never observe each other's context. Nested `run` calls
//! shadow the outer context and restore it when they complete.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use brokerlink_core::{CallHandle, EventDelivery, Invocation};
use tokio::task::JoinHandle;

use crate::broker::BrokerAdapter;

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// State of one in-flight call chain, as seen by the frame currently running.
pub struct RequestContext {
    /// Id of the invocation that opened this scope. Empty for lifecycle hooks.
    pub call_id: String,
    /// Id of the originating external request. Empty for lifecycle hooks.
    pub request_id: String,
    /// Node executing the current frame.
    pub node_id: String,
    /// The invocation that opened this scope, when it came through the
    /// runtime's action dispatch. Its call handle is the fast path for
    /// nested calls.
    pub parent_call: Option<Arc<Invocation>>,
    broker: Arc<BrokerAdapter>,
}

impl RequestContext {
    /// Context for an action dispatched by the runtime.
    #[must_use]
    pub fn for_action(invocation: Arc<Invocation>, broker: Arc<BrokerAdapter>) -> Self {
        Self {
            call_id: invocation.id.clone(),
            request_id: invocation.request_id.clone(),
            node_id: invocation.node_id.clone(),
            parent_call: Some(invocation),
            broker,
        }
    }

    /// Context for an event delivered by the runtime. Events carry no call
    /// handle, so nested calls from a handler take the resolution path.
    #[must_use]
    pub fn for_event(delivery: &EventDelivery, broker: Arc<BrokerAdapter>) -> Self {
        Self {
            call_id: String::new(),
            request_id: delivery.request_id.clone(),
            node_id: delivery.sender.clone(),
            parent_call: None,
            broker,
        }
    }

    /// Context for a lifecycle hook: no request, the runtime's own node.
    #[must_use]
    pub fn for_lifecycle(broker: Arc<BrokerAdapter>) -> Self {
        Self {
            call_id: String::new(),
            request_id: String::new(),
            node_id: broker.node_id().to_string(),
            parent_call: None,
            broker,
        }
    }

    /// The broker adapter servicing this context.
    #[must_use]
    pub fn broker(&self) -> &Arc<BrokerAdapter> {
        &self.broker
    }

    /// Same-chain call capability of the parent invocation, if any.
    #[must_use]
    pub fn fast_path(&self) -> Option<Arc<dyn CallHandle>> {
        self.parent_call.as_ref()?.caller().cloned()
    }

    /// Nesting depth of the invocation that opened this scope (0 outside
    /// action dispatch).
    #[must_use]
    pub fn level(&self) -> u32 {
        self.parent_call.as_ref().map_or(0, |call| call.level)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("call_id", &self.call_id)
            .field("request_id", &self.request_id)
            .field("node_id", &self.node_id)
            .field("parent_call", &self.parent_call)
            .field("broker", &self.broker.node_id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

/// Runs `body` with `context` as the current context for its whole extent.
pub async fn run<F: Future>(context: RequestContext, body: F) -> F::Output {
    scope(Arc::new(context), body).await
}

/// Like [`run`], for a context that is already shared.
pub async fn scope<F: Future>(context: Arc<RequestContext>, body: F) -> F::Output {
    CURRENT.scope(context, body).await
}

/// Returns the active context, or `None` outside any scope (a fresh,
/// top-level call).
#[must_use]
pub fn current() -> Option<Arc<RequestContext>> {
    CURRENT.try_with(Arc::clone).ok()
}

/// Spawns `future` on the tokio runtime, carrying the caller's current
/// context into the new task. Task-locals do not cross `tokio::spawn` on
/// their own.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(context) => tokio::spawn(CURRENT.scope(context, future)),
        None => tokio::spawn(future),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use brokerlink_core::Value;

    use super::*;
    use crate::broker::LocalBroker;
    use crate::config::{AdapterConfig, BrokerSettings};

    fn adapter() -> Arc<BrokerAdapter> {
        let runtime = LocalBroker::new(BrokerSettings {
            node_id: Some("node-test".to_string()),
            ..BrokerSettings::default()
        });
        BrokerAdapter::new(runtime, AdapterConfig::default())
    }

    fn action_ctx(broker: &Arc<BrokerAdapter>, request_id: &str) -> RequestContext {
        let invocation = Invocation::new(format!("call-{request_id}"), "node-x", request_id, Vec::new());
        RequestContext::for_action(Arc::new(invocation), Arc::clone(broker))
    }

    fn current_request_id() -> Option<String> {
        current().map(|ctx| ctx.request_id.clone())
    }

    #[tokio::test]
    async fn current_is_none_outside_scope() {
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn run_exposes_context_across_await() {
        let broker = adapter();
        let seen = run(action_ctx(&broker, "r-1"), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            current_request_id()
        })
        .await;

        assert_eq!(seen.as_deref(), Some("r-1"));
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn nested_run_shadows_and_restores() {
        let broker = adapter();
        let inner_broker = Arc::clone(&broker);
        let (inner, restored) = run(action_ctx(&broker, "outer"), async move {
            let inner = run(action_ctx(&inner_broker, "inner"), async {
                tokio::task::yield_now().await;
                current_request_id()
            })
            .await;
            (inner, current_request_id())
        })
        .await;

        assert_eq!(inner.as_deref(), Some("inner"));
        assert_eq!(restored.as_deref(), Some("outer"));
    }

    #[tokio::test]
    async fn interleaved_scopes_stay_isolated() {
        let broker = adapter();

        let a = run(action_ctx(&broker, "a"), async {
            let mut seen = Vec::new();
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(3)).await;
                seen.push(current_request_id());
            }
            seen
        });
        let b = run(action_ctx(&broker, "b"), async {
            let mut seen = Vec::new();
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(2)).await;
                seen.push(current_request_id());
            }
            seen
        });

        let (seen_a, seen_b) = tokio::join!(a, b);
        assert!(seen_a.iter().all(|id| id.as_deref() == Some("a")));
        assert!(seen_b.iter().all(|id| id.as_deref() == Some("b")));
    }

    #[tokio::test]
    async fn spawn_carries_context_into_task() {
        let broker = adapter();
        let handle = run(action_ctx(&broker, "spawned"), async {
            spawn(async { current_request_id() })
        })
        .await;

        assert_eq!(handle.await.unwrap().as_deref(), Some("spawned"));
    }

    #[tokio::test]
    async fn plain_tokio_spawn_does_not_inherit() {
        let broker = adapter();
        let handle = run(action_ctx(&broker, "r-1"), async {
            tokio::spawn(async { current_request_id() })
        })
        .await;

        assert!(handle.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lifecycle_context_has_empty_request_and_runtime_node() {
        let broker = adapter();
        let ctx = RequestContext::for_lifecycle(Arc::clone(&broker));
        assert!(ctx.request_id.is_empty());
        assert_eq!(ctx.node_id, "node-test");
        assert!(ctx.fast_path().is_none());
        assert_eq!(ctx.level(), 0);
    }

    #[tokio::test]
    async fn event_context_copies_delivery_fields() {
        let broker = adapter();
        let delivery = EventDelivery {
            event: "user.created".to_string(),
            sender: "node-7".to_string(),
            request_id: "r-9".to_string(),
            payload: Value::Null,
        };
        let ctx = RequestContext::for_event(&delivery, broker);
        assert_eq!(ctx.request_id, "r-9");
        assert_eq!(ctx.node_id, "node-7");
        assert!(ctx.parent_call.is_none());
    }
}
