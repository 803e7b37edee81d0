//! Records handed to the adapter by the broker runtime when it dispatches an
//! action or delivers an event.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::Value;

// ---------------------------------------------------------------------------
// CallHandle
// ---------------------------------------------------------------------------

/// Same-chain call capability attached to an invocation by the runtime.
///
/// A call issued through this handle stays in the request chain of the
/// invocation that carried it: the runtime keeps the request id and skips
/// fresh service resolution.
#[async_trait]
pub trait CallHandle: Send + Sync {
    /// Calls `name` (`"service.action"`) with positional `params`.
    async fn call(&self, name: &str, params: Vec<Value>) -> anyhow::Result<Value>;
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// One incoming action call.
#[derive(Clone)]
pub struct Invocation {
    /// Unique id of this call.
    pub id: String,
    /// Node the call originated from.
    pub node_id: String,
    /// Id of the originating external request, shared by every nested call.
    pub request_id: String,
    /// Nesting depth; 1 for a top-level call.
    pub level: u32,
    /// Positional parameters for the action.
    pub params: Vec<Value>,
    caller: Option<Arc<dyn CallHandle>>,
}

impl Invocation {
    /// Creates a top-level invocation without a call handle.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        node_id: impl Into<String>,
        request_id: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            request_id: request_id.into(),
            level: 1,
            params,
            caller: None,
        }
    }

    /// Sets the nesting depth.
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Attaches the runtime's same-chain call capability.
    #[must_use]
    pub fn with_caller(mut self, caller: Arc<dyn CallHandle>) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Returns the same-chain call capability, if the runtime provided one.
    #[must_use]
    pub fn caller(&self) -> Option<&Arc<dyn CallHandle>> {
        self.caller.as_ref()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.id)
            .field("node_id", &self.node_id)
            .field("request_id", &self.request_id)
            .field("level", &self.level)
            .field("params", &self.params)
            .field("caller", &self.caller.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventDelivery
// ---------------------------------------------------------------------------

/// One event delivered to a subscribed service.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDelivery {
    /// Event name as broadcast.
    pub event: String,
    /// Node that emitted the event.
    pub sender: String,
    /// Request id of the emitting chain, empty when emitted outside one.
    pub request_id: String,
    /// Raw payload. Domain broadcasts carry an array of positional arguments;
    /// internal (`$`) events carry a structured object.
    pub payload: Value,
}
