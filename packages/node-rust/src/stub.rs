//! Remote stubs: call a service's actions by method name through a facade.

use std::sync::Arc;

use brokerlink_core::Value;

use crate::error::BrokerError;
use crate::facade::ServiceFacade;

/// How a stub dispatches its calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// `ServiceFacade::call`: fail fast when the service is unavailable.
    Direct,
    /// `ServiceFacade::wait_and_call`: wait for the service first.
    WaitForAvailability,
}

/// Handle on one remote service namespace.
///
/// Holds no state beyond the namespace and the call mode; every method name
/// maps to the action `"<namespace>.<method>"`.
#[derive(Clone)]
pub struct RemoteStub {
    namespace: Arc<str>,
    mode: CallMode,
    facade: Arc<ServiceFacade>,
}

impl RemoteStub {
    #[must_use]
    pub fn new(facade: Arc<ServiceFacade>, namespace: &str, mode: CallMode) -> Self {
        Self {
            namespace: Arc::from(namespace),
            mode,
            facade,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn mode(&self) -> CallMode {
        self.mode
    }

    /// The callable bound to `"<namespace>.<method>"`.
    #[must_use]
    pub fn method(&self, method: &str) -> RemoteMethod {
        RemoteMethod {
            target: format!("{}.{method}", self.namespace),
            mode: self.mode,
            facade: Arc::clone(&self.facade),
        }
    }

    /// Shorthand for `self.method(method).call(params)`.
    ///
    /// # Errors
    ///
    /// Whatever the facade's `call` or `wait_and_call` returns.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BrokerError> {
        self.method(method).call(params).await
    }
}

impl std::fmt::Debug for RemoteStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStub")
            .field("namespace", &self.namespace)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// One remote action, ready to call.
#[derive(Clone)]
pub struct RemoteMethod {
    target: String,
    mode: CallMode,
    facade: Arc<ServiceFacade>,
}

impl RemoteMethod {
    /// Fully qualified action name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// # Errors
    ///
    /// Whatever the facade's `call` or `wait_and_call` returns.
    pub async fn call(&self, params: Vec<Value>) -> Result<Value, BrokerError> {
        match self.mode {
            CallMode::Direct => self.facade.call(&self.target, params).await,
            CallMode::WaitForAvailability => self.facade.wait_and_call(&self.target, params).await,
        }
    }
}

impl std::fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("target", &self.target)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
