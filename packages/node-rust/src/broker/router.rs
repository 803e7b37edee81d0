//! Call routing: same-chain fast path vs. runtime dispatch.

use brokerlink_core::{service_of, ServiceFilter, Value};
use tracing::{debug, warn};

use super::adapter::BrokerAdapter;
use crate::context;
use crate::error::BrokerError;

impl BrokerAdapter {
    /// Calls `name` (`"service.action"`) with positional `params`.
    ///
    /// Inside an action dispatched by the runtime, the call goes through the
    /// parent invocation's call handle and stays in the same request chain.
    /// Otherwise the target service must currently be available, or the call
    /// fails with `ServiceUnavailable` without reaching the runtime.
    ///
    /// # Errors
    ///
    /// `ServiceUnavailable` as above; runtime and member errors come back
    /// unchanged inside `Call`.
    pub async fn call(&self, name: &str, params: Vec<Value>) -> Result<Value, BrokerError> {
        self.ready().await;

        if let Some(handle) = context::current().and_then(|ctx| ctx.fast_path()) {
            debug!(action = name, "calling through parent invocation");
            metrics::counter!("brokerlink_calls_total", "path" => "fast").increment(1);
            return Ok(handle.call(name, params).await?);
        }

        let service = service_of(name);
        let available = self
            .runtime()
            .resolve_services(ServiceFilter::available())
            .await?;
        if !available.iter().any(|info| info.name == service) {
            debug!(action = name, service, "target service not available");
            return Err(BrokerError::ServiceUnavailable {
                service: service.to_string(),
            });
        }

        debug!(action = name, "dispatching through runtime");
        metrics::counter!("brokerlink_calls_total", "path" => "resolved").increment(1);
        Ok(self.runtime().invoke(name, params).await?)
    }

    /// Waits for the target service to become available, then calls it.
    ///
    /// The wait is bounded by `AdapterConfig::wait_for_services_timeout`.
    /// After the wait, dispatch follows [`call`](Self::call) minus the
    /// availability check.
    ///
    /// # Errors
    ///
    /// `DependencyUnavailable` if the service is still unavailable when the
    /// wait ends (nothing is invoked); runtime and member errors come back
    /// unchanged inside `Call`.
    pub async fn wait_and_call(&self, name: &str, params: Vec<Value>) -> Result<Value, BrokerError> {
        self.ready().await;

        let service = service_of(name);
        let timeout = self.config().wait_for_services_timeout();
        let waited = tokio::time::timeout(timeout, self.runtime().await_availability(service, timeout)).await;
        match waited {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(service, error = %err, "waiting for dependent service failed");
                return Err(dependency_unavailable(service, timeout));
            }
            Err(_elapsed) => {
                warn!(service, ?timeout, "dependent service did not become available");
                return Err(dependency_unavailable(service, timeout));
            }
        }

        if let Some(handle) = context::current().and_then(|ctx| ctx.fast_path()) {
            debug!(action = name, "calling through parent invocation");
            metrics::counter!("brokerlink_calls_total", "path" => "fast").increment(1);
            return Ok(handle.call(name, params).await?);
        }

        debug!(action = name, "dispatching through runtime after wait");
        metrics::counter!("brokerlink_calls_total", "path" => "waited").increment(1);
        Ok(self.runtime().invoke(name, params).await?)
    }
}

fn dependency_unavailable(service: &str, timeout: std::time::Duration) -> BrokerError {
    BrokerError::DependencyUnavailable {
        service: service.to_string(),
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}
