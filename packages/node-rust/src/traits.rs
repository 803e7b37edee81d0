use std::time::Duration;

use async_trait::async_trait;
use brokerlink_core::{NodeInfo, ServiceFilter, ServiceInfo, Value};

use crate::service::ServiceDescriptor;

/// The broker runtime the adapter runs on: registry, transport, load
/// balancing, and fault tolerance live behind this trait.
/// Implementations: `LocalBroker` (in-process), network brokers (external).
#[async_trait]
pub trait BrokerRuntime: Send + Sync + 'static {
    /// Identifier of the node this runtime represents.
    fn node_id(&self) -> &str;

    /// List services known to the registry, narrowed by `filter`.
    async fn resolve_services(&self, filter: ServiceFilter) -> anyhow::Result<Vec<ServiceInfo>>;

    /// Call an action (`"service.action"`) with positional parameters.
    async fn invoke(&self, name: &str, params: Vec<Value>) -> anyhow::Result<Value>;

    /// Wait until `service` is available. Returns an error if it is still
    /// unavailable when `timeout` elapses.
    async fn await_availability(&self, service: &str, timeout: Duration) -> anyhow::Result<()>;

    /// Register a service's dispatch surface.
    async fn register_descriptor(&self, descriptor: ServiceDescriptor) -> anyhow::Result<()>;

    /// Remove a previously registered service by name.
    async fn unregister_descriptor(&self, name: &str) -> anyhow::Result<()>;

    /// Deliver an event to every subscribed service on every node.
    async fn broadcast(&self, event: &str, args: Vec<Value>) -> anyhow::Result<()>;

    /// Deliver an event to the named services only.
    async fn broadcast_to_services(
        &self,
        services: &[String],
        event: &str,
        args: Vec<Value>,
    ) -> anyhow::Result<()>;

    /// Deliver an event to subscribed services on this node only.
    async fn broadcast_local(&self, event: &str, args: Vec<Value>) -> anyhow::Result<()>;

    /// Describe every node the runtime knows about.
    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeInfo>>;

    /// Start the runtime. Must complete before dispatch is attempted.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop the runtime. Default is a no-op.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
