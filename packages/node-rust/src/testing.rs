//! Recording `BrokerRuntime` double shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use brokerlink_core::{NodeInfo, ServiceFilter, ServiceInfo, Value};
use parking_lot::Mutex;
use serde_json::json;

use crate::service::ServiceDescriptor;
use crate::traits::BrokerRuntime;

/// Snapshot of how often each runtime operation ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub resolves: usize,
    pub invokes: usize,
    pub waits: usize,
    pub broadcasts: usize,
    pub starts: usize,
    pub stops: usize,
}

/// Runtime that records every request and answers from fixed settings.
///
/// `invoke` echoes `{"name": .., "params": ..}`.
#[derive(Default)]
pub struct RecordingRuntime {
    node_id: String,
    available: Vec<String>,
    never_available: bool,
    fail_start: bool,
    fail_register: bool,
    start_delay: Option<Duration>,
    register_delay: Option<Duration>,

    resolves: AtomicUsize,
    invokes: AtomicUsize,
    waits: AtomicUsize,
    broadcasts: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    registered: Mutex<Vec<ServiceDescriptor>>,
    unregistered: Mutex<Vec<String>>,
    invoked: Mutex<Vec<(String, Vec<Value>)>>,
}

impl RecordingRuntime {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            ..Self::default()
        }
    }

    /// Services reported as available by `resolve_services`.
    pub fn with_available(mut self, services: &[&str]) -> Self {
        self.available = services.iter().map(ToString::to_string).collect();
        self
    }

    /// `await_availability` never completes.
    pub fn never_available(mut self) -> Self {
        self.never_available = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_register(mut self) -> Self {
        self.fail_register = true;
        self
    }

    pub fn slow_start(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// `register_descriptor` sleeps for `delay` before recording.
    pub fn slow_register(mut self, delay: Duration) -> Self {
        self.register_delay = Some(delay);
        self
    }

    pub fn counters(&self) -> Counters {
        Counters {
            resolves: self.resolves.load(Ordering::SeqCst),
            invokes: self.invokes.load(Ordering::SeqCst),
            waits: self.waits.load(Ordering::SeqCst),
            broadcasts: self.broadcasts.load(Ordering::SeqCst),
            starts: self.starts.load(Ordering::SeqCst),
            stops: self.stops.load(Ordering::SeqCst),
        }
    }

    pub fn registered(&self) -> Vec<ServiceDescriptor> {
        self.registered.lock().clone()
    }

    pub fn unregistered(&self) -> Vec<String> {
        self.unregistered.lock().clone()
    }

    pub fn invoked(&self) -> Vec<(String, Vec<Value>)> {
        self.invoked.lock().clone()
    }
}

#[async_trait]
impl BrokerRuntime for RecordingRuntime {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn resolve_services(&self, _filter: ServiceFilter) -> anyhow::Result<Vec<ServiceInfo>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .available
            .iter()
            .map(|name| ServiceInfo::new(name.clone(), true))
            .collect())
    }

    async fn invoke(&self, name: &str, params: Vec<Value>) -> anyhow::Result<Value> {
        self.invokes.fetch_add(1, Ordering::SeqCst);
        self.invoked.lock().push((name.to_string(), params.clone()));
        Ok(json!({ "name": name, "params": params }))
    }

    async fn await_availability(&self, _service: &str, _timeout: Duration) -> anyhow::Result<()> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        if self.never_available {
            futures_util::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn register_descriptor(&self, descriptor: ServiceDescriptor) -> anyhow::Result<()> {
        if let Some(delay) = self.register_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_register {
            anyhow::bail!("registration refused for {}", descriptor.name);
        }
        self.registered.lock().push(descriptor);
        Ok(())
    }

    async fn unregister_descriptor(&self, name: &str) -> anyhow::Result<()> {
        self.unregistered.lock().push(name.to_string());
        Ok(())
    }

    async fn broadcast(&self, _event: &str, _args: Vec<Value>) -> anyhow::Result<()> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn broadcast_to_services(
        &self,
        _services: &[String],
        _event: &str,
        _args: Vec<Value>,
    ) -> anyhow::Result<()> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn broadcast_local(&self, _event: &str, _args: Vec<Value>) -> anyhow::Result<()> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeInfo>> {
        Ok(vec![NodeInfo {
            id: self.node_id.clone(),
            namespace: String::new(),
            local: true,
            available: true,
            hostname: None,
            services: self.registered.lock().iter().map(|d| d.name.clone()).collect(),
        }])
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start {
            anyhow::bail!("start refused");
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
