//! In-process broker runtime.
//!
//! `LocalBroker` keeps every service of a single node in memory: descriptors
//! keyed by service name, an availability set behind a `watch` channel, and
//! a table of peer nodes fed by the host through the `node_*` methods (peers
//! from another namespace are ignored). Calls
//! made through an invocation's call handle stay in the caller's request
//! chain (same request id, level + 1).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use brokerlink_core::{
    CallHandle, EventDelivery, Invocation, LifecycleHook, NodeInfo, ServiceFilter, ServiceInfo,
    Value,
};
use dashmap::DashMap;
use futures_util::future::{join_all, try_join_all};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BrokerSettings;
use crate::context;
use crate::service::{EventHandler, ServiceDescriptor};
use crate::traits::BrokerRuntime;

// ---------------------------------------------------------------------------
// LocalBrokerStats
// ---------------------------------------------------------------------------

/// Snapshot of the request counters kept by a [`LocalBroker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalBrokerStats {
    pub resolves: u64,
    pub invokes: u64,
    pub registers: u64,
    pub unregisters: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    resolves: AtomicU64,
    invokes: AtomicU64,
    registers: AtomicU64,
    unregisters: AtomicU64,
}

// ---------------------------------------------------------------------------
// LocalBroker
// ---------------------------------------------------------------------------

/// Single-node [`BrokerRuntime`].
pub struct LocalBroker {
    settings: BrokerSettings,
    node_id: String,
    /// Service name -> registered descriptor.
    services: DashMap<String, Arc<ServiceDescriptor>>,
    /// Registration order, for deterministic start/stop sequencing.
    order: RwLock<Vec<String>>,
    /// Names of services whose `started` hook has completed.
    available: watch::Sender<BTreeSet<String>>,
    peers: DashMap<String, NodeInfo>,
    started: AtomicBool,
    stats: StatCounters,
    me: Weak<Self>,
}

impl LocalBroker {
    #[must_use]
    pub fn new(settings: BrokerSettings) -> Arc<Self> {
        let node_id = settings.resolved_node_id();
        let (available, _rx) = watch::channel(BTreeSet::new());
        Arc::new_cyclic(|me| Self {
            settings,
            node_id,
            services: DashMap::new(),
            order: RwLock::new(Vec::new()),
            available,
            peers: DashMap::new(),
            started: AtomicBool::new(false),
            stats: StatCounters::default(),
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_available(&self, service: &str) -> bool {
        self.available.borrow().contains(service)
    }

    #[must_use]
    pub fn stats(&self) -> LocalBrokerStats {
        LocalBrokerStats {
            resolves: self.stats.resolves.load(Ordering::Relaxed),
            invokes: self.stats.invokes.load(Ordering::Relaxed),
            registers: self.stats.registers.load(Ordering::Relaxed),
            unregisters: self.stats.unregisters.load(Ordering::Relaxed),
        }
    }

    fn descriptors_in_order(&self) -> Vec<Arc<ServiceDescriptor>> {
        self.order
            .read()
            .iter()
            .filter_map(|name| self.services.get(name).map(|entry| Arc::clone(entry.value())))
            .collect()
    }

    fn set_available(&self, service: &str, available: bool) {
        self.available.send_modify(|set| {
            if available {
                set.insert(service.to_string());
            } else {
                set.remove(service);
            }
        });
    }

    async fn wait_available(&self, service: &str, timeout: Duration) -> anyhow::Result<()> {
        let mut rx = self.available.subscribe();
        let wait = async move { rx.wait_for(|set| set.contains(service)).await.map(|_| ()) };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.context("availability channel closed"),
            Err(_elapsed) => anyhow::bail!("service `{service}` not available after {timeout:?}"),
        }
    }

    // -- Dispatch -------------------------------------------------------------

    /// Runs one action call at call depth `level` within `request_id`.
    async fn dispatch(
        &self,
        name: &str,
        params: Vec<Value>,
        request_id: String,
        level: u32,
    ) -> anyhow::Result<Value> {
        let max_level = self.settings.max_call_level;
        if max_level > 0 && level > max_level {
            anyhow::bail!("call `{name}` exceeds max call level {max_level}");
        }

        let (service, action) = name
            .split_once('.')
            .with_context(|| format!("invalid action name `{name}`"))?;
        let handler = self
            .services
            .get(service)
            .and_then(|descriptor| descriptor.actions.get(action).cloned())
            .with_context(|| format!("action `{name}` is not registered"))?;
        if !self.is_available(service) {
            anyhow::bail!("service `{service}` is not available");
        }

        debug!(action = name, request_id = %request_id, level, "dispatching action");
        let caller = Arc::new(ChainCaller {
            broker: self.me.clone(),
            request_id: request_id.clone(),
            level,
        });
        let invocation = Invocation::new(Uuid::new_v4().to_string(), self.node_id.clone(), request_id, params)
            .with_level(level)
            .with_caller(caller);

        match self.settings.request_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, handler.handle(invocation))
                .await
                .map_err(|_elapsed| anyhow::anyhow!("request `{name}` timed out after {timeout:?}"))?,
            None => handler.handle(invocation).await,
        }
    }

    // -- Lifecycle ------------------------------------------------------------

    async fn start_service(&self, descriptor: Arc<ServiceDescriptor>) -> anyhow::Result<()> {
        let timeout = self.settings.dependency_timeout();
        for dependency in &descriptor.dependencies {
            debug!(service = %descriptor.name, dependency = %dependency, "waiting for dependency");
            self.wait_available(dependency, timeout)
                .await
                .with_context(|| format!("service `{}` cannot start", descriptor.name))?;
        }
        if let Some(hook) = descriptor.lifecycle.get(&LifecycleHook::Started) {
            hook.run().await?;
        }
        self.set_available(&descriptor.name, true);
        info!(service = %descriptor.name, "service started");
        Ok(())
    }

    /// Stops, latest first, every service a failed `start` already brought
    /// up, so the next `start` begins from a clean slate.
    async fn roll_back_start(&self) {
        for descriptor in self.descriptors_in_order().iter().rev() {
            if !self.is_available(&descriptor.name) {
                continue;
            }
            if let Err(err) = self.stop_service(descriptor).await {
                warn!(service = %descriptor.name, error = %err, "rollback stop failed");
            }
        }
    }

    async fn stop_service(&self, descriptor: &ServiceDescriptor) -> anyhow::Result<()> {
        self.set_available(&descriptor.name, false);
        if let Some(hook) = descriptor.lifecycle.get(&LifecycleHook::Stopped) {
            hook.run().await?;
        }
        info!(service = %descriptor.name, "service stopped");
        Ok(())
    }

    // -- Events ---------------------------------------------------------------

    /// Hands `payload` to every handler of `event` among the selected
    /// services. Handler failures are logged, not returned.
    async fn deliver(&self, event: &str, payload: Value, only: Option<&[String]>) {
        let handlers: Vec<EventHandler> = self
            .descriptors_in_order()
            .iter()
            .filter(|descriptor| match only {
                Some(names) => names.contains(&descriptor.name),
                None => true,
            })
            .filter_map(|descriptor| descriptor.events.get(event).cloned())
            .collect();
        if handlers.is_empty() {
            debug!(event, "no subscribers for event");
            return;
        }

        let request_id = context::current()
            .map(|ctx| ctx.request_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let delivery = EventDelivery {
            event: event.to_string(),
            sender: self.node_id.clone(),
            request_id,
            payload,
        };

        let results = join_all(handlers.iter().map(|handler| handler.handle(delivery.clone()))).await;
        for result in results {
            if let Err(err) = result {
                error!(event, error = %err, "event handler failed");
            }
        }
    }

    // -- Peer nodes -----------------------------------------------------------

    fn same_namespace(&self, node: &NodeInfo) -> bool {
        if node.namespace == self.settings.namespace {
            return true;
        }
        debug!(peer = %node.id, namespace = %node.namespace, "peer from another namespace ignored");
        false
    }

    /// Records a newly connected peer and signals `$node.connected`. Peers
    /// outside this broker's namespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the node descriptor cannot be encoded.
    pub async fn node_connected(&self, node: NodeInfo, reconnected: bool) -> anyhow::Result<()> {
        if !self.same_namespace(&node) {
            return Ok(());
        }
        let payload = json!({ "node": serde_json::to_value(&node)?, "reconnected": reconnected });
        info!(peer = %node.id, reconnected, "node connected");
        self.peers.insert(node.id.clone(), node);
        self.deliver("$node.connected", payload, None).await;
        Ok(())
    }

    /// Replaces a peer's descriptor and signals `$node.updated`. Peers
    /// outside this broker's namespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the node descriptor cannot be encoded.
    pub async fn node_updated(&self, node: NodeInfo) -> anyhow::Result<()> {
        if !self.same_namespace(&node) {
            return Ok(());
        }
        let payload = json!({ "node": serde_json::to_value(&node)? });
        debug!(peer = %node.id, "node updated");
        self.peers.insert(node.id.clone(), node);
        self.deliver("$node.updated", payload, None).await;
        Ok(())
    }

    /// Drops a peer and signals `$node.disconnected`. Unknown ids are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the node descriptor cannot be encoded.
    pub async fn node_disconnected(&self, node_id: &str, unexpected: bool) -> anyhow::Result<()> {
        let Some((_, mut node)) = self.peers.remove(node_id) else {
            debug!(peer = node_id, "disconnect for unknown node ignored");
            return Ok(());
        };
        node.available = false;
        let payload = json!({ "node": serde_json::to_value(&node)?, "unexpected": unexpected });
        if unexpected {
            warn!(peer = node_id, "node disconnected unexpectedly");
        } else {
            info!(peer = node_id, "node disconnected");
        }
        self.deliver("$node.disconnected", payload, None).await;
        Ok(())
    }
}

impl std::fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBroker")
            .field("node_id", &self.node_id)
            .field("services", &self.order.read())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerRuntime for LocalBroker {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn resolve_services(&self, filter: ServiceFilter) -> anyhow::Result<Vec<ServiceInfo>> {
        self.stats.resolves.fetch_add(1, Ordering::Relaxed);
        let mut found: Vec<ServiceInfo> = self
            .order
            .read()
            .iter()
            .map(|name| ServiceInfo::new(name.clone(), self.is_available(name)))
            .collect();
        if !filter.only_local {
            for peer in &self.peers {
                for name in &peer.services {
                    if !found.iter().any(|info| info.name == *name) {
                        found.push(ServiceInfo::new(name.clone(), peer.available));
                    }
                }
            }
        }
        if filter.only_available {
            found.retain(|info| info.available);
        }
        Ok(found)
    }

    async fn invoke(&self, name: &str, params: Vec<Value>) -> anyhow::Result<Value> {
        self.stats.invokes.fetch_add(1, Ordering::Relaxed);
        self.dispatch(name, params, Uuid::new_v4().to_string(), 1).await
    }

    async fn await_availability(&self, service: &str, timeout: Duration) -> anyhow::Result<()> {
        self.wait_available(service, timeout).await
    }

    async fn register_descriptor(&self, descriptor: ServiceDescriptor) -> anyhow::Result<()> {
        let name = descriptor.name.clone();
        if self.services.contains_key(&name) {
            anyhow::bail!("service `{name}` is already registered");
        }
        if let Some(hook) = descriptor.lifecycle.get(&LifecycleHook::Created) {
            hook.run().await?;
        }

        let descriptor = Arc::new(descriptor);
        match self.services.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                anyhow::bail!("service `{name}` is already registered");
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&descriptor));
            }
        }
        self.order.write().push(name.clone());
        self.stats.registers.fetch_add(1, Ordering::Relaxed);
        debug!(service = %name, "descriptor registered");

        if self.is_started() {
            if let Some(broker) = self.me.upgrade() {
                tokio::spawn(async move {
                    if let Err(err) = broker.start_service(descriptor).await {
                        error!(service = %name, error = %err, "late service start failed");
                    }
                });
            }
        }
        Ok(())
    }

    async fn unregister_descriptor(&self, name: &str) -> anyhow::Result<()> {
        let Some((_, descriptor)) = self.services.remove(name) else {
            debug!(service = name, "unregister for unknown service ignored");
            return Ok(());
        };
        self.order.write().retain(|existing| existing != name);
        self.stats.unregisters.fetch_add(1, Ordering::Relaxed);
        if self.is_started() {
            self.stop_service(&descriptor).await?;
        } else {
            self.set_available(name, false);
        }
        Ok(())
    }

    async fn broadcast(&self, event: &str, args: Vec<Value>) -> anyhow::Result<()> {
        self.deliver(event, Value::Array(args), None).await;
        Ok(())
    }

    async fn broadcast_to_services(
        &self,
        services: &[String],
        event: &str,
        args: Vec<Value>,
    ) -> anyhow::Result<()> {
        self.deliver(event, Value::Array(args), Some(services)).await;
        Ok(())
    }

    async fn broadcast_local(&self, event: &str, args: Vec<Value>) -> anyhow::Result<()> {
        self.deliver(event, Value::Array(args), None).await;
        Ok(())
    }

    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeInfo>> {
        let local = NodeInfo {
            id: self.node_id.clone(),
            namespace: self.settings.namespace.clone(),
            local: true,
            available: true,
            hostname: None,
            services: self.order.read().clone(),
        };
        let mut peers: Vec<NodeInfo> = self.peers.iter().map(|peer| peer.value().clone()).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut nodes = Vec::with_capacity(peers.len() + 1);
        nodes.push(local);
        nodes.extend(peers);
        Ok(nodes)
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let descriptors = self.descriptors_in_order();
        info!(node_id = %self.node_id, services = descriptors.len(), "starting local broker");
        // Concurrent, so each service's dependency wait is met by the others.
        if let Err(err) = try_join_all(descriptors.into_iter().map(|d| self.start_service(d))).await {
            self.roll_back_start().await;
            self.started.store(false, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        for descriptor in self.descriptors_in_order().iter().rev() {
            self.stop_service(descriptor).await?;
        }
        info!(node_id = %self.node_id, "local broker stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChainCaller
// ---------------------------------------------------------------------------

/// Call handle attached to every invocation the local broker dispatches.
struct ChainCaller {
    broker: Weak<LocalBroker>,
    request_id: String,
    level: u32,
}

#[async_trait]
impl CallHandle for ChainCaller {
    async fn call(&self, name: &str, params: Vec<Value>) -> anyhow::Result<Value> {
        let broker = self
            .broker
            .upgrade()
            .context("local broker dropped during call")?;
        broker
            .dispatch(name, params, self.request_id.clone(), self.level + 1)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
