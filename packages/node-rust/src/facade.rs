//! The service facade: the single entry point applications use to register
//! services, attach a broker runtime, and make calls.

use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use brokerlink_core::{NodeInfo, Value};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::broker::{BrokerAdapter, StartState};
use crate::config::AdapterConfig;
use crate::error::BrokerError;
use crate::service::{ServiceObject, ServiceRegistry, ServiceState};
use crate::stub::{CallMode, RemoteStub};
use crate::traits::BrokerRuntime;

// ---------------------------------------------------------------------------
// HealthReport
// ---------------------------------------------------------------------------

/// Point-in-time view of a facade and its attached runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub node_id: String,
    pub state: StartState,
    /// Instances tracked by the facade.
    pub registered: usize,
    /// Instances whose descriptor is registered with the runtime.
    pub bound: usize,
    /// Nodes the runtime currently knows, this one included.
    pub nodes: usize,
}

impl HealthReport {
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "node_id": self.node_id,
            "state": self.state.as_str(),
            "registered": self.registered,
            "bound": self.bound,
            "nodes": self.nodes,
        })
    }
}

// ---------------------------------------------------------------------------
// ServiceFacade
// ---------------------------------------------------------------------------

/// Owns the local service instances and at most one runtime attachment.
///
/// Services may be registered before or after a runtime is attached; either
/// way each instance is bound exactly once per attachment. Every operation
/// that needs the runtime fails with `NoRuntimeAttached` until one is.
pub struct ServiceFacade {
    config: AdapterConfig,
    services: Mutex<ServiceRegistry>,
    adapter: ArcSwapOption<BrokerAdapter>,
    me: Weak<Self>,
}

impl ServiceFacade {
    #[must_use]
    pub fn new(config: AdapterConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            services: Mutex::new(ServiceRegistry::new()),
            adapter: ArcSwapOption::empty(),
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// The adapter over the attached runtime, if any.
    #[must_use]
    pub fn adapter(&self) -> Option<Arc<BrokerAdapter>> {
        self.adapter.load_full()
    }

    fn require(&self, operation: &'static str) -> Result<Arc<BrokerAdapter>, BrokerError> {
        self.adapter()
            .ok_or(BrokerError::NoRuntimeAttached { operation })
    }

    /// Binds a `Registered` instance through `adapter`.
    ///
    /// The instance is claimed as `Binding` under the lock before the runtime
    /// is involved, so concurrent binds of one instance register it once. The
    /// claim is released again if nothing was registered. If the instance is
    /// destroyed while the runtime registers it, the fresh registration is
    /// undone here, since the destroy saw nothing to unregister yet.
    async fn bind(
        &self,
        adapter: &BrokerAdapter,
        instance: &Arc<dyn ServiceObject>,
    ) -> Result<bool, BrokerError> {
        let Some(claim) = self.services.lock().claim_bind(instance) else {
            return Ok(false);
        };

        let result = adapter.create_service(instance, &claim.dependencies).await;
        let bound = matches!(result, Ok(true));
        if self.services.lock().finish_bind(claim.id, bound) {
            return result;
        }

        debug!(
            service = instance.name().unwrap_or_default(),
            "service destroyed while binding"
        );
        if bound {
            adapter.destroy_service(instance.as_ref()).await?;
            return Ok(false);
        }
        instance.remove_all_listeners();
        result
    }

    // -- Registration ---------------------------------------------------------

    /// Tracks `instance` and, if a runtime is attached, binds it.
    ///
    /// Registering the same instance again changes nothing.
    ///
    /// # Errors
    ///
    /// Returns the runtime's registration error; the instance then stays
    /// tracked as `Registered`.
    pub async fn register_service(
        &self,
        instance: Arc<dyn ServiceObject>,
        dependencies: Vec<String>,
    ) -> Result<(), BrokerError> {
        let inserted = self.services.lock().insert(Arc::clone(&instance), dependencies);
        if !inserted {
            debug!(service = instance.name().unwrap_or_default(), "service already registered");
            return Ok(());
        }
        instance.on_register(self.me.clone());

        if let Some(adapter) = self.adapter() {
            self.bind(&adapter, &instance).await?;
        }
        Ok(())
    }

    /// Stops tracking `instance`; if it was bound, unregisters it from the
    /// runtime and drops its listeners. An instance still being bound is
    /// unregistered by that bind once the runtime confirms it. Unknown
    /// instances are ignored.
    ///
    /// # Errors
    ///
    /// Returns the runtime's unregister error. The instance is untracked
    /// either way.
    pub async fn destroy_service(&self, instance: &Arc<dyn ServiceObject>) -> Result<(), BrokerError> {
        let Some(entry) = self.services.lock().remove(instance) else {
            return Ok(());
        };
        match (entry.state, self.adapter()) {
            (ServiceState::Bound, Some(adapter)) => {
                adapter.destroy_service(entry.instance.as_ref()).await
            }
            (ServiceState::Binding, _) => {
                debug!(
                    service = entry.instance.name().unwrap_or_default(),
                    "destroy deferred to in-flight bind"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // -- Runtime attachment -----------------------------------------------------

    /// Attaches `runtime`, replacing any runtime attached before, and binds
    /// every `Registered` instance in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first error from detaching the previous runtime or from
    /// binding. Binding continues past failures; failed instances stay
    /// `Registered`.
    pub async fn attach_runtime(
        &self,
        runtime: Arc<dyn BrokerRuntime>,
    ) -> Result<Arc<BrokerAdapter>, BrokerError> {
        self.detach_runtime().await?;

        let adapter = BrokerAdapter::new(runtime, self.config.clone());
        self.adapter.store(Some(Arc::clone(&adapter)));
        info!(node_id = adapter.node_id(), "broker runtime attached");

        let pending = self.services.lock().in_state(ServiceState::Registered);
        let mut first_error = None;
        for entry in pending {
            if let Err(err) = self.bind(&adapter, &entry.instance).await {
                warn!(
                    service = entry.instance.name().unwrap_or_default(),
                    error = %err,
                    "failed to bind service"
                );
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(adapter),
        }
    }

    /// Detaches the current runtime, unregistering every bound instance from
    /// it (latest first) and returning them to `Registered`. Listeners are
    /// kept, since the instances stay tracked.
    ///
    /// # Errors
    ///
    /// Returns the first unregister error; the remaining instances are still
    /// unregistered and the runtime is detached regardless.
    pub async fn detach_runtime(&self) -> Result<(), BrokerError> {
        let Some(adapter) = self.adapter.swap(None) else {
            return Ok(());
        };

        let bound = self.services.lock().in_state(ServiceState::Bound);
        let mut first_error = None;
        for entry in bound.iter().rev() {
            if let Some(name) = entry.instance.name() {
                if let Err(err) = adapter.runtime().unregister_descriptor(name).await {
                    warn!(service = name, error = %err, "failed to unbind service");
                    first_error.get_or_insert(BrokerError::from(err));
                }
            }
            self.services
                .lock()
                .transition(&entry.instance, ServiceState::Bound, ServiceState::Registered);
        }
        info!(node_id = adapter.node_id(), "broker runtime detached");
        first_error.map_or(Ok(()), Err)
    }

    // -- Calls ----------------------------------------------------------------

    /// # Errors
    ///
    /// See [`BrokerAdapter::call`]; `NoRuntimeAttached` without a runtime.
    pub async fn call(&self, name: &str, params: Vec<Value>) -> Result<Value, BrokerError> {
        self.require("call")?.call(name, params).await
    }

    /// # Errors
    ///
    /// See [`BrokerAdapter::wait_and_call`]; `NoRuntimeAttached` without a
    /// runtime.
    pub async fn wait_and_call(&self, name: &str, params: Vec<Value>) -> Result<Value, BrokerError> {
        self.require("call")?.wait_and_call(name, params).await
    }

    /// Stub whose methods call `namespace.<method>` directly.
    #[must_use]
    pub fn stub(self: &Arc<Self>, namespace: &str) -> RemoteStub {
        RemoteStub::new(Arc::clone(self), namespace, CallMode::Direct)
    }

    /// Stub whose methods wait for the `namespace` service before calling.
    #[must_use]
    pub fn waiting_stub(self: &Arc<Self>, namespace: &str) -> RemoteStub {
        RemoteStub::new(Arc::clone(self), namespace, CallMode::WaitForAvailability)
    }

    // -- Events and nodes -------------------------------------------------------

    /// # Errors
    ///
    /// The runtime's delivery error; `NoRuntimeAttached` without a runtime.
    pub async fn broadcast(&self, event: &str, args: Vec<Value>) -> Result<(), BrokerError> {
        self.require("broadcast")?.broadcast(event, args).await
    }

    /// # Errors
    ///
    /// The runtime's delivery error; `NoRuntimeAttached` without a runtime.
    pub async fn broadcast_to_services(
        &self,
        services: &[String],
        event: &str,
        args: Vec<Value>,
    ) -> Result<(), BrokerError> {
        self.require("broadcast")?
            .broadcast_to_services(services, event, args)
            .await
    }

    /// # Errors
    ///
    /// The runtime's delivery error; `NoRuntimeAttached` without a runtime.
    pub async fn broadcast_local(&self, event: &str, args: Vec<Value>) -> Result<(), BrokerError> {
        self.require("broadcast")?.broadcast_local(event, args).await
    }

    /// # Errors
    ///
    /// The runtime's error; `NoRuntimeAttached` without a runtime.
    pub async fn node_list(&self) -> Result<Vec<NodeInfo>, BrokerError> {
        self.require("list nodes")?.node_list().await
    }

    // -- Lifecycle ------------------------------------------------------------

    /// # Errors
    ///
    /// The runtime's start error; `NoRuntimeAttached` without a runtime.
    pub async fn start(&self) -> Result<(), BrokerError> {
        self.require("start")?.start().await
    }

    /// # Errors
    ///
    /// The runtime's stop error; `NoRuntimeAttached` without a runtime.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        self.require("stop")?.stop().await
    }

    /// # Errors
    ///
    /// The runtime's node-list error; `NoRuntimeAttached` without a runtime.
    pub async fn health_check(&self) -> Result<HealthReport, BrokerError> {
        let adapter = self.require("check health")?;
        let nodes = adapter.node_list().await?.len();
        let (registered, bound) = {
            let services = self.services.lock();
            (services.len(), services.in_state(ServiceState::Bound).len())
        };
        Ok(HealthReport {
            node_id: adapter.node_id().to_string(),
            state: adapter.start_state(),
            registered,
            bound,
            nodes,
        })
    }

    // -- Introspection ----------------------------------------------------------

    /// Binding state of `instance`. Destroyed instances are untracked, so
    /// they read back as `Unregistered` just like never-registered ones.
    #[must_use]
    pub fn state_of(&self, instance: &Arc<dyn ServiceObject>) -> ServiceState {
        self.services.lock().state(instance)
    }

    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.services.lock().len()
    }
}

impl std::fmt::Debug for ServiceFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFacade")
            .field("config", &self.config)
            .field("registered", &self.registered_count())
            .field("adapter", &self.adapter())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
