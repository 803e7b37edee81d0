//! Binding between a service facade and one attached broker runtime.
//!
//! A `BrokerAdapter` is what every `RequestContext` points back to. It turns
//! service objects into descriptors, forwards events and node queries to the
//! runtime, and gates outside calls on the runtime's start.

use std::sync::{Arc, Weak};

use brokerlink_core::{NodeInfo, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::context;
use crate::error::BrokerError;
use crate::service::{ServiceDescriptor, ServiceObject};
use crate::traits::BrokerRuntime;

// ---------------------------------------------------------------------------
// StartState
// ---------------------------------------------------------------------------

/// Start progress of the attached runtime.
///
/// State machine: `NotStarted` -> `Starting` -> `Started`. A failed start goes
/// back to `NotStarted`; `stop` does the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartState {
    NotStarted,
    Starting,
    Started,
}

impl StartState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Started => "started",
        }
    }
}

// ---------------------------------------------------------------------------
// BrokerAdapter
// ---------------------------------------------------------------------------

/// Adapter over one [`BrokerRuntime`].
pub struct BrokerAdapter {
    runtime: Arc<dyn BrokerRuntime>,
    config: AdapterConfig,
    start_state: watch::Sender<StartState>,
    me: Weak<Self>,
}

impl BrokerAdapter {
    /// Creates an adapter over `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<dyn BrokerRuntime>, config: AdapterConfig) -> Arc<Self> {
        let (start_state, _rx) = watch::channel(StartState::NotStarted);
        Arc::new_cyclic(|me| Self {
            runtime,
            config,
            start_state,
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn BrokerRuntime> {
        &self.runtime
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        self.runtime.node_id()
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    #[must_use]
    pub fn start_state(&self) -> StartState {
        *self.start_state.borrow()
    }

    /// Waits for an in-progress start to settle.
    ///
    /// Code already running inside a context (a lifecycle hook or an action
    /// dispatched by the runtime) never waits: the start it would wait for
    /// may be the one running it.
    pub(crate) async fn ready(&self) {
        if context::current().is_some() {
            return;
        }
        let mut rx = self.start_state.subscribe();
        // Only errors if the sender is gone, and `self` owns the sender.
        let _ = rx.wait_for(|state| *state != StartState::Starting).await;
    }

    // -- Service binding ----------------------------------------------------

    /// Builds the descriptor for `instance` and registers it with the
    /// runtime.
    ///
    /// Returns `Ok(false)` when the instance has nothing to register (no
    /// name, or neither actions nor events).
    ///
    /// # Errors
    ///
    /// Returns the runtime's registration error.
    pub async fn create_service(
        &self,
        instance: &Arc<dyn ServiceObject>,
        dependencies: &[String],
    ) -> Result<bool, BrokerError> {
        let Some(descriptor) = ServiceDescriptor::build(instance, dependencies, &self.me) else {
            return Ok(false);
        };
        let name = descriptor.name.clone();
        debug!(
            service = %name,
            actions = descriptor.actions.len(),
            events = descriptor.events.len(),
            "registering service descriptor"
        );
        self.runtime.register_descriptor(descriptor).await?;
        info!(service = %name, node_id = self.node_id(), "service bound");
        Ok(true)
    }

    /// Unregisters `instance` from the runtime and drops its listeners.
    ///
    /// Listeners are cleared even when the runtime refuses the unregister.
    ///
    /// # Errors
    ///
    /// Returns the runtime's unregister error.
    pub async fn destroy_service(&self, instance: &dyn ServiceObject) -> Result<(), BrokerError> {
        let Some(name) = instance.name().filter(|name| !name.is_empty()) else {
            return Ok(());
        };
        let result = self.runtime.unregister_descriptor(name).await;
        instance.remove_all_listeners();
        match result {
            Ok(()) => {
                info!(service = name, "service unbound");
                Ok(())
            }
            Err(err) => {
                warn!(service = name, error = %err, "runtime failed to unregister service");
                Err(err.into())
            }
        }
    }

    // -- Events and nodes -----------------------------------------------------

    /// # Errors
    ///
    /// Returns the runtime's delivery error.
    pub async fn broadcast(&self, event: &str, args: Vec<Value>) -> Result<(), BrokerError> {
        self.ready().await;
        Ok(self.runtime.broadcast(event, args).await?)
    }

    /// # Errors
    ///
    /// Returns the runtime's delivery error.
    pub async fn broadcast_to_services(
        &self,
        services: &[String],
        event: &str,
        args: Vec<Value>,
    ) -> Result<(), BrokerError> {
        self.ready().await;
        Ok(self.runtime.broadcast_to_services(services, event, args).await?)
    }

    /// # Errors
    ///
    /// Returns the runtime's delivery error.
    pub async fn broadcast_local(&self, event: &str, args: Vec<Value>) -> Result<(), BrokerError> {
        self.ready().await;
        Ok(self.runtime.broadcast_local(event, args).await?)
    }

    /// # Errors
    ///
    /// Returns the runtime's error.
    pub async fn node_list(&self) -> Result<Vec<NodeInfo>, BrokerError> {
        Ok(self.runtime.list_nodes().await?)
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Starts the runtime. Outside calls issued meanwhile wait for it.
    ///
    /// # Errors
    ///
    /// Returns the runtime's start error; the adapter is then back to
    /// `NotStarted`.
    pub async fn start(&self) -> Result<(), BrokerError> {
        self.start_state.send_replace(StartState::Starting);
        info!(node_id = self.node_id(), "starting broker runtime");
        match self.runtime.start().await {
            Ok(()) => {
                self.start_state.send_replace(StartState::Started);
                info!(node_id = self.node_id(), "broker runtime started");
                Ok(())
            }
            Err(err) => {
                self.start_state.send_replace(StartState::NotStarted);
                warn!(node_id = self.node_id(), error = %err, "broker runtime failed to start");
                Err(err.into())
            }
        }
    }

    /// Stops the runtime.
    ///
    /// # Errors
    ///
    /// Returns the runtime's stop error.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        self.runtime.stop().await?;
        self.start_state.send_replace(StartState::NotStarted);
        info!(node_id = self.node_id(), "broker runtime stopped");
        Ok(())
    }
}

impl std::fmt::Debug for BrokerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerAdapter")
            .field("node_id", &self.node_id())
            .field("config", &self.config)
            .field("start_state", &self.start_state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
