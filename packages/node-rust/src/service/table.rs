//! `ServiceTable`: a service object assembled from named async closures.

use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use brokerlink_core::Value;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;

use super::object::{EventInterest, ServiceObject};
use crate::facade::ServiceFacade;

type MethodFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;
type ListenerFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A [`ServiceObject`] whose members are an explicit name → closure table.
///
/// Member names follow the usual conventions: `started`/`created`/`stopped`
/// become lifecycle hooks, `onNodeConnected` and friends bind node signals,
/// everything else is an action. Listeners registered with [`listen`]
/// become the service's event interests.
///
/// [`listen`]: ServiceTable::listen
pub struct ServiceTable {
    name: Option<String>,
    methods: Vec<(String, MethodFn)>,
    listeners: RwLock<Vec<(String, Vec<ListenerFn>)>>,
    facade: RwLock<Weak<ServiceFacade>>,
}

impl ServiceTable {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::unnamed()
        }
    }

    /// A table without a name. It can be registered but never binds.
    #[must_use]
    pub fn unnamed() -> Self {
        Self {
            name: None,
            methods: Vec::new(),
            listeners: RwLock::new(Vec::new()),
            facade: RwLock::new(Weak::new()),
        }
    }

    /// Adds (or replaces) a member.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let name = name.into();
        let method: MethodFn = Arc::new(move |args| f(args).boxed());
        match self.methods.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = method,
            None => self.methods.push((name, method)),
        }
        self
    }

    /// Adds a listener for `event`, declaring interest in it.
    #[must_use]
    pub fn listen<F, Fut>(mut self, event: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let event = event.into();
        let listener: ListenerFn = Arc::new(move |args| f(args).boxed());
        let listeners = self.listeners.get_mut();
        match listeners.iter_mut().find(|(existing, _)| *existing == event) {
            Some((_, list)) => list.push(listener),
            None => listeners.push((event, vec![listener])),
        }
        self
    }

    /// The facade this table was registered with, while it is alive.
    #[must_use]
    pub fn facade(&self) -> Option<Arc<ServiceFacade>> {
        self.facade.read().upgrade()
    }
}

#[async_trait]
impl ServiceObject for ServiceTable {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn members(&self) -> Vec<String> {
        self.methods.iter().map(|(name, _)| name.clone()).collect()
    }

    fn event_interests(&self) -> Vec<EventInterest> {
        self.listeners
            .read()
            .iter()
            .map(|(event, _)| EventInterest::new(event.clone()))
            .collect()
    }

    async fn invoke(&self, member: &str, params: Vec<Value>) -> anyhow::Result<Value> {
        let method = self
            .methods
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, method)| Arc::clone(method))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "service `{}` has no member `{member}`",
                    self.name.as_deref().unwrap_or("<unnamed>")
                )
            })?;
        method(params).await
    }

    async fn emit(&self, event: &str, args: Vec<Value>) -> anyhow::Result<()> {
        let listeners: Vec<ListenerFn> = self
            .listeners
            .read()
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, list)| list.clone())
            .unwrap_or_default();
        for listener in listeners {
            listener(args.clone()).await?;
        }
        Ok(())
    }

    fn remove_all_listeners(&self) {
        self.listeners.write().clear();
    }

    fn on_register(&self, facade: Weak<ServiceFacade>) {
        *self.facade.write() = facade;
    }
}
