//! Service descriptor construction: turns a service object's member names and
//! event interests into the declarative surface a broker runtime registers.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use brokerlink_core::{classify_member, event_kind, EventKind, LifecycleHook, MemberKind};
use tracing::{debug, warn};

use super::dispatch::{ActionHandler, EventHandler, EventMode, LifecycleHandler};
use super::object::ServiceObject;
use crate::broker::BrokerAdapter;

/// Declarative dispatch surface of one service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Member name -> action handler.
    pub actions: BTreeMap<String, ActionHandler>,
    /// Event name -> handler. Includes node-signal listeners.
    pub events: BTreeMap<String, EventHandler>,
    pub lifecycle: BTreeMap<LifecycleHook, LifecycleHandler>,
    /// Services that must be available before `started` runs, in order,
    /// without duplicates.
    pub dependencies: Vec<String>,
}

impl ServiceDescriptor {
    /// Builds the descriptor for `instance`.
    ///
    /// Returns `None` when the service has no name, or when it exposes
    /// neither actions nor events (nothing to register).
    ///
    /// Members are classified once here: lifecycle names first, then `onX`
    /// node-signal listeners, then actions. Declared event interests with a
    /// `$` prefix receive the whole payload; others receive it spread.
    #[must_use]
    pub fn build(
        instance: &Arc<dyn ServiceObject>,
        dependencies: &[String],
        adapter: &Weak<BrokerAdapter>,
    ) -> Option<Self> {
        let Some(name) = instance.name().filter(|name| !name.is_empty()) else {
            debug!("service has no name, skipping registration");
            return None;
        };
        let service: Arc<str> = Arc::from(name);

        let mut events = BTreeMap::new();
        for interest in instance.event_interests() {
            let mode = match event_kind(&interest.event_name) {
                EventKind::Internal => EventMode::Payload,
                EventKind::Domain => EventMode::Spread,
            };
            let handler = EventHandler::new(
                Arc::clone(&service),
                &interest.event_name,
                mode,
                Arc::clone(instance),
                adapter.clone(),
            );
            events.insert(interest.event_name, handler);
        }

        let mut actions = BTreeMap::new();
        let mut lifecycle = BTreeMap::new();
        for member in instance.members() {
            match classify_member(&member) {
                MemberKind::Excluded => {}
                MemberKind::Lifecycle(hook) => {
                    let handler = LifecycleHandler::new(
                        Arc::clone(&service),
                        hook,
                        Arc::clone(instance),
                        adapter.clone(),
                    );
                    lifecycle.insert(hook, handler);
                }
                MemberKind::Signal(signal) => {
                    let event = signal.event_name();
                    let handler = EventHandler::new(
                        Arc::clone(&service),
                        event,
                        EventMode::Listener {
                            member: member.clone(),
                        },
                        Arc::clone(instance),
                        adapter.clone(),
                    );
                    events.insert(event.to_string(), handler);
                }
                MemberKind::UnknownSignal => {
                    warn!(service = name, member = %member, "no node signal matches listener, skipping");
                }
                MemberKind::Action => {
                    let handler = ActionHandler::new(
                        Arc::clone(&service),
                        &member,
                        Arc::clone(instance),
                        adapter.clone(),
                    );
                    actions.insert(member, handler);
                }
            }
        }

        if actions.is_empty() && events.is_empty() {
            debug!(service = name, "service has no actions or events, skipping registration");
            return None;
        }

        let mut deps: Vec<String> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }

        Some(Self {
            name: name.to_string(),
            actions,
            events,
            lifecycle,
            dependencies: deps,
        })
    }
}

#[cfg(test)]
mod tests {
    use brokerlink_core::Value;
    use serde_json::json;

    use super::*;
    use crate::service::ServiceTable;

    fn build(table: ServiceTable, deps: &[&str]) -> Option<ServiceDescriptor> {
        let instance: Arc<dyn ServiceObject> = Arc::new(table);
        let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
        ServiceDescriptor::build(&instance, &deps, &Weak::new())
    }

    fn noop(_: Vec<Value>) -> impl std::future::Future<Output = anyhow::Result<Value>> {
        async { Ok(Value::Null) }
    }

    #[test]
    fn members_are_split_into_categories() {
        let table = ServiceTable::new("accounts")
            .method("constructor", noop)
            .method("created", noop)
            .method("started", noop)
            .method("stopped", noop)
            .method("onNodeConnected", noop)
            .method("onNodeDisconnected", noop)
            .method("onSomethingOdd", noop)
            .method("balance", noop)
            .method("deposit", noop)
            .listen("$cache.cleared", |_| async { Ok(()) })
            .listen("account.opened", |_| async { Ok(()) });

        let descriptor = build(table, &[]).expect("descriptor");

        assert_eq!(descriptor.name, "accounts");
        assert_eq!(
            descriptor.actions.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["balance", "deposit"]
        );
        assert_eq!(
            descriptor.lifecycle.keys().copied().collect::<Vec<_>>(),
            LifecycleHook::ALL.to_vec()
        );
        assert_eq!(
            descriptor.events.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["$cache.cleared", "$node.connected", "$node.disconnected", "account.opened"]
        );
        assert_eq!(descriptor.events["$cache.cleared"].mode(), &EventMode::Payload);
        assert_eq!(descriptor.events["account.opened"].mode(), &EventMode::Spread);
        assert_eq!(
            descriptor.events["$node.connected"].mode(),
            &EventMode::Listener {
                member: "onNodeConnected".to_string()
            }
        );
    }

    #[test]
    fn lifecycle_names_never_become_actions() {
        let table = ServiceTable::new("svc")
            .method("started", noop)
            .method("work", noop);
        let descriptor = build(table, &[]).expect("descriptor");

        assert!(!descriptor.actions.contains_key("started"));
        assert!(descriptor.lifecycle.contains_key(&LifecycleHook::Started));
    }

    #[test]
    fn unnamed_service_is_not_described() {
        assert!(build(ServiceTable::unnamed().method("work", noop), &[]).is_none());
        assert!(build(ServiceTable::new("").method("work", noop), &[]).is_none());
    }

    #[test]
    fn service_without_actions_or_events_is_inert() {
        assert!(build(ServiceTable::new("empty"), &[]).is_none());
        let hooks_only = ServiceTable::new("hooks").method("started", noop);
        assert!(build(hooks_only, &[]).is_none());
    }

    #[test]
    fn events_alone_are_enough() {
        let table = ServiceTable::new("listener").listen("order.placed", |_| async { Ok(()) });
        let descriptor = build(table, &[]).expect("descriptor");
        assert!(descriptor.actions.is_empty());
        assert_eq!(descriptor.events.len(), 1);
    }

    #[test]
    fn signal_member_overrides_declared_interest() {
        let table = ServiceTable::new("watcher")
            .listen("$node.connected", |_| async { Ok(()) })
            .method("onNodeConnected", noop);
        let descriptor = build(table, &[]).expect("descriptor");

        assert!(matches!(
            descriptor.events["$node.connected"].mode(),
            EventMode::Listener { .. }
        ));
    }

    #[test]
    fn dependencies_keep_order_without_duplicates() {
        let table = ServiceTable::new("orders").method("place", |_| async { Ok(json!(true)) });
        let descriptor = build(table, &["users", "billing", "users"]).expect("descriptor");
        assert_eq!(descriptor.dependencies, vec!["users", "billing"]);
    }
}
