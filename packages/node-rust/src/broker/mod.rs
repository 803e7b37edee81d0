//! Broker binding: the adapter over an attached runtime, its call router,
//! and the in-process `LocalBroker` runtime.

pub mod adapter;
pub mod local;
pub mod router;

pub use adapter::{BrokerAdapter, StartState};
pub use local::{LocalBroker, LocalBrokerStats};

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod integration_tests {
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    use anyhow::Context as _;
    use brokerlink_core::Value;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::config::{AdapterConfig, BrokerSettings};
    use crate::context;
    use crate::facade::ServiceFacade;
    use crate::service::{ServiceObject, ServiceState, ServiceTable};
    use crate::traits::BrokerRuntime;

    async fn node(node_id: &str) -> (Arc<ServiceFacade>, Arc<LocalBroker>) {
        let facade = ServiceFacade::new(AdapterConfig::default());
        let runtime = LocalBroker::new(BrokerSettings {
            node_id: Some(node_id.to_string()),
            ..BrokerSettings::default()
        });
        facade
            .attach_runtime(Arc::clone(&runtime) as Arc<dyn BrokerRuntime>)
            .await
            .unwrap();
        (facade, runtime)
    }

    fn facade_of(weak: &Weak<ServiceFacade>) -> anyhow::Result<Arc<ServiceFacade>> {
        weak.upgrade().context("facade dropped")
    }

    // -----------------------------------------------------------------------
    // Call chains
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn relay_reaches_ping_with_single_resolution() {
        let (facade, runtime) = node("node-1").await;
        let weak = Arc::downgrade(&facade);

        facade
            .register_service(
                Arc::new(ServiceTable::new("svcA").method("ping", |_| async { Ok(json!("pong")) })),
                Vec::new(),
            )
            .await
            .unwrap();
        facade
            .register_service(
                Arc::new(ServiceTable::new("svcB").method("relay", move |_| {
                    let weak = weak.clone();
                    async move {
                        let facade = facade_of(&weak)?;
                        Ok(facade.stub("svcA").call("ping", Vec::new()).await?)
                    }
                })),
                Vec::new(),
            )
            .await
            .unwrap();
        facade.start().await.unwrap();

        let out = facade.call("svcB.relay", Vec::new()).await.unwrap();

        assert_eq!(out, json!("pong"));
        assert_eq!(runtime.stats().resolves, 1);
        assert_eq!(runtime.stats().invokes, 1);
    }

    #[tokio::test]
    async fn request_id_is_shared_across_three_levels() {
        let (facade, _runtime) = node("node-1").await;
        let seen: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));

        let hop = |service: &str, next: Option<&'static str>| {
            let seen = Arc::clone(&seen);
            let weak = Arc::downgrade(&facade);
            ServiceTable::new(service).method("hop", move |_| {
                let seen = Arc::clone(&seen);
                let weak = weak.clone();
                async move {
                    let ctx = context::current().context("hop runs in a context")?;
                    seen.lock().push((ctx.request_id.clone(), ctx.level()));
                    match next {
                        Some(target) => Ok(facade_of(&weak)?.call(target, Vec::new()).await?),
                        None => Ok(json!("bottom")),
                    }
                }
            })
        };
        for table in [
            hop("level1", Some("level2.hop")),
            hop("level2", Some("level3.hop")),
            hop("level3", None),
        ] {
            facade.register_service(Arc::new(table), Vec::new()).await.unwrap();
        }
        facade.start().await.unwrap();

        let out = facade.call("level1.hop", Vec::new()).await.unwrap();

        assert_eq!(out, json!("bottom"));
        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert!(!seen[0].0.is_empty());
        assert!(seen.iter().all(|(request_id, _)| *request_id == seen[0].0));
        assert_eq!(seen.iter().map(|(_, level)| *level).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn member_errors_reach_the_caller_unchanged() {
        #[derive(Debug, thiserror::Error)]
        #[error("card declined")]
        struct Declined;

        let (facade, _runtime) = node("node-1").await;
        facade
            .register_service(
                Arc::new(ServiceTable::new("billing").method("charge", |_| async {
                    Err(anyhow::Error::new(Declined))
                })),
                Vec::new(),
            )
            .await
            .unwrap();
        facade.start().await.unwrap();

        let err = facade.call("billing.charge", Vec::new()).await.unwrap_err();

        assert_eq!(err.to_string(), "card declined");
        let inner = err.as_call_error().expect("member error carried through");
        assert!(inner.downcast_ref::<Declined>().is_some());
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn register_and_attach_yield_one_descriptor() {
        let facade = ServiceFacade::new(AdapterConfig::default());
        let runtime = LocalBroker::new(BrokerSettings {
            node_id: Some("node-1".to_string()),
            ..BrokerSettings::default()
        });
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let on_started = Arc::clone(&hooks);
        let service: Arc<dyn ServiceObject> = Arc::new(
            ServiceTable::new("greeter")
                .method("hello", |args| async move { Ok(json!(format!("hi {}", args[0]))) })
                .method("started", move |_| {
                    let hooks = Arc::clone(&on_started);
                    async move {
                        hooks.lock().push("started");
                        Ok(Value::Null)
                    }
                }),
        );

        facade.register_service(Arc::clone(&service), Vec::new()).await.unwrap();
        facade.register_service(Arc::clone(&service), Vec::new()).await.unwrap();
        facade
            .attach_runtime(Arc::clone(&runtime) as Arc<dyn BrokerRuntime>)
            .await
            .unwrap();
        facade.register_service(Arc::clone(&service), Vec::new()).await.unwrap();
        facade.start().await.unwrap();

        assert_eq!(runtime.stats().registers, 1);
        assert_eq!(facade.node_list().await.unwrap()[0].services, vec!["greeter"]);
        assert_eq!(*hooks.lock(), vec!["started"]);
        assert_eq!(
            facade.call("greeter.hello", vec![json!("ada")]).await.unwrap(),
            json!("hi \"ada\"")
        );
    }

    #[tokio::test]
    async fn destroy_bound_service_unregisters_once() {
        let (facade, runtime) = node("node-1").await;
        let table = Arc::new(
            ServiceTable::new("audit")
                .method("count", |_| async { Ok(json!(0)) })
                .listen("user.created", |_| async { Ok(()) }),
        );
        let service: Arc<dyn ServiceObject> = Arc::clone(&table) as Arc<dyn ServiceObject>;
        facade.register_service(Arc::clone(&service), Vec::new()).await.unwrap();

        facade.destroy_service(&service).await.unwrap();
        facade.destroy_service(&service).await.unwrap();

        assert_eq!(runtime.stats().unregisters, 1);
        assert_eq!(facade.state_of(&service), ServiceState::Unregistered);
        assert!(table.event_interests().is_empty());
        assert!(facade.node_list().await.unwrap()[0].services.is_empty());
    }

    #[tokio::test]
    async fn destroy_racing_a_slow_registration_leaves_runtime_empty() {
        tokio::time::pause();
        let (facade, runtime) = node("node-1").await;
        let table = Arc::new(
            ServiceTable::new("slow")
                .method("work", |_| async { Ok(Value::Null) })
                .method("created", |_| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Value::Null)
                })
                .listen("user.created", |_| async { Ok(()) }),
        );
        let service: Arc<dyn ServiceObject> = Arc::clone(&table) as Arc<dyn ServiceObject>;

        let (registered, destroyed) = tokio::join!(
            facade.register_service(Arc::clone(&service), Vec::new()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                facade.destroy_service(&service).await
            }
        );
        registered.unwrap();
        destroyed.unwrap();

        assert_eq!(facade.state_of(&service), ServiceState::Unregistered);
        assert_eq!(facade.registered_count(), 0);
        assert!(facade.node_list().await.unwrap()[0].services.is_empty());
        assert_eq!(runtime.stats().registers, 1);
        assert_eq!(runtime.stats().unregisters, 1);
        assert!(table.event_interests().is_empty());
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn started_hook_can_call_its_dependency() {
        let (facade, _runtime) = node("node-1").await;
        let answers = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&facade);
        let on_started = Arc::clone(&answers);

        facade
            .register_service(
                Arc::new(ServiceTable::new("config").method("get", |_| async { Ok(json!("v1")) })),
                Vec::new(),
            )
            .await
            .unwrap();
        facade
            .register_service(
                Arc::new(
                    ServiceTable::new("app")
                        .method("run", |_| async { Ok(Value::Null) })
                        .method("started", move |_| {
                            let weak = weak.clone();
                            let answers = Arc::clone(&on_started);
                            async move {
                                let value = facade_of(&weak)?
                                    .waiting_stub("config")
                                    .call("get", Vec::new())
                                    .await?;
                                answers.lock().push(value);
                                Ok(Value::Null)
                            }
                        }),
                ),
                vec!["config".to_string()],
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), facade.start())
            .await
            .expect("start does not deadlock")
            .unwrap();

        assert_eq!(*answers.lock(), vec![json!("v1")]);
        let report = facade.health_check().await.unwrap();
        assert_eq!(report.state, StartState::Started);
        assert_eq!(report.bound, 2);
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn internal_and_domain_events_keep_their_shapes() {
        let (facade, _runtime) = node("node-1").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let on_internal = Arc::clone(&seen);
        let on_domain = Arc::clone(&seen);

        facade
            .register_service(
                Arc::new(
                    ServiceTable::new("listener")
                        .listen("$cache.cleared", move |args| {
                            let seen = Arc::clone(&on_internal);
                            async move {
                                seen.lock().push(("internal", args));
                                Ok(())
                            }
                        })
                        .listen("user.created", move |args| {
                            let seen = Arc::clone(&on_domain);
                            async move {
                                seen.lock().push(("domain", args));
                                Ok(())
                            }
                        }),
                ),
                Vec::new(),
            )
            .await
            .unwrap();
        facade.start().await.unwrap();

        facade
            .broadcast("user.created", vec![json!("ada"), json!(36)])
            .await
            .unwrap();
        facade
            .broadcast_local("$cache.cleared", vec![json!({ "key": "users" })])
            .await
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ("domain", vec![json!("ada"), json!(36)]),
                ("internal", vec![json!([{ "key": "users" }])]),
            ]
        );
    }

    #[tokio::test]
    async fn event_handlers_see_the_delivery_context() {
        let (facade, runtime) = node("node-1").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let on_event = Arc::clone(&seen);

        facade
            .register_service(
                Arc::new(ServiceTable::new("audit").listen("order.placed", move |_| {
                    let seen = Arc::clone(&on_event);
                    async move {
                        let ctx = context::current().context("event runs in a context")?;
                        seen.lock().push((ctx.node_id.clone(), ctx.parent_call.is_none()));
                        Ok(())
                    }
                })),
                Vec::new(),
            )
            .await
            .unwrap();

        facade.broadcast("order.placed", Vec::new()).await.unwrap();

        assert_eq!(*seen.lock(), vec![(runtime.node_id().to_string(), true)]);
    }
}
