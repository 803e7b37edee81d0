//! `brokerlink` node: exposes plain service objects as microservices on a
//! broker runtime, with request-scoped context propagation across nested
//! calls.

pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod facade;
pub mod logging;
pub mod service;
pub mod stub;
pub mod traits;

#[cfg(test)]
mod testing;

pub use broker::{BrokerAdapter, LocalBroker, LocalBrokerStats, StartState};
pub use config::{AdapterConfig, BrokerSettings, NodeConfig};
pub use context::RequestContext;
pub use error::BrokerError;
pub use facade::{HealthReport, ServiceFacade};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use service::{EventInterest, ServiceDescriptor, ServiceObject, ServiceState, ServiceTable};
pub use stub::{CallMode, RemoteMethod, RemoteStub};
pub use traits::BrokerRuntime;
