//! `brokerlink` core: call records, node descriptors, and the naming rules
//! shared by the service adapter and broker runtime implementations.

pub mod invocation;
pub mod naming;
pub mod types;

pub use invocation::{CallHandle, EventDelivery, Invocation};
pub use naming::{
    classify_member, event_kind, service_of, EventKind, LifecycleHook, MemberKind, NodeSignal,
    INTERNAL_EVENT_PREFIX,
};
pub use types::{NodeInfo, ServiceFilter, ServiceInfo, Value};
