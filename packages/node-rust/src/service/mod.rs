//! Service objects and everything the adapter derives from them:
//! descriptors, dispatch handlers, and the facade's instance registry.

pub mod descriptor;
pub mod dispatch;
pub mod object;
pub mod registry;
pub mod table;

pub use descriptor::ServiceDescriptor;
pub use dispatch::{ActionHandler, EventHandler, EventMode, LifecycleHandler};
pub use object::{EventInterest, ServiceObject};
pub use registry::{BindClaim, ServiceEntry, ServiceRegistry, ServiceState};
pub use table::ServiceTable;
