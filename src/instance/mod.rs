//! Instance identity, single instance detection and the address registry

pub mod guard;
pub mod key;
pub mod registry;

pub use guard::{Acquisition, InstanceLease, SingleInstanceGuard};
pub use key::{InstanceKey, InstancePaths};
pub use registry::{AddressFileGuard, AddressRegistry};
