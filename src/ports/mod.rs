//! Port allocation.
//!
//! Every service of a target gets a host port that no other service of the
//! same target holds. Ports come from three places, in this order:
//! - `external_services`: fixed, never reassigned
//! - `platform_overrides`: fixed per platform, checked for collisions
//! - the environment's range, scanned in ascending order

mod allocator;
mod plan;

pub use allocator::{PortAllocation, PortAllocator};
pub use plan::{
    PortAssignment, PortPlan, PortRange, PortSource, ASSIGNED_PORTS_PATH, PORTS_PATH, SERVICES_PATH,
};
