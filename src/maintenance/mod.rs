//! Fleet maintenance scheduling
//!
//! - [`switcher`]: flips nodes between `service` and `waiting`
//! - [`agent`]: turns waiting nodes into backlog tasks
//! - [`task`]: the pure derivation both of them share

pub mod agent;
pub mod switcher;
pub mod task;

pub use agent::{MaintenanceAgent, RenewReport};
pub use switcher::{ModeSwitcher, SwitchPolicy, SwitchSummary, Transition, WaitingReason};
pub use task::{compute_disks_to_replace, compute_disks_to_reserve, compute_maintenance_task};
