//! Fleet state: node registry, node specs and the maintenance backlog

pub mod backlog;
pub mod client;
pub mod http;
pub mod model;
pub mod store;

pub use backlog::MaintenanceBacklog;
pub use client::RegistryClient;
pub use model::{
    DaemonReport, DaemonState, DiskRecord, DiskReport, Heartbeat, MaintenanceTarget,
    MaintenanceTask, MissingDisks, NodeEntry, NodeMode, NodeSpec, NodeStatus, TargetKind,
};
pub use store::NodeRegistry;
