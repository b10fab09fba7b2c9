//! Common utilities and types shared across ringwarden

pub mod config;
pub mod daemon;
pub mod error;
pub mod exec;
pub mod lock;
pub mod logging;
pub mod utils;

pub use config::{Config, DeviceConfig, MaintenanceConfig, RegistryConfig, ServiceSpec, SyncConfig};
pub use daemon::{run_daemon, shutdown_signal, Daemon};
pub use error::{Error, Result};
pub use lock::{AdvisoryLock, LockGuard, LockOptions};
pub use utils::timestamp_now;
