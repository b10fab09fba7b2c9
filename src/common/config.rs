//! Configuration for ringwarden components
//!
//! Loaded from an optional TOML file layered under `RINGWARDEN__SECTION__KEY`
//! environment variables. Every field has a default so a bare node can start
//! with no file at all.

use crate::common::lock::LockOptions;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ringwarden/ringwarden.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub registry: RegistryConfig,
    pub maintenance: MaintenanceConfig,
    pub devices: DeviceConfig,
    pub sync: SyncConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            registry: RegistryConfig::default(),
            maintenance: MaintenanceConfig::default(),
            devices: DeviceConfig::default(),
            sync: SyncConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Identity of the local node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Overrides the kernel hostname
    pub hostname: Option<String>,
    /// Address other nodes use to reach this one
    pub address: Option<String>,
}

/// Node registry and maintenance backlog stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// RocksDB path for the node registry
    pub db_path: PathBuf,
    /// RocksDB path for the maintenance backlog
    pub backlog_path: PathBuf,
    /// Directory holding store lock files
    pub lock_dir: PathBuf,
    pub lock_retries: u32,
    pub lock_retry_delay_ms: u64,
    /// Lock files older than this are considered abandoned
    pub lock_stale_secs: u64,
    /// Bind address for the heartbeat HTTP API
    pub bind_addr: SocketAddr,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/ringwarden/registry"),
            backlog_path: PathBuf::from("/var/lib/ringwarden/backlog"),
            lock_dir: PathBuf::from("/var/lock/ringwarden"),
            lock_retries: 10,
            lock_retry_delay_ms: 500,
            lock_stale_secs: 900,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2308)),
        }
    }
}

impl RegistryConfig {
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            retries: self.lock_retries,
            retry_delay: Duration::from_millis(self.lock_retry_delay_ms),
            stale_after: Some(Duration::from_secs(self.lock_stale_secs)),
        }
    }

    pub fn registry_lock_path(&self) -> PathBuf {
        self.lock_dir.join("registry.lock")
    }

    pub fn backlog_lock_path(&self) -> PathBuf {
        self.lock_dir.join("backlog.lock")
    }

    /// Serializes whole backlog renew cycles
    pub fn maintenance_lock_path(&self) -> PathBuf {
        self.lock_dir.join("maintenance.lock")
    }
}

/// ModeSwitcher and MaintenanceAgent timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Grace period for re-replication after a disk or node failure
    pub replication_time_secs: u64,
    /// Heartbeat age after which a node is considered unreachable
    pub refresh_time_secs: u64,
    /// Sleep between daemon ticks
    pub daemon_sleep_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            replication_time_secs: 24 * 3600,
            refresh_time_secs: 30 * 60,
            daemon_sleep_secs: 60,
        }
    }
}

impl MaintenanceConfig {
    pub fn replication_time(&self) -> Duration {
        Duration::from_secs(self.replication_time_secs)
    }

    pub fn refresh_time(&self) -> Duration {
        Duration::from_secs(self.refresh_time_secs)
    }

    pub fn daemon_sleep(&self) -> Duration {
        Duration::from_secs(self.daemon_sleep_secs)
    }
}

/// Local disk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Parent directory of device slot mountpoints
    pub node_root: PathBuf,
    /// Parent directory of temporary mountpoints
    pub scratch_root: PathBuf,
    /// Slot mountpoints are `<node_root>/<device_prefix><slot>`
    pub device_prefix: String,
    /// Host-wide lock serializing disk reconciliation
    pub host_lock_path: PathBuf,
    pub host_lock_retries: u32,
    pub host_lock_retry_delay_ms: u64,
    pub command_timeout_secs: u64,
    /// `mkfs` gets its own, longer, bound
    pub format_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            node_root: PathBuf::from("/srv/node"),
            scratch_root: PathBuf::from("/tmp/ringwarden"),
            device_prefix: "sdb".to_string(),
            host_lock_path: PathBuf::from("/var/lock/ringwarden/host.lock"),
            host_lock_retries: 11,
            host_lock_retry_delay_ms: 1000,
            command_timeout_secs: 60,
            format_timeout_secs: 600,
        }
    }
}

impl DeviceConfig {
    pub fn host_lock_options(&self) -> LockOptions {
        LockOptions {
            retries: self.host_lock_retries,
            retry_delay: Duration::from_millis(self.host_lock_retry_delay_ms),
            stale_after: Some(Duration::from_secs(900)),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn format_timeout(&self) -> Duration {
        Duration::from_secs(self.format_timeout_secs)
    }
}

/// A local support service the sync daemon keeps running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Process name checked with `pgrep -x`
    pub name: String,
    /// Shell command that (re)starts it
    pub restart: String,
}

/// MetadataSyncDaemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub period_secs: u64,
    /// Hard bound on one whole cycle
    pub cycle_timeout_secs: u64,
    /// Ring and cluster configuration
    pub metadata_dir: PathBuf,
    /// Control scripts shipped alongside the metadata
    pub scripts_dir: PathBuf,
    /// Local scratch area for the outgoing bundle
    pub staging_dir: PathBuf,
    /// Remote scratch root; the bundle lands in `<root>/<own address>`
    pub remote_staging_root: PathBuf,
    /// Top-level metadata entries never copied off the node
    pub exclude: Vec<String>,
    /// Fleet address list; falls back to the `fleet` file in `metadata_dir`
    pub peers: Vec<String>,
    pub ssh_user: String,
    pub ssh_identity: Option<PathBuf>,
    pub ssh_timeout_secs: u64,
    pub copy_timeout_secs: u64,
    /// Path of the ringwarden CLI on peers
    pub remote_binary: String,
    pub services: Vec<ServiceSpec>,
    /// Restarted after a newer configuration is applied
    pub storage_services: Vec<ServiceSpec>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            cycle_timeout_secs: 360,
            metadata_dir: PathBuf::from("/etc/ringwarden/ring"),
            scripts_dir: PathBuf::from("/usr/lib/ringwarden/scripts"),
            staging_dir: PathBuf::from("/var/lib/ringwarden/staging"),
            remote_staging_root: PathBuf::from("/tmp/ringwarden-sync"),
            exclude: vec!["cert*".into(), "backups".into(), "*.conf".into()],
            peers: Vec::new(),
            ssh_user: "root".to_string(),
            ssh_identity: None,
            ssh_timeout_secs: 20,
            copy_timeout_secs: 300,
            remote_binary: "ringwarden".to_string(),
            services: vec![
                ServiceSpec {
                    name: "rsync".into(),
                    restart: "systemctl restart rsync".into(),
                },
                ServiceSpec {
                    name: "memcached".into(),
                    restart: "systemctl restart memcached".into(),
                },
            ],
            storage_services: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }

    pub fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_secs)
    }
}

impl Config {
    /// Load from `path` (missing file allowed) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let config: Config = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("RINGWARDEN")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("sync.peers")
                    .with_list_parse_key("sync.exclude")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document directly (no environment layering).
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.maintenance;
        if m.daemon_sleep_secs == 0 {
            return Err(Error::InvalidConfig("maintenance.daemon_sleep_secs must be > 0".into()));
        }
        if m.refresh_time_secs == 0 {
            return Err(Error::InvalidConfig("maintenance.refresh_time_secs must be > 0".into()));
        }
        if self.sync.period_secs == 0 || self.sync.cycle_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "sync.period_secs and sync.cycle_timeout_secs must be > 0".into(),
            ));
        }
        crate::common::utils::exclude_patterns(&self.sync.exclude)?;
        if self.devices.device_prefix.is_empty()
            || self.devices.device_prefix.ends_with(|c: char| c.is_ascii_digit())
        {
            return Err(Error::InvalidConfig(
                "devices.device_prefix must be non-empty and not end in a digit".into(),
            ));
        }
        if self.devices.command_timeout_secs == 0 {
            return Err(Error::InvalidConfig("devices.command_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Hostname this node identifies as
    pub fn hostname(&self) -> Result<String> {
        match &self.node.hostname {
            Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
            _ => crate::common::utils::local_hostname(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.maintenance.replication_time(), Duration::from_secs(86400));
        assert_eq!(config.devices.device_prefix, "sdb");
        assert_eq!(config.sync.exclude.len(), 3);
    }

    #[test]
    fn test_from_toml_overrides() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"

            [node]
            hostname = "storage-07"

            [maintenance]
            replication_time_secs = 3600
            refresh_time_secs = 100

            [sync]
            peers = ["10.0.0.1", "10.0.0.2"]
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.hostname().unwrap(), "storage-07");
        assert_eq!(config.maintenance.replication_time_secs, 3600);
        assert_eq!(config.maintenance.refresh_time_secs, 100);
        // Untouched fields keep their defaults
        assert_eq!(config.maintenance.daemon_sleep_secs, 60);
        assert_eq!(config.sync.peers, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.maintenance.daemon_sleep_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.devices.device_prefix = "sdb1".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.exclude.push("cert[".into());
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.devices.node_root, PathBuf::from("/srv/node"));
    }
}
