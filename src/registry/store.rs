//! Node registry using RocksDB
//!
//! Column families:
//! - `nodes`: hostname → [`NodeEntry`]
//! - `specs`: hostname → [`NodeSpec`]
//!
//! Several daemons share this store, and RocksDB admits a single opener at
//! a time. Every operation therefore opens the database while holding the
//! store lock and closes it before the lock is released.

use crate::common::{AdvisoryLock, Error, RegistryConfig, Result};
use crate::registry::model::{
    DaemonReport, DiskReport, Heartbeat, NodeEntry, NodeMode, NodeSpec, NodeStatus,
};
use rocksdb::{Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

const CF_NODES: &str = "nodes";
const CF_SPECS: &str = "specs";

/// Durable table of per-node liveness, mode and disk state
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    path: PathBuf,
    lock: AdvisoryLock,
}

impl NodeRegistry {
    pub fn new(path: impl Into<PathBuf>, lock: AdvisoryLock) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(
            &config.db_path,
            AdvisoryLock::new(config.registry_lock_path(), config.lock_options()),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_db<T>(&self, f: impl FnOnce(&DB) -> Result<T>) -> Result<T> {
        self.lock.with_lock(|| {
            let db = open_db(&self.path, &[CF_NODES, CF_SPECS])?;
            f(&db)
        })
    }

    /// Read-modify-write of one entry. `None` when the host is unknown.
    fn modify(
        &self,
        hostname: &str,
        f: impl FnOnce(&mut NodeEntry),
    ) -> Result<Option<NodeEntry>> {
        self.with_db(|db| {
            let Some(mut entry) = get_value::<NodeEntry>(db, CF_NODES, hostname)? else {
                tracing::debug!(hostname, "update for unregistered node ignored");
                return Ok(None);
            };
            f(&mut entry);
            put_value(db, CF_NODES, hostname, &entry)?;
            Ok(Some(entry))
        })
    }

    // === Node operations ===

    /// Register a node. Returns `false` if it was already registered.
    pub fn add_node(&self, entry: &NodeEntry) -> Result<bool> {
        if entry.hostname.trim().is_empty() {
            return Err(Error::InvalidReport("node without hostname".into()));
        }
        if let Some(report) = &entry.disk_report {
            report.validate()?;
        }
        self.with_db(|db| {
            if get_value::<NodeEntry>(db, CF_NODES, &entry.hostname)?.is_some() {
                return Ok(false);
            }
            put_value(db, CF_NODES, &entry.hostname, entry)?;
            tracing::info!(hostname = %entry.hostname, "node registered");
            Ok(true)
        })
    }

    pub fn get(&self, hostname: &str) -> Result<Option<NodeEntry>> {
        self.with_db(|db| get_value(db, CF_NODES, hostname))
    }

    pub fn update_status(
        &self,
        hostname: &str,
        status: NodeStatus,
        timestamp: i64,
    ) -> Result<Option<NodeEntry>> {
        self.modify(hostname, |entry| {
            entry.status = status;
            entry.last_heartbeat = timestamp;
        })
    }

    pub fn update_disk_report(
        &self,
        hostname: &str,
        report: DiskReport,
    ) -> Result<Option<NodeEntry>> {
        report.validate()?;
        self.modify(hostname, |entry| entry.disk_report = Some(report))
    }

    pub fn update_daemon_report(
        &self,
        hostname: &str,
        report: DaemonReport,
    ) -> Result<Option<NodeEntry>> {
        self.modify(hostname, |entry| entry.daemon_report = report)
    }

    /// Change the mode and stamp when it happened. Nothing else is touched.
    pub fn update_mode(
        &self,
        hostname: &str,
        mode: NodeMode,
        now: i64,
    ) -> Result<Option<NodeEntry>> {
        self.modify(hostname, |entry| {
            entry.mode = mode;
            entry.mode_switched_at = now;
        })
    }

    /// Apply a whole heartbeat under one lock acquisition.
    pub fn apply_heartbeat(&self, heartbeat: &Heartbeat) -> Result<Option<NodeEntry>> {
        heartbeat.validate()?;
        self.modify(&heartbeat.hostname, |entry| {
            entry.status = heartbeat.status;
            entry.last_heartbeat = heartbeat.timestamp;
            if let Some(report) = &heartbeat.disk_report {
                entry.disk_report = Some(report.clone());
            }
            entry.daemon_report = heartbeat.daemon_report.clone();
        })
    }

    /// All entries matching `predicate`, in hostname order.
    pub fn query(&self, predicate: impl Fn(&NodeEntry) -> bool) -> Result<Vec<NodeEntry>> {
        self.with_db(|db| {
            Ok(scan::<NodeEntry>(db, CF_NODES)?
                .into_iter()
                .filter(|entry| predicate(entry))
                .collect())
        })
    }

    pub fn list(&self) -> Result<Vec<NodeEntry>> {
        self.query(|_| true)
    }

    /// Explicitly remove a node and its spec. Returns `false` if unknown.
    pub fn deregister(&self, hostname: &str) -> Result<bool> {
        self.with_db(|db| {
            if get_value::<NodeEntry>(db, CF_NODES, hostname)?.is_none() {
                return Ok(false);
            }
            db.delete_cf(cf(db, CF_NODES)?, hostname.as_bytes())?;
            db.delete_cf(cf(db, CF_SPECS)?, hostname.as_bytes())?;
            tracing::info!(hostname, "node deregistered");
            Ok(true)
        })
    }

    // === Spec operations ===

    pub fn put_spec(&self, spec: &NodeSpec) -> Result<()> {
        if spec.hostname.trim().is_empty() {
            return Err(Error::InvalidReport("spec without hostname".into()));
        }
        self.with_db(|db| put_value(db, CF_SPECS, &spec.hostname, spec))
    }

    pub fn get_spec(&self, hostname: &str) -> Result<Option<NodeSpec>> {
        self.with_db(|db| get_value(db, CF_SPECS, hostname))
    }

    pub fn list_specs(&self) -> Result<Vec<NodeSpec>> {
        self.with_db(|db| scan(db, CF_SPECS))
    }
}

// === RocksDB helpers shared with the backlog ===

pub(crate) fn open_db(path: &Path, families: &[&str]) -> Result<DB> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    Ok(DB::open_cf(&opts, path, families)?)
}

pub(crate) fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| Error::MetadataCorrupted(format!("missing column family {}", name)))
}

pub(crate) fn get_value<T: DeserializeOwned>(db: &DB, family: &str, key: &str) -> Result<Option<T>> {
    match db.get_cf(cf(db, family)?, key.as_bytes())? {
        Some(bytes) => {
            let value = bincode::deserialize(&bytes)
                .map_err(|e| Error::MetadataCorrupted(format!("{}/{}: {}", family, key, e)))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub(crate) fn put_value<T: Serialize>(db: &DB, family: &str, key: &str, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    db.put_cf(cf(db, family)?, key.as_bytes(), bytes)?;
    Ok(())
}

pub(crate) fn scan<T: DeserializeOwned>(db: &DB, family: &str) -> Result<Vec<T>> {
    let iter = db.iterator_cf(cf(db, family)?, rocksdb::IteratorMode::Start);
    let mut values = Vec::new();
    for item in iter {
        let (key, bytes) = item?;
        let value = bincode::deserialize(&bytes).map_err(|e| {
            Error::MetadataCorrupted(format!("{}/{}: {}", family, String::from_utf8_lossy(&key), e))
        })?;
        values.push(value);
    }
    Ok(values)
}
