//! Maintenance backlog: pending repair tasks, one per hostname

use crate::common::{AdvisoryLock, RegistryConfig, Result};
use crate::registry::model::{MaintenanceTask, TargetKind};
use crate::registry::store::{cf, get_value, open_db, put_value, scan};
use rocksdb::DB;
use std::path::PathBuf;

const CF_BACKLOG: &str = "backlog";

#[derive(Debug, Clone)]
pub struct MaintenanceBacklog {
    path: PathBuf,
    lock: AdvisoryLock,
}

impl MaintenanceBacklog {
    pub fn new(path: impl Into<PathBuf>, lock: AdvisoryLock) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(
            &config.backlog_path,
            AdvisoryLock::new(config.backlog_lock_path(), config.lock_options()),
        )
    }

    fn with_db<T>(&self, f: impl FnOnce(&DB) -> Result<T>) -> Result<T> {
        self.lock.with_lock(|| {
            let db = open_db(&self.path, &[CF_BACKLOG])?;
            f(&db)
        })
    }

    /// Insert `task` unless its hostname already has one (first writer wins).
    pub fn add(&self, task: &MaintenanceTask) -> Result<bool> {
        self.with_db(|db| {
            if get_value::<MaintenanceTask>(db, CF_BACKLOG, &task.hostname)?.is_some() {
                tracing::debug!(hostname = %task.hostname, "task already queued");
                return Ok(false);
            }
            put_value(db, CF_BACKLOG, &task.hostname, task)?;
            Ok(true)
        })
    }

    /// Returns `false` if there was no task for `hostname`.
    pub fn delete(&self, hostname: &str) -> Result<bool> {
        self.with_db(|db| {
            if get_value::<MaintenanceTask>(db, CF_BACKLOG, hostname)?.is_none() {
                return Ok(false);
            }
            db.delete_cf(cf(db, CF_BACKLOG)?, hostname.as_bytes())?;
            Ok(true)
        })
    }

    pub fn get(&self, hostname: &str) -> Result<Option<MaintenanceTask>> {
        self.with_db(|db| get_value(db, CF_BACKLOG, hostname))
    }

    pub fn list(&self) -> Result<Vec<MaintenanceTask>> {
        self.with_db(|db| scan(db, CF_BACKLOG))
    }

    pub fn list_by_target(&self, kind: TargetKind) -> Result<Vec<MaintenanceTask>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|task| task.target.kind() == kind)
            .collect())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.with_db(|db| {
            let mut iter = db.iterator_cf(cf(db, CF_BACKLOG)?, rocksdb::IteratorMode::Start);
            match iter.next() {
                Some(item) => {
                    item?;
                    Ok(false)
                }
                None => Ok(true),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::LockOptions;
    use crate::registry::model::MaintenanceTarget;
    use std::time::Duration;
    use tempfile::tempdir;

    fn backlog(dir: &std::path::Path) -> MaintenanceBacklog {
        let options = LockOptions {
            retries: 2,
            retry_delay: Duration::from_millis(10),
            stale_after: None,
        };
        MaintenanceBacklog::new(
            dir.join("backlog"),
            AdvisoryLock::new(dir.join("backlog.lock"), options),
        )
    }

    fn task(hostname: &str, target: MaintenanceTarget) -> MaintenanceTask {
        MaintenanceTask {
            hostname: hostname.into(),
            target,
            created_at: 1000,
        }
    }

    #[test]
    fn test_one_task_per_host() {
        let dir = tempdir().unwrap();
        let backlog = backlog(dir.path());
        assert!(backlog.is_empty().unwrap());

        assert!(backlog.add(&task("a", MaintenanceTarget::NodeMissing)).unwrap());
        let second = task(
            "a",
            MaintenanceTarget::DiskBroken {
                disks_to_replace: vec!["X".into()],
            },
        );
        assert!(!backlog.add(&second).unwrap());

        let tasks = backlog.list().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].target, MaintenanceTarget::NodeMissing);
        assert!(!backlog.is_empty().unwrap());
    }

    #[test]
    fn test_delete_and_filter() {
        let dir = tempdir().unwrap();
        let backlog = backlog(dir.path());
        backlog.add(&task("a", MaintenanceTarget::NodeMissing)).unwrap();
        backlog
            .add(&task(
                "b",
                MaintenanceTarget::DiskMissing {
                    disks_to_reserve: vec!["S1".into()],
                },
            ))
            .unwrap();

        let missing = backlog.list_by_target(TargetKind::DiskMissing).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].hostname, "b");

        assert!(backlog.delete("a").unwrap());
        assert!(!backlog.delete("a").unwrap());
        assert!(backlog.get("a").unwrap().is_none());
        assert!(backlog.get("b").unwrap().is_some());
    }
}
