//! In-memory-controlled disks backed by directories, for tests and dry runs
//!
//! Each disk is a directory under `<root>/disks/<name>`. Mounting replaces
//! the target directory with a symlink to the disk directory; formatting
//! empties it. Failures and health verdicts are injected per disk.

use crate::common::{Error, Result};
use crate::devices::backend::{Disk, DiskBackend, MountEntry};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct FakeState {
    disks: BTreeMap<String, Disk>,
    mounts: BTreeMap<PathBuf, String>,
    unhealthy: BTreeSet<String>,
    failing_mounts: BTreeSet<String>,
    failing_formats: BTreeSet<String>,
    formats: usize,
}

#[derive(Debug, Clone)]
pub struct FakeDisks {
    root: PathBuf,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDisks {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("fake disk state poisoned".into()))
    }

    pub fn disk_dir(&self, name: &str) -> PathBuf {
        self.root.join("disks").join(name)
    }

    /// Attach a blank disk.
    pub fn add_disk(&self, name: &str, serial: &str) -> Result<Disk> {
        std::fs::create_dir_all(self.disk_dir(name))?;
        let disk = Disk {
            name: name.to_string(),
            serial: Some(serial.to_string()),
        };
        self.lock()?.disks.insert(name.to_string(), disk.clone());
        Ok(disk)
    }

    /// Detach a disk, keeping its contents so it can be attached elsewhere.
    pub fn remove_disk(&self, name: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.disks.remove(name);
        let targets: Vec<PathBuf> = state
            .mounts
            .iter()
            .filter(|(_, disk)| disk.as_str() == name)
            .map(|(target, _)| target.clone())
            .collect();
        for target in targets {
            state.mounts.remove(&target);
            let _ = std::fs::remove_file(&target);
        }
        Ok(())
    }

    pub fn set_healthy(&self, name: &str, healthy: bool) -> Result<()> {
        let mut state = self.lock()?;
        if healthy {
            state.unhealthy.remove(name);
        } else {
            state.unhealthy.insert(name.to_string());
        }
        Ok(())
    }

    pub fn fail_mounts(&self, name: &str) -> Result<()> {
        self.lock()?.failing_mounts.insert(name.to_string());
        Ok(())
    }

    pub fn fail_formats(&self, name: &str) -> Result<()> {
        self.lock()?.failing_formats.insert(name.to_string());
        Ok(())
    }

    pub fn format_count(&self) -> usize {
        self.lock().map(|s| s.formats).unwrap_or_default()
    }

    /// Disk currently mounted at `target`
    pub fn mounted_at(&self, target: &Path) -> Option<String> {
        self.lock().ok()?.mounts.get(target).cloned()
    }
}

impl DiskBackend for FakeDisks {
    async fn list_disks(&self) -> Result<Vec<Disk>> {
        Ok(self.lock()?.disks.values().cloned().collect())
    }

    async fn mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(self
            .lock()?
            .mounts
            .iter()
            .map(|(target, disk)| MountEntry {
                disk: disk.clone(),
                mountpoint: target.clone(),
            })
            .collect())
    }

    async fn mount(&self, disk: &Disk, target: &Path, _read_only: bool) -> Result<()> {
        let mut state = self.lock()?;
        if !state.disks.contains_key(&disk.name) || state.failing_mounts.contains(&disk.name) {
            return Err(Error::Other(format!("mount of {} failed", disk.name)));
        }
        if state.mounts.contains_key(target) {
            return Err(Error::Other(format!("{} is busy", target.display())));
        }

        if target.is_dir() && !target.is_symlink() {
            std::fs::remove_dir(target)?;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        symlink(&self.disk_dir(&disk.name), target)?;
        state.mounts.insert(target.to_path_buf(), disk.name.clone());
        Ok(())
    }

    async fn unmount_lazy(&self, target: &Path) -> Result<()> {
        let mut state = self.lock()?;
        if state.mounts.remove(target).is_some() {
            std::fs::remove_file(target)?;
            std::fs::create_dir_all(target)?;
        }
        Ok(())
    }

    async fn format(&self, disk: &Disk) -> Result<()> {
        let mut state = self.lock()?;
        if state.failing_formats.contains(&disk.name) {
            return Err(Error::Other(format!("mkfs on {} failed", disk.name)));
        }
        crate::common::utils::clear_dir(&self.disk_dir(&disk.name))?;
        state.formats += 1;
        Ok(())
    }

    async fn is_healthy(&self, disk: &Disk) -> Result<bool> {
        Ok(!self.lock()?.unhealthy.contains(&disk.name))
    }
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_mount_is_visible_through_target() {
        let dir = tempdir().unwrap();
        let fake = FakeDisks::new(dir.path());
        let disk = fake.add_disk("sdc", "SN-C").unwrap();
        std::fs::write(fake.disk_dir("sdc").join("hello"), b"hi").unwrap();

        let target = dir.path().join("node/sdb1");
        std::fs::create_dir_all(&target).unwrap();
        fake.mount(&disk, &target, false).await.unwrap();
        assert_eq!(std::fs::read(target.join("hello")).unwrap(), b"hi");
        assert_eq!(fake.mounted_at(&target).as_deref(), Some("sdc"));

        fake.unmount_lazy(&target).await.unwrap();
        assert!(target.is_dir());
        assert!(!target.join("hello").exists());
        // Second unmount is a no-op
        fake.unmount_lazy(&target).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let dir = tempdir().unwrap();
        let fake = FakeDisks::new(dir.path());
        let disk = fake.add_disk("sdd", "SN-D").unwrap();
        fake.fail_formats("sdd").unwrap();
        fake.set_healthy("sdd", false).unwrap();

        assert!(fake.format(&disk).await.is_err());
        assert!(!fake.is_healthy(&disk).await.unwrap());
        assert_eq!(fake.format_count(), 0);
    }
}
