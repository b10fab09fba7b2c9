//! Block-device operations the fingerprint manager depends on

use crate::common::Result;
use std::future::Future;
use std::path::{Path, PathBuf};

/// A whole block device
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Disk {
    /// Kernel name, e.g. `sdc`
    pub name: String,
    pub serial: Option<String>,
}

impl Disk {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            serial: None,
        }
    }

    pub fn dev_path(&self) -> PathBuf {
        PathBuf::from("/dev").join(&self.name)
    }
}

/// A mounted filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Kernel name of the backing disk
    pub disk: String,
    pub mountpoint: PathBuf,
}

/// Hardware seam for disk discovery, mounting, formatting and probing.
///
/// Every call is bounded by a timeout inside the implementation.
pub trait DiskBackend {
    /// Whole disks, excluding the one holding the root filesystem.
    fn list_disks(&self) -> impl Future<Output = Result<Vec<Disk>>>;

    fn mounts(&self) -> impl Future<Output = Result<Vec<MountEntry>>>;

    fn mount(&self, disk: &Disk, target: &Path, read_only: bool)
        -> impl Future<Output = Result<()>>;

    /// Detach `target` now; the kernel finishes cleanup when it is idle.
    fn unmount_lazy(&self, target: &Path) -> impl Future<Output = Result<()>>;

    /// Create a fresh filesystem. Destroys everything on the disk.
    fn format(&self, disk: &Disk) -> impl Future<Output = Result<()>>;

    fn is_healthy(&self, disk: &Disk) -> impl Future<Output = Result<bool>>;
}
