//! Disk identity and slot management
//!
//! Disks outlive machines, so a node's device layout and a copy of its
//! configuration are anchored on the disks themselves.

pub mod backend;
pub mod bundle;
pub mod fake;
pub mod fingerprint;
pub mod manager;
pub mod system;

pub use backend::{Disk, DiskBackend, MountEntry};
pub use bundle::{BundleSources, Manifest};
pub use fake::FakeDisks;
pub use fingerprint::DiskFingerprint;
pub use manager::{
    BumpOutcome, DeviceFingerprintManager, ProbedDisk, ReconcileReport, RecoveryOutcome,
    RemountOutcome, SlotLayout,
};
pub use system::SystemDisks;
