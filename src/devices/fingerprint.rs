//! On-disk identity record
//!
//! Every managed disk carries `fingerprint.json` at the root of its
//! filesystem, naming the host that wrote it, the cluster configuration
//! version, and the device slot the disk backs. An unreadable or malformed
//! record is treated as absent.

use crate::common::utils::write_atomic;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FINGERPRINT_FILE: &str = "fingerprint.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskFingerprint {
    pub hostname: String,
    pub config_version: u64,
    pub device_count: u32,
    pub device_prefix: String,
    /// 1-based
    pub device_slot: u32,
}

impl DiskFingerprint {
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() || self.device_prefix.is_empty() {
            return Err(Error::Corrupted("fingerprint without hostname or prefix".into()));
        }
        if self.device_slot == 0 || self.device_slot > self.device_count {
            return Err(Error::Corrupted(format!(
                "slot {} outside 1..={}",
                self.device_slot, self.device_count
            )));
        }
        Ok(())
    }

    /// Slot name, e.g. `sdb3`
    pub fn device_name(&self) -> String {
        format!("{}{}", self.device_prefix, self.device_slot)
    }

    /// Read the record under `root`; `None` if missing or unreadable.
    pub fn read_from(root: &Path) -> Option<Self> {
        let path = root.join(FINGERPRINT_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), "unreadable fingerprint: {}", e);
                return None;
            }
        };
        let parsed = serde_json::from_slice::<DiskFingerprint>(&bytes)
            .map_err(Error::from)
            .and_then(|fp| fp.validate().map(|_| fp));
        match parsed {
            Ok(fp) => Some(fp),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring corrupt fingerprint: {}", e);
                None
            }
        }
    }

    pub fn write_to(&self, root: &Path) -> Result<()> {
        self.validate()?;
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(&root.join(FINGERPRINT_FILE), &bytes)
    }

    /// Remove the record under `root`, if any.
    pub fn clear(root: &Path) -> Result<()> {
        match std::fs::remove_file(root.join(FINGERPRINT_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
