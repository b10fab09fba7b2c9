//! Local ring/config metadata directory
//!
//! The cluster configuration version lives in a `config_version` file at
//! the top of the directory. A staged bundle has the same shape as a disk
//! bundle: `metadata/` and `scripts/` side by side.

use crate::common::utils::{clear_dir, copy_tree, write_atomic};
use crate::common::{Result, SyncConfig};
use std::path::{Path, PathBuf};

pub const VERSION_FILE: &str = "config_version";
pub const FLEET_FILE: &str = "fleet";
pub const STAGED_METADATA: &str = "metadata";
pub const STAGED_SCRIPTS: &str = "scripts";

#[derive(Debug, Clone)]
pub struct MetadataDir {
    dir: PathBuf,
}

impl MetadataDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The metadata half of a staged bundle.
    pub fn staged(root: &Path) -> Self {
        Self::new(root.join(STAGED_METADATA))
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Configuration version; `None` when unset or unreadable.
    pub fn version(&self) -> Option<u64> {
        let path = self.dir.join(VERSION_FILE);
        let raw = std::fs::read_to_string(&path).ok()?;
        match raw.trim().parse() {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!(path = %path.display(), "unreadable config version: {}", e);
                None
            }
        }
    }

    pub fn set_version(&self, version: u64) -> Result<()> {
        write_atomic(&self.dir.join(VERSION_FILE), format!("{}\n", version).as_bytes())
    }

    /// Fleet addresses from the `fleet` file, one per line, `#` comments.
    pub fn fleet(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.join(FLEET_FILE))
            .map(|text| {
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy a filtered view of this directory plus `scripts_dir` into `staging`.
    pub fn stage(&self, scripts_dir: &Path, staging: &Path, exclude: &[String]) -> Result<u64> {
        clear_dir(staging)?;
        let mut copied = copy_tree(&self.dir, &staging.join(STAGED_METADATA), exclude)?;
        if scripts_dir.is_dir() {
            copied += copy_tree(scripts_dir, &staging.join(STAGED_SCRIPTS), &[])?;
        }
        Ok(copied)
    }
}

/// Peers from config, else the fleet file in the metadata directory.
pub fn resolve_peers(config: &SyncConfig) -> Vec<String> {
    if !config.peers.is_empty() {
        return config.peers.clone();
    }
    MetadataDir::new(&config.metadata_dir).fleet()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_version_round_trip_and_garbage() {
        let dir = tempdir().unwrap();
        let meta = MetadataDir::new(dir.path());
        assert_eq!(meta.version(), None);

        meta.set_version(12).unwrap();
        assert_eq!(meta.version(), Some(12));

        std::fs::write(dir.path().join(VERSION_FILE), "twelve").unwrap();
        assert_eq!(meta.version(), None);
    }

    #[test]
    fn test_stage_filters_secrets() {
        let dir = tempdir().unwrap();
        let meta_dir = dir.path().join("ring");
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&meta_dir).unwrap();
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(meta_dir.join("object.ring.gz"), b"r").unwrap();
        std::fs::write(meta_dir.join("cert.key"), b"k").unwrap();
        std::fs::write(meta_dir.join("proxy-server.conf"), b"c").unwrap();
        std::fs::write(scripts.join("run.sh"), b"s").unwrap();

        let meta = MetadataDir::new(&meta_dir);
        meta.set_version(3).unwrap();
        let staging = dir.path().join("staging");
        let exclude = vec!["cert*".to_string(), "backups".to_string(), "*.conf".to_string()];
        let copied = meta.stage(&scripts, &staging, &exclude).unwrap();

        assert_eq!(copied, 3);
        assert_eq!(MetadataDir::staged(&staging).version(), Some(3));
        assert!(!staging.join("metadata/cert.key").exists());
        assert!(staging.join("scripts/run.sh").exists());
    }

    #[test]
    fn test_peer_resolution() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(FLEET_FILE),
            "# storage fleet\n10.0.0.1\n\n10.0.0.2\n",
        )
        .unwrap();
        let mut config = SyncConfig {
            metadata_dir: dir.path().to_path_buf(),
            ..SyncConfig::default()
        };
        assert_eq!(resolve_peers(&config), vec!["10.0.0.1", "10.0.0.2"]);

        config.peers = vec!["10.9.9.9".into()];
        assert_eq!(resolve_peers(&config), vec!["10.9.9.9"]);
    }
}
