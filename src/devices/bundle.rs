//! Disaster-recovery bundle stored next to the fingerprint
//!
//! Layout under a disk root:
//!
//! ```text
//! bundle/
//!   MANIFEST.json      version + BLAKE3 digest of every file below
//!   metadata/...       ring and cluster configuration (secrets excluded)
//!   scripts/...        control scripts
//! ```
//!
//! A bundle whose manifest does not match its files is treated as absent.

use crate::common::utils::{clear_dir, copy_tree, exclude_patterns, is_excluded};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const BUNDLE_DIR: &str = "bundle";
pub const MANIFEST_FILE: &str = "MANIFEST.json";
const METADATA_SUBDIR: &str = "metadata";
const SCRIPTS_SUBDIR: &str = "scripts";

/// Where bundle contents come from and go back to
#[derive(Debug, Clone)]
pub struct BundleSources {
    pub metadata_dir: PathBuf,
    pub scripts_dir: PathBuf,
    /// Top-level metadata entries left out of the bundle
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub config_version: u64,
    /// Relative path → hex BLAKE3 digest
    pub files: BTreeMap<String, String>,
}

pub fn bundle_path(root: &Path) -> PathBuf {
    root.join(BUNDLE_DIR)
}

/// Write a fresh bundle under `root`, replacing any previous one.
pub fn write_bundle(sources: &BundleSources, config_version: u64, root: &Path) -> Result<Manifest> {
    let staging = root.join(".bundle.tmp");
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }

    if sources.metadata_dir.is_dir() {
        copy_tree(&sources.metadata_dir, &staging.join(METADATA_SUBDIR), &sources.exclude)?;
    }
    if sources.scripts_dir.is_dir() {
        copy_tree(&sources.scripts_dir, &staging.join(SCRIPTS_SUBDIR), &[])?;
    }
    std::fs::create_dir_all(&staging)?;

    let manifest = Manifest {
        config_version,
        files: digest_tree(&staging)?,
    };
    std::fs::write(
        staging.join(MANIFEST_FILE),
        serde_json::to_vec_pretty(&manifest)?,
    )?;

    let target = bundle_path(root);
    if target.exists() {
        std::fs::remove_dir_all(&target)?;
    }
    std::fs::rename(&staging, &target)?;
    Ok(manifest)
}

/// Check every digest in the manifest under `root`.
pub fn verify_bundle(root: &Path) -> Result<Manifest> {
    let dir = bundle_path(root);
    let raw = std::fs::read(dir.join(MANIFEST_FILE))
        .map_err(|e| Error::Corrupted(format!("{}: no manifest: {}", dir.display(), e)))?;
    let manifest: Manifest = serde_json::from_slice(&raw)
        .map_err(|e| Error::Corrupted(format!("{}: bad manifest: {}", dir.display(), e)))?;

    let actual = digest_tree(&dir)?;
    if actual != manifest.files {
        return Err(Error::Corrupted(format!(
            "{}: contents do not match manifest",
            dir.display()
        )));
    }
    Ok(manifest)
}

/// Verify the bundle under `root` and copy it back into `sources`.
///
/// Local files that were excluded from the bundle are kept.
pub fn load_bundle(root: &Path, sources: &BundleSources) -> Result<Manifest> {
    let manifest = verify_bundle(root)?;
    let dir = bundle_path(root);

    let metadata = dir.join(METADATA_SUBDIR);
    if metadata.is_dir() {
        replace_keeping(&sources.metadata_dir, &sources.exclude)?;
        copy_tree(&metadata, &sources.metadata_dir, &[])?;
    }
    let scripts = dir.join(SCRIPTS_SUBDIR);
    if scripts.is_dir() {
        clear_dir(&sources.scripts_dir)?;
        copy_tree(&scripts, &sources.scripts_dir, &[])?;
    }

    tracing::info!(
        bundle = %dir.display(),
        version = manifest.config_version,
        files = manifest.files.len(),
        "bundle loaded"
    );
    Ok(manifest)
}

/// Remove the bundle under `root`, if any.
pub fn clear_bundle(root: &Path) -> Result<()> {
    let dir = bundle_path(root);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Empty `dir` except for top-level entries matching `keep`.
pub(crate) fn replace_keeping(dir: &Path, keep: &[String]) -> Result<()> {
    let keep = exclude_patterns(keep)?;
    std::fs::create_dir_all(dir)?;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if is_excluded(&keep, &name) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn digest_tree(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Other(e.to_string()))?
            .to_string_lossy()
            .to_string();
        if rel == MANIFEST_FILE {
            continue;
        }
        let bytes = std::fs::read(entry.path())?;
        files.insert(rel, blake3::hash(&bytes).to_hex().to_string());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sources(base: &Path) -> BundleSources {
        let metadata_dir = base.join("ring");
        let scripts_dir = base.join("scripts");
        std::fs::create_dir_all(&metadata_dir).unwrap();
        std::fs::create_dir_all(&scripts_dir).unwrap();
        std::fs::write(metadata_dir.join("object.ring.gz"), b"ring-v1").unwrap();
        std::fs::write(metadata_dir.join("cert.pem"), b"secret").unwrap();
        std::fs::write(scripts_dir.join("start.sh"), b"#!/bin/sh\n").unwrap();
        BundleSources {
            metadata_dir,
            scripts_dir,
            exclude: vec!["cert*".into()],
        }
    }

    #[test]
    fn test_write_verify_load() {
        let base = tempdir().unwrap();
        let disk = tempdir().unwrap();
        let src = sources(base.path());

        let manifest = write_bundle(&src, 4, disk.path()).unwrap();
        assert_eq!(manifest.files.len(), 2);
        assert!(!disk.path().join("bundle/metadata/cert.pem").exists());
        assert_eq!(verify_bundle(disk.path()).unwrap().config_version, 4);

        // Lose local state except the secret, then restore
        std::fs::remove_file(src.metadata_dir.join("object.ring.gz")).unwrap();
        std::fs::write(src.metadata_dir.join("stale.ring.gz"), b"old").unwrap();
        load_bundle(disk.path(), &src).unwrap();

        assert_eq!(
            std::fs::read(src.metadata_dir.join("object.ring.gz")).unwrap(),
            b"ring-v1"
        );
        assert!(src.metadata_dir.join("cert.pem").exists());
        assert!(!src.metadata_dir.join("stale.ring.gz").exists());
    }

    #[test]
    fn test_tampered_bundle_fails_verification() {
        let base = tempdir().unwrap();
        let disk = tempdir().unwrap();
        write_bundle(&sources(base.path()), 1, disk.path()).unwrap();

        std::fs::write(disk.path().join("bundle/metadata/object.ring.gz"), b"evil").unwrap();
        assert!(matches!(verify_bundle(disk.path()), Err(Error::Corrupted(_))));

        clear_bundle(disk.path()).unwrap();
        assert!(verify_bundle(disk.path()).is_err());
    }

    #[test]
    fn test_rewrite_replaces_previous_bundle() {
        let base = tempdir().unwrap();
        let disk = tempdir().unwrap();
        let src = sources(base.path());
        write_bundle(&src, 1, disk.path()).unwrap();

        std::fs::remove_file(src.scripts_dir.join("start.sh")).unwrap();
        let manifest = write_bundle(&src, 2, disk.path()).unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert!(!disk.path().join("bundle/scripts/start.sh").exists());
        assert_eq!(verify_bundle(disk.path()).unwrap().config_version, 2);
    }

    #[test]
    fn test_load_keeps_local_files_matching_class_patterns() {
        let base = tempdir().unwrap();
        let disk = tempdir().unwrap();
        let mut src = sources(base.path());
        src.exclude = vec!["cert*".into(), "key[0-9].pem".into()];
        std::fs::write(src.metadata_dir.join("key1.pem"), b"local-key").unwrap();

        let manifest = write_bundle(&src, 3, disk.path()).unwrap();
        assert!(!manifest.files.keys().any(|f| f.ends_with("key1.pem")));

        load_bundle(disk.path(), &src).unwrap();
        assert_eq!(std::fs::read(src.metadata_dir.join("key1.pem")).unwrap(), b"local-key");
    }
}
