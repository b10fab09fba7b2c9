//! Utility functions for ringwarden

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Hostname of this machine as the kernel reports it.
pub fn local_hostname() -> crate::Result<String> {
    if let Ok(name) = std::env::var("RINGWARDEN_HOSTNAME") {
        if !name.trim().is_empty() {
            return Ok(name.trim().to_string());
        }
    }
    let name = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| std::fs::read_to_string("/etc/hostname"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(crate::Error::InvalidConfig("hostname is empty".into()));
    }
    Ok(name.to_string())
}

/// Compile exclude globs once. A malformed pattern is a config error.
pub fn exclude_patterns(exclude: &[String]) -> crate::Result<Vec<glob::Pattern>> {
    exclude
        .iter()
        .map(|pat| {
            glob::Pattern::new(pat).map_err(|e| {
                crate::Error::InvalidConfig(format!("bad exclude pattern {:?}: {}", pat, e))
            })
        })
        .collect()
}

pub fn is_excluded(patterns: &[glob::Pattern], name: &str) -> bool {
    patterns.iter().any(|pat| pat.matches(name))
}

/// Recursively copy `src` into `dst`, skipping top-level entries whose
/// file name matches one of `exclude`.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[String]) -> crate::Result<u64> {
    let patterns = exclude_patterns(exclude)?;
    std::fs::create_dir_all(dst)?;
    let mut copied = 0;

    let walker = walkdir::WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() != 1 || !is_excluded(&patterns, &entry.file_name().to_string_lossy())
        });

    for entry in walker {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| crate::Error::Other(e.to_string()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Remove everything inside `dir`, keeping the directory itself.
pub fn clear_dir(dir: &Path) -> crate::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Write `contents` to `path` through a temp file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> crate::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| crate::Error::Other(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
