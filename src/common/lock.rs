//! Cooperative cross-process locks backed by lock files.
//!
//! A lock is held while its file exists. Acquisition creates the file with
//! `O_EXCL`, retrying a bounded number of times; a lock file older than the
//! configured stale age is assumed abandoned by a crashed holder and removed.
//! The returned [`LockGuard`] removes the file when dropped, so release
//! happens on every exit path including `?` and panics.

use crate::common::{Error, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Retry and staleness policy for an [`AdvisoryLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Attempts after the first one before giving up.
    pub retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Lock files older than this are broken. `None` never breaks a lock.
    pub stale_after: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retries: 10,
            retry_delay: Duration::from_millis(500),
            stale_after: Some(Duration::from_secs(900)),
        }
    }
}

impl LockOptions {
    /// Total time an acquisition may spend waiting.
    pub fn max_wait(&self) -> Duration {
        self.retry_delay * self.retries
    }
}

#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    path: PathBuf,
    options: LockOptions,
}

/// Proof of holding an [`AdvisoryLock`]; releases it on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

enum Attempt {
    Acquired(LockGuard),
    Busy,
}

impl AdvisoryLock {
    pub fn new(path: impl Into<PathBuf>, options: LockOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, blocking the current thread between attempts.
    pub fn acquire(&self) -> Result<LockGuard> {
        for attempt in 0..=self.options.retries {
            if let Attempt::Acquired(guard) = self.try_once()? {
                return Ok(guard);
            }
            if attempt < self.options.retries {
                std::thread::sleep(self.options.retry_delay);
            }
        }
        Err(self.timeout_error())
    }

    /// Acquire the lock without blocking the async runtime between attempts.
    pub async fn acquire_async(&self) -> Result<LockGuard> {
        for attempt in 0..=self.options.retries {
            if let Attempt::Acquired(guard) = self.try_once()? {
                return Ok(guard);
            }
            if attempt < self.options.retries {
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }
        Err(self.timeout_error())
    }

    /// Run `f` while holding the lock.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.acquire()?;
        f()
    }

    fn timeout_error(&self) -> Error {
        Error::LockTimeout {
            path: self.path.clone(),
            waited: self.options.max_wait(),
        }
    }

    fn try_once(&self) -> Result<Attempt> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match self.create() {
            Ok(guard) => Ok(Attempt::Acquired(guard)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !self.break_if_stale() {
                    return Ok(Attempt::Busy);
                }
                match self.create() {
                    Ok(guard) => Ok(Attempt::Acquired(guard)),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(Attempt::Busy),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self) -> std::io::Result<LockGuard> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let guard = LockGuard {
            path: self.path.clone(),
        };
        // Holder identity is informational only.
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            tracing::warn!(lock = %self.path.display(), "failed to record lock holder: {}", e);
        }
        Ok(guard)
    }

    fn break_if_stale(&self) -> bool {
        let Some(stale_after) = self.options.stale_after else {
            return false;
        };
        match file_age(&self.path) {
            Some(age) if age > stale_after => {
                tracing::warn!(
                    lock = %self.path.display(),
                    age_secs = age.as_secs(),
                    "breaking stale lock"
                );
                self.remove_if_still_stale(stale_after)
            }
            _ => false,
        }
    }

    /// Move the lock file aside and delete it only if the moved file is
    /// still stale. A fresh file means another process broke and retook
    /// the lock after our age check, so it is put back.
    fn remove_if_still_stale(&self, stale_after: Duration) -> bool {
        let aside = self.path.with_file_name(format!(
            ".{}.stale.{}.{}",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        ));
        if std::fs::rename(&self.path, &aside).is_err() {
            return false;
        }

        let still_stale = file_age(&aside).is_some_and(|age| age > stale_after);
        if !still_stale {
            // Restore unless the path was already retaken.
            if let Err(e) = std::fs::hard_link(&aside, &self.path) {
                tracing::warn!(lock = %self.path.display(), "could not restore live lock: {}", e);
            }
        }
        if let Err(e) = std::fs::remove_file(&aside) {
            tracing::warn!(lock = %aside.display(), "failed to remove broken lock: {}", e);
        }
        still_stale
    }
}

fn file_age(path: &Path) -> Option<Duration> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(lock = %self.path.display(), "failed to release lock: {}", e);
            }
        }
    }
}
