//! Error types for ringwarden

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::common::exec::ExecutionError;

pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for a clean run.
pub const EXIT_OK: u8 = 0;
/// Exit code for an unexpected failure.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code for malformed invocations, configs or reports (EX_USAGE).
pub const EXIT_USAGE: u8 = 64;
/// Exit code when a lock could not be taken (EX_TEMPFAIL).
pub const EXIT_LOCKED: u8 = 75;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Store Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // === Locking ===
    #[error("Timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("A conflicting task is in progress: {0}")]
    Conflict(String),

    // === Data Errors ===
    #[error("Invalid report: {0}")]
    InvalidReport(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Devices & Commands ===
    #[error(transparent)]
    Command(#[from] ExecutionError),

    #[error("No usable disks: {0}")]
    NoDisks(String),

    // === Network Errors ===
    #[error("Transport to {peer} failed: {reason}")]
    Transport { peer: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LockTimeout { .. }
                | Error::Timeout(_)
                | Error::Transport { .. }
                | Error::Http(_)
                | Error::Command(ExecutionError::Timeout { .. })
        )
    }

    /// Process exit code shared by every binary
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::LockTimeout { .. } | Error::Conflict(_) => EXIT_LOCKED,
            Error::InvalidConfig(_) | Error::Config(_) | Error::InvalidReport(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidReport(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Exit code for an error that reached a binary's `main`.
pub fn exit_code_of(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map_or(EXIT_FAILURE, Error::exit_code)
}

/// Print a command-line parse failure and map it to an exit code.
///
/// `--help` and `--version` land here too and exit cleanly.
pub fn usage_exit(err: clap::Error) -> std::process::ExitCode {
    let _ = err.print();
    let code = if err.use_stderr() { EXIT_USAGE } else { EXIT_OK };
    std::process::ExitCode::from(code)
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        Error::Io(e.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
