//! Error types for the sidelock core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type. None of these ever escape a coordinator tick: the
//! coordinator converts them into events and merge outcomes at the
//! operation boundary.

use std::path::{Path, PathBuf};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Baseline(#[from] BaselineError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    WatchList(#[from] WatchListError),
}

// ---------------------------------------------------------------------------
// Claim errors
// ---------------------------------------------------------------------------

/// Errors from the lock-marker subsystem.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// The document to claim does not exist on disk.
    #[error("cannot claim '{0}': document does not exist")]
    DocumentMissing(String),

    /// The participant identity is empty.
    #[error("cannot claim with an empty participant identity")]
    EmptyIdentity,

    /// Reading, writing or removing a marker failed.
    #[error("lock marker I/O error at '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Baseline errors
// ---------------------------------------------------------------------------

/// Errors from baseline snapshotting.
#[derive(Debug, Error)]
pub enum BaselineError {
    /// Copying or hashing the document failed.
    #[error("baseline I/O error at '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Monitor errors
// ---------------------------------------------------------------------------

/// Errors from drift detection.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The external snapshot could not be written.
    #[error("could not capture external snapshot at '{}': {}", .path.display(), .source)]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the file-level merge step.
#[derive(Debug, Error)]
pub enum MergeError {
    /// No baseline snapshot exists for the document.
    #[error("no baseline found for '{0}'")]
    NoBaseline(String),

    /// A read, copy or write step failed.
    #[error("merge I/O error at '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Journal errors
// ---------------------------------------------------------------------------

/// Errors from the reconciliation journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error at '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The journal file exists but is not valid JSON.
    #[error("journal at '{}' is corrupt: {}", .path.display(), .detail)]
    Corrupt { path: PathBuf, detail: String },
}

// ---------------------------------------------------------------------------
// Activity errors
// ---------------------------------------------------------------------------

/// Errors from activity detectors.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("activity source '{}' unreadable: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The detector is not available on this platform.
    #[error("activity detector '{0}' is not supported on this platform")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Watch list errors
// ---------------------------------------------------------------------------

/// Errors from the persisted watch list.
#[derive(Debug, Error)]
pub enum WatchListError {
    #[error("watch list I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("watch list parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a closure that wraps an `io::Error` with the path it concerns.
///
/// Used as `fs::copy(a, b).map_err(io_at(b, |path, source| MergeError::Io { path, source }))`.
pub(crate) fn io_at<E>(
    path: &Path,
    wrap: impl FnOnce(PathBuf, std::io::Error) -> E,
) -> impl FnOnce(std::io::Error) -> E {
    let path = path.to_path_buf();
    move |source| wrap(path, source)
}
