//! Manual resolution of conflicted reconciliations.
//!
//! A conflicted merge leaves the live document as the staged remote copy and
//! keeps both sides in `.remote_backup` / `.local_backup`. These helpers find
//! such documents, show the difference between the two sides and settle a
//! conflict by keeping one of them. Settling also clears the reconciliation
//! snapshots so a later claim never replays them.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::artifacts::Sidecar;
use crate::errors::{io_at, MergeError};
use crate::merge::document::replace_contents;

/// A document waiting for a person to pick a side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    pub document: PathBuf,
    pub remote_backup: PathBuf,
    pub local_backup: PathBuf,
    /// When the backups were written, if the filesystem reports it.
    pub detected_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    /// Record for `document` if both backups exist.
    pub fn for_document(document: &Path) -> Option<Self> {
        let remote_backup = Sidecar::RemoteBackup.path_for(document);
        let local_backup = Sidecar::LocalBackup.path_for(document);
        if !remote_backup.is_file() || !local_backup.is_file() {
            return None;
        }
        let detected_at = std::fs::metadata(&remote_backup)
            .and_then(|m| m.modified())
            .ok()
            .map(|t: SystemTime| DateTime::<Utc>::from(t));
        Some(Self {
            document: document.to_path_buf(),
            remote_backup,
            local_backup,
            detected_at,
        })
    }

    /// Unified diff from the local side to the remote side.
    pub fn diff(&self) -> Result<String, MergeError> {
        let local = read_lossy(&self.local_backup)?;
        let remote = read_lossy(&self.remote_backup)?;
        Ok(diffy::create_patch(&local, &remote).to_string())
    }
}

/// Which backup wins a manual resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" | "mine" => Ok(Self::Local),
            "remote" | "theirs" => Ok(Self::Remote),
            other => Err(format!(
                "invalid resolution '{}': use 'local' or 'remote'",
                other
            )),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Every conflicted document under `roots`, sorted by path.
pub fn find_conflicts(roots: &[PathBuf]) -> Vec<ConflictRecord> {
    let mut documents: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| WalkDir::new(root).follow_links(false))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry while looking for conflicts");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| Sidecar::RemoteBackup.document_of(entry.path()))
        .collect();
    documents.sort();
    documents.dedup();
    documents
        .iter()
        .filter_map(|doc| ConflictRecord::for_document(doc))
        .collect()
}

/// Copy the chosen backup over the document, then remove both backups and
/// the `.remote_version` / `.local_version` snapshots.
pub fn resolve_conflict(record: &ConflictRecord, side: Side) -> Result<(), MergeError> {
    let chosen = match side {
        Side::Local => &record.local_backup,
        Side::Remote => &record.remote_backup,
    };
    let bytes = std::fs::read(chosen)
        .map_err(io_at(chosen, |path, source| MergeError::Io { path, source }))?;

    if record.document.exists() {
        replace_contents(&record.document, &bytes)?;
    } else {
        std::fs::write(&record.document, &bytes).map_err(io_at(&record.document, |path, source| {
            MergeError::Io { path, source }
        }))?;
    }

    let leftovers = [
        record.remote_backup.clone(),
        record.local_backup.clone(),
        Sidecar::RemoteVersion.path_for(&record.document),
        Sidecar::LocalVersion.path_for(&record.document),
    ];
    for leftover in leftovers {
        match std::fs::remove_file(&leftover) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(MergeError::Io {
                    path: leftover,
                    source,
                })
            }
        }
    }

    info!(path = %record.document.display(), accepted = %side, "conflict resolved");
    Ok(())
}

fn read_lossy(path: &Path) -> Result<String, MergeError> {
    let bytes =
        std::fs::read(path).map_err(io_at(path, |path, source| MergeError::Io { path, source }))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
