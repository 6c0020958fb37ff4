//! Write-ahead journal for an in-flight reconciliation.
//!
//! The journal is a `<doc>.reconcile` JSON sidecar. It is written before the
//! first artifact of a reconciliation and removed after its last step, so a
//! journal found at startup means the previous run stopped part-way.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::artifacts::Sidecar;
use crate::errors::{io_at, JournalError};
use crate::merge::MergeStatus;

/// How far a reconciliation got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPhase {
    /// Journal written; the live document has not been touched.
    Started,
    /// Local version saved; the live document is being replaced by the
    /// remote snapshot and merged.
    Staged,
    /// The merge returned; only cleanup is left.
    Finished,
}

impl std::fmt::Display for JournalPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Staged => write!(f, "staged"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub id: Uuid,
    pub document: PathBuf,
    pub identity: String,
    pub remote_snapshot: PathBuf,
    pub phase: JournalPhase,
    /// Merge status, set once the phase is `Finished`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MergeStatus>,
    /// Conflicting hunks counted by the merge, set with `status`.
    #[serde(default)]
    pub conflicts: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Journal {
    /// A fresh journal in the `Started` phase. Nothing is written yet.
    pub fn begin(document: &Path, identity: &str, remote_snapshot: &Path) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document: document.to_path_buf(),
            identity: identity.to_string(),
            remote_snapshot: remote_snapshot.to_path_buf(),
            phase: JournalPhase::Started,
            status: None,
            conflicts: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Location of this journal on disk.
    pub fn path(&self) -> PathBuf {
        Sidecar::Journal.path_for(&self.document)
    }

    pub fn load(path: &Path) -> Result<Self, JournalError> {
        let raw = std::fs::read_to_string(path)
            .map_err(io_at(path, |path, source| JournalError::Io { path, source }))?;
        serde_json::from_str(&raw).map_err(|e| JournalError::Corrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Persist the journal with a temp-file rename so a reader never sees a
    /// half-written file.
    pub fn save(&self) -> Result<(), JournalError> {
        let path = self.path();
        let wrap = |source: std::io::Error| JournalError::Io {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(self).map_err(|e| JournalError::Corrupt {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(wrap)?;
        tmp.write_all(&json).map_err(wrap)?;
        tmp.as_file().sync_all().map_err(wrap)?;
        tmp.persist(&path).map_err(|e| wrap(e.error))?;
        debug!(path = %self.document.display(), phase = %self.phase, "journal saved");
        Ok(())
    }

    /// Move to `phase` and persist.
    pub fn advance(&mut self, phase: JournalPhase) -> Result<(), JournalError> {
        self.phase = phase;
        self.updated_at = Utc::now();
        self.save()
    }

    /// Record the merge result and persist as `Finished`.
    pub fn finish(&mut self, status: MergeStatus, conflicts: usize) -> Result<(), JournalError> {
        self.status = Some(status);
        self.conflicts = conflicts;
        self.advance(JournalPhase::Finished)
    }

    /// Delete the journal file. Idempotent.
    pub fn remove(&self) {
        let path = self.path();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %self.document.display(), "journal removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove journal"),
        }
    }
}

/// All journal files under `roots`, sorted.
pub fn find_journals(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| WalkDir::new(root).follow_links(false))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry while looking for journals");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| Sidecar::Journal.document_of(path).is_some())
        .collect();
    found.sort();
    found.dedup();
    found
}
