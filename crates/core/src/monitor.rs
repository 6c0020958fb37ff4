//! Polling drift detection for self-claimed documents.
//!
//! While we hold a claim, the only way the document's bytes can change
//! without us knowing is another participant's edit arriving through the
//! sync layer. Each tick rehashes the document and compares it with the
//! last hash we recorded; a mismatch captures the new bytes as an external
//! snapshot and registers a pending merge for when the claim is released.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::artifacts::Sidecar;
use crate::errors::{io_at, MonitorError};
use crate::hashing::{ContentHash, HashAlgorithm};

/// Emitted when a claimed document changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftEvent {
    pub document: PathBuf,
    /// The `.remote_version` sidecar holding the captured bytes.
    pub snapshot: PathBuf,
    pub previous: ContentHash,
    pub current: ContentHash,
}

/// Drift records and pending merges for self-claimed documents.
#[derive(Debug)]
pub struct ChangeMonitor {
    algorithm: HashAlgorithm,
    last_hash: HashMap<PathBuf, ContentHash>,
    pending: HashMap<PathBuf, PathBuf>,
}

impl ChangeMonitor {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            last_hash: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Start tracking `document` from a known hash (normally the baseline's).
    pub fn track(&mut self, document: &Path, hash: ContentHash) {
        self.last_hash.insert(document.to_path_buf(), hash);
    }

    /// Stop tracking `document`: drop its drift record and any pending merge.
    pub fn forget(&mut self, document: &Path) {
        self.last_hash.remove(document);
        self.pending.remove(document);
    }

    pub fn last_hash(&self, document: &Path) -> Option<&ContentHash> {
        self.last_hash.get(document)
    }

    pub fn pending_merge(&self, document: &Path) -> Option<&Path> {
        self.pending.get(document).map(PathBuf::as_path)
    }

    /// Re-register a pending merge whose snapshot survived a restart.
    pub fn restore_pending(&mut self, document: &Path, snapshot: PathBuf) {
        self.pending.insert(document.to_path_buf(), snapshot);
    }

    /// Remove and return the pending merge for `document`.
    pub fn take_pending(&mut self, document: &Path) -> Option<PathBuf> {
        self.pending.remove(document)
    }

    /// Documents with a pending merge, sorted.
    pub fn pending_documents(&self) -> Vec<PathBuf> {
        let mut docs: Vec<PathBuf> = self.pending.keys().cloned().collect();
        docs.sort();
        docs
    }

    /// Rehash `document` and record drift if it changed.
    ///
    /// An unreadable document (mid-sync, just deleted) is skipped for this
    /// tick. If the snapshot cannot be written the stored hash is left
    /// unchanged so the same drift is retried next tick.
    pub fn check(&mut self, document: &Path) -> Result<Option<DriftEvent>, MonitorError> {
        let Some(previous) = self.last_hash.get(document).cloned() else {
            return Ok(None);
        };

        let bytes = match std::fs::read(document) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %document.display(), error = %e, "document unreadable, skipping drift check");
                return Ok(None);
            }
        };
        let current = self.algorithm.digest(&bytes);
        if current == previous {
            return Ok(None);
        }

        let snapshot = Sidecar::RemoteVersion.path_for(document);
        std::fs::write(&snapshot, &bytes)
            .map_err(io_at(&snapshot, |path, source| MonitorError::Snapshot { path, source }))?;

        self.pending
            .insert(document.to_path_buf(), snapshot.clone());
        self.last_hash
            .insert(document.to_path_buf(), current.clone());

        info!(
            path = %document.display(),
            from = %previous.short(),
            to = %current.short(),
            "external change detected on claimed document"
        );

        Ok(Some(DriftEvent {
            document: document.to_path_buf(),
            snapshot,
            previous,
            current,
        }))
    }
}
