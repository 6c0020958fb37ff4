//! Claim-time snapshots used as the common ancestor for merges.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::artifacts::Sidecar;
use crate::errors::{io_at, BaselineError};
use crate::hashing::{ContentHash, HashAlgorithm};

/// A baseline snapshot of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    /// The `.baseline` sidecar holding the snapshot bytes.
    pub snapshot: PathBuf,
    /// Hash of the document at snapshot time.
    pub hash: ContentHash,
    pub taken_at: DateTime<Utc>,
}

/// Creates and removes baselines and remembers the ones it made.
#[derive(Debug)]
pub struct BaselineTracker {
    algorithm: HashAlgorithm,
    baselines: HashMap<PathBuf, Baseline>,
}

impl BaselineTracker {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            baselines: HashMap::new(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn get(&self, document: &Path) -> Option<&Baseline> {
        self.baselines.get(document)
    }

    /// Snapshot the current bytes of `document`.
    ///
    /// On failure nothing is recorded; callers carry on without a baseline
    /// and any later merge for the document reports `NoBaseline`.
    pub fn create(&mut self, document: &Path) -> Result<&Baseline, BaselineError> {
        let snapshot = Sidecar::Baseline.path_for(document);
        let bytes = std::fs::read(document)
            .map_err(io_at(document, |path, source| BaselineError::Io { path, source }))?;
        std::fs::write(&snapshot, &bytes)
            .map_err(io_at(&snapshot, |path, source| BaselineError::Io { path, source }))?;

        let hash = self.algorithm.digest(&bytes);
        info!(path = %document.display(), hash = %hash.short(), "baseline created");

        let baseline = Baseline {
            snapshot,
            hash,
            taken_at: Utc::now(),
        };
        self.baselines.insert(document.to_path_buf(), baseline);
        Ok(&self.baselines[document])
    }

    /// Take over a baseline sidecar left by a previous run.
    ///
    /// Returns `None` when there is no sidecar to adopt.
    pub fn adopt(&mut self, document: &Path) -> Result<Option<&Baseline>, BaselineError> {
        let snapshot = Sidecar::Baseline.path_for(document);
        let bytes = match std::fs::read(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(BaselineError::Io {
                    path: snapshot,
                    source,
                })
            }
        };

        let hash = self.algorithm.digest(&bytes);
        let taken_at = std::fs::metadata(&snapshot)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        info!(path = %document.display(), hash = %hash.short(), "adopted existing baseline");

        self.baselines.insert(
            document.to_path_buf(),
            Baseline {
                snapshot,
                hash,
                taken_at,
            },
        );
        Ok(self.baselines.get(document))
    }

    /// Delete the baseline sidecar and forget the stored hash. Idempotent.
    pub fn remove(&mut self, document: &Path) {
        self.baselines.remove(document);
        let snapshot = Sidecar::Baseline.path_for(document);
        match std::fs::remove_file(&snapshot) {
            Ok(()) => debug!(path = %document.display(), "baseline removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %snapshot.display(), error = %e, "failed to remove baseline"),
        }
    }

    /// `true` if we recorded a baseline and its sidecar is still on disk.
    pub fn has_snapshot(&self, document: &Path) -> bool {
        self.baselines
            .get(document)
            .map(|b| b.snapshot.exists())
            .unwrap_or(false)
    }
}
