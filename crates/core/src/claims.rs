//! Advisory document claims via sidecar lock markers.
//!
//! A claim is a `<document>.lock` file holding the owner's identity as plain
//! text. There is no atomic check-and-create across participants: two
//! participants that both observe "no marker" inside the same sync window
//! will both write one and both believe they hold the claim. That divergence
//! is reconciled afterwards by the merge engine, not prevented here.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::artifacts::Sidecar;
use crate::errors::{io_at, ClaimError};

/// Owner recorded when a marker exists but is empty.
pub const UNKNOWN_OWNER: &str = "unknown";

/// Result of an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// The marker now carries our identity and the document is self-claimed.
    Claimed,
    /// Another participant's marker is already present.
    HeldByOther { owner: String },
}

/// Writes, removes and reads lock markers, and tracks which documents this
/// participant has claimed.
#[derive(Debug)]
pub struct LockManager {
    identity: String,
    self_claimed: BTreeSet<PathBuf>,
}

impl LockManager {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            self_claimed: BTreeSet::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_self_claimed(&self, document: &Path) -> bool {
        self.self_claimed.contains(document)
    }

    pub fn self_claimed(&self) -> &BTreeSet<PathBuf> {
        &self.self_claimed
    }

    /// Claim `document` if no other participant's marker is present.
    ///
    /// A marker that already carries our own identity (left behind by a
    /// previous run) is adopted rather than treated as foreign.
    pub fn acquire(&mut self, document: &Path) -> Result<Acquisition, ClaimError> {
        if self.identity.trim().is_empty() {
            return Err(ClaimError::EmptyIdentity);
        }
        if !document.exists() {
            return Err(ClaimError::DocumentMissing(document.display().to_string()));
        }

        let marker = Sidecar::Lock.path_for(document);
        match read_owner(&marker)? {
            Some(owner) if owner == self.identity => {
                info!(path = %document.display(), "adopting existing marker with our identity");
            }
            Some(owner) => {
                debug!(path = %document.display(), %owner, "document already claimed");
                return Ok(Acquisition::HeldByOther { owner });
            }
            None => {
                std::fs::write(&marker, &self.identity)
                    .map_err(io_at(&marker, |path, source| ClaimError::Io { path, source }))?;
                info!(path = %document.display(), identity = %self.identity, "claim acquired");
            }
        }

        self.self_claimed.insert(document.to_path_buf());
        Ok(Acquisition::Claimed)
    }

    /// Drop our claim on `document`. Idempotent.
    ///
    /// Returns `true` if a marker was removed. A marker that now carries a
    /// different identity (the other side of a claim race, propagated by the
    /// sync layer) is left in place.
    pub fn release(&mut self, document: &Path) -> Result<bool, ClaimError> {
        self.self_claimed.remove(document);

        let marker = Sidecar::Lock.path_for(document);
        match read_owner(&marker)? {
            None => {
                debug!(path = %document.display(), "no marker to remove");
                Ok(false)
            }
            Some(owner) if owner != self.identity => {
                warn!(
                    path = %document.display(),
                    %owner,
                    "marker now belongs to another participant, leaving it"
                );
                Ok(false)
            }
            Some(_) => match std::fs::remove_file(&marker) {
                Ok(()) => {
                    info!(path = %document.display(), "claim released");
                    Ok(true)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(source) => Err(ClaimError::Io {
                    path: marker,
                    source,
                }),
            },
        }
    }
}

/// Read the owner recorded in a marker, `None` if the marker is absent.
pub fn read_owner(marker: &Path) -> Result<Option<String>, ClaimError> {
    match std::fs::read(marker) {
        Ok(bytes) => {
            let owner = String::from_utf8_lossy(&bytes).trim().to_string();
            if owner.is_empty() {
                Ok(Some(UNKNOWN_OWNER.to_string()))
            } else {
                Ok(Some(owner))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ClaimError::Io {
            path: marker.to_path_buf(),
            source,
        }),
    }
}

/// Collect every live claim under `roots` as document → owner.
///
/// Markers whose document no longer exists are stale and skipped. Unreadable
/// entries are logged and skipped so one bad directory does not hide the rest.
pub fn scan_claims(roots: &[PathBuf]) -> BTreeMap<PathBuf, String> {
    let mut claims = BTreeMap::new();

    for root in roots {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(root = %root.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(document) = Sidecar::Lock.document_of(entry.path()) else {
                continue;
            };
            if !document.exists() {
                debug!(marker = %entry.path().display(), "ignoring stale marker");
                continue;
            }
            match read_owner(entry.path()) {
                Ok(Some(owner)) => {
                    claims.insert(document, owner);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to read marker"),
            }
        }
    }

    claims
}

/// A change in another participant's claims between two scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimChange {
    ClaimedByOther { document: PathBuf, owner: String },
    ReleasedByOther { document: PathBuf },
}

/// Compare two scans, ignoring documents we hold ourselves.
pub fn diff_scans(
    previous: &BTreeMap<PathBuf, String>,
    current: &BTreeMap<PathBuf, String>,
    mine: &BTreeSet<PathBuf>,
) -> Vec<ClaimChange> {
    let mut changes = Vec::new();

    for (document, owner) in current {
        if mine.contains(document) {
            continue;
        }
        if previous.get(document) != Some(owner) {
            changes.push(ClaimChange::ClaimedByOther {
                document: document.clone(),
                owner: owner.clone(),
            });
        }
    }
    for document in previous.keys() {
        if !current.contains_key(document) && !mine.contains(document) {
            changes.push(ClaimChange::ReleasedByOther {
                document: document.clone(),
            });
        }
    }

    changes
}
