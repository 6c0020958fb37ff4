//! Reconciliation run when a drifted document's claim is released.
//!
//! The live document holds the local edits and `.remote_version` holds the
//! bytes another participant synced in while we held the claim. Staging
//! swaps them (local edits saved to `.local_version`, remote bytes copied
//! over the live document) and the merge then folds the local edits back
//! in against the baseline. Each step is recorded in a [`Journal`] so an
//! interrupted run can be resumed with [`resume`].
//!
//! Baseline removal and the in-memory drift state belong to the caller.

pub mod journal;
pub mod manual;

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifacts::{display_name, Sidecar};
use crate::errors::{io_at, CoreError, MergeError};
use crate::merge::{merge_document, MergeOutcome, MergeStatus};

pub use journal::{find_journals, Journal, JournalPhase};
pub use manual::{find_conflicts, resolve_conflict, ConflictRecord, Side};

/// Where a document is in the claim/reconcile lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Self-claimed with no pending merge.
    Editing,
    /// Self-claimed and an external change is waiting to be merged.
    DriftDetected,
    Reconciling,
    Merged,
    Conflicted,
    MergeFailed,
    /// Claim and baseline are gone.
    Idle,
}

impl WorkflowState {
    /// State of a document we currently hold.
    pub fn claimed(pending_merge: bool) -> Self {
        if pending_merge {
            Self::DriftDetected
        } else {
            Self::Editing
        }
    }

    /// Terminal state reached for a merge status.
    pub fn from_status(status: MergeStatus) -> Self {
        match status {
            MergeStatus::Success => Self::Merged,
            MergeStatus::Conflict => Self::Conflicted,
            MergeStatus::Error => Self::MergeFailed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Conflicted | Self::MergeFailed)
    }
}

/// Result of one reconciliation (fresh or resumed).
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub document: PathBuf,
    pub outcome: MergeOutcome,
    pub state: WorkflowState,
    /// `true` if this came from [`resume`] rather than a live release.
    pub recovered: bool,
}

impl ReconcileReport {
    fn new(document: &Path, outcome: MergeOutcome, recovered: bool) -> Self {
        Self {
            document: document.to_path_buf(),
            state: WorkflowState::from_status(outcome.status),
            outcome,
            recovered,
        }
    }
}

/// Merge the external snapshot at `remote_snapshot` into `document`.
///
/// Never fails: staging errors become an error outcome with whatever
/// artifacts already exist left in place.
pub fn reconcile(document: &Path, remote_snapshot: &Path, identity: &str) -> ReconcileReport {
    info!(path = %document.display(), "reconciling external changes");
    let mut journal = Journal::begin(document, identity, remote_snapshot);
    let outcome = match stage_and_merge(&mut journal) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(path = %document.display(), error = %e, "reconciliation failed before merge");
            MergeOutcome::error(format!("Merge error: {e}"))
        }
    };
    settle(&mut journal, &outcome);
    ReconcileReport::new(document, outcome, false)
}

/// Resume the reconciliation recorded in the journal at `journal_path`.
///
/// Returns `None` for a journal written by another participant; those are
/// left for their owner. Missing artifacts abort the resume: the journal is
/// dropped and the remaining artifacts are kept for manual resolution.
pub fn resume(journal_path: &Path, identity: &str) -> Option<ReconcileReport> {
    let mut journal = match Journal::load(journal_path) {
        Ok(journal) => journal,
        Err(e) => {
            let document = Sidecar::Journal
                .document_of(journal_path)
                .unwrap_or_else(|| journal_path.to_path_buf());
            warn!(path = %journal_path.display(), error = %e, "discarding unreadable journal");
            if let Err(e) = std::fs::remove_file(journal_path) {
                warn!(path = %journal_path.display(), error = %e, "failed to remove journal");
            }
            return Some(ReconcileReport::new(
                &document,
                MergeOutcome::error(format!("Recovery aborted: {e}")),
                true,
            ));
        }
    };

    if journal.identity != identity {
        debug!(path = %journal.document.display(), owner = %journal.identity, "journal belongs to another participant");
        return None;
    }

    let document = journal.document.clone();
    info!(path = %document.display(), phase = %journal.phase, "resuming interrupted reconciliation");

    let outcome = match journal.phase {
        JournalPhase::Finished => {
            let status = journal.status.unwrap_or(MergeStatus::Error);
            let artifacts = match status {
                MergeStatus::Conflict => [Sidecar::RemoteBackup, Sidecar::LocalBackup]
                    .iter()
                    .map(|kind| kind.path_for(&document))
                    .filter(|p| p.exists())
                    .collect(),
                _ => Vec::new(),
            };
            MergeOutcome {
                status,
                message: format!("Completed interrupted reconciliation ({status})"),
                artifacts,
                conflicts: journal.conflicts,
            }
        }
        phase => {
            let missing = missing_artifacts(&journal, phase);
            if !missing.is_empty() {
                warn!(path = %document.display(), missing = %missing.join(", "), "cannot resume reconciliation");
                journal.remove();
                return Some(ReconcileReport::new(
                    &document,
                    MergeOutcome::error(format!(
                        "Recovery aborted, missing: {}",
                        missing.join(", ")
                    )),
                    true,
                ));
            }
            match stage_and_merge(&mut journal) {
                Ok(outcome) => outcome,
                Err(e) => MergeOutcome::error(format!("Merge error: {e}")),
            }
        }
    };

    settle(&mut journal, &outcome);
    Some(ReconcileReport::new(&document, outcome, true))
}

/// Run the remaining steps from the journal's phase up to the merge.
fn stage_and_merge(journal: &mut Journal) -> Result<MergeOutcome, CoreError> {
    let document = journal.document.clone();
    let local_version = Sidecar::LocalVersion.path_for(&document);

    if journal.phase == JournalPhase::Started {
        if !journal.remote_snapshot.exists() {
            return Err(missing(&journal.remote_snapshot).into());
        }
        journal.save()?;
        copy(&document, &local_version)?;
        journal.advance(JournalPhase::Staged)?;
    }

    // Copying the snapshot again on resume is harmless: the merge inputs are
    // the same files, so the result is the same.
    copy(&journal.remote_snapshot, &document)?;
    debug!(path = %document.display(), "live document replaced with remote snapshot");

    Ok(merge_document(&document, Some(&local_version)))
}

/// Record the result, drop transitional artifacts on success, remove the journal.
fn settle(journal: &mut Journal, outcome: &MergeOutcome) {
    if journal.path().exists() {
        if let Err(e) = journal.finish(outcome.status, outcome.conflicts) {
            warn!(path = %journal.document.display(), error = %e, "failed to record merge result");
        }
    }

    if outcome.status == MergeStatus::Success {
        for path in [
            journal.remote_snapshot.clone(),
            Sidecar::LocalVersion.path_for(&journal.document),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove transitional artifact"),
            }
        }
    }

    journal.remove();
    info!(
        path = %journal.document.display(),
        status = %outcome.status,
        "reconciliation finished"
    );
}

/// Artifacts the given phase needs in order to continue.
fn missing_artifacts(journal: &Journal, phase: JournalPhase) -> Vec<String> {
    let document = &journal.document;
    let mut needed = vec![
        document.clone(),
        Sidecar::Baseline.path_for(document),
        journal.remote_snapshot.clone(),
    ];
    if phase == JournalPhase::Staged {
        needed.push(Sidecar::LocalVersion.path_for(document));
    }
    needed
        .iter()
        .filter(|p| !p.exists())
        .map(|p| display_name(p))
        .collect()
}

fn missing(path: &Path) -> MergeError {
    MergeError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
    }
}

fn copy(from: &Path, to: &Path) -> Result<(), MergeError> {
    std::fs::copy(from, to).map_err(io_at(to, |path, source| MergeError::Io { path, source }))?;
    Ok(())
}
