//! File-level merge: reads the three versions, runs the line merger and
//! applies the result to the live document.
//!
//! Inputs:
//!
//! | Role | Source |
//! |------|--------|
//! | base | `<doc>.baseline` |
//! | local | the caller-supplied local version (defaults to base) |
//! | remote | the live document as it is on disk now |
//!
//! Text is decoded lossily: undecodable bytes become U+FFFD rather than
//! failing the merge.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::engine::{split_lines, LineMerge, LineMerger, Resolution};
use crate::artifacts::{display_name, Sidecar};
use crate::errors::{io_at, MergeError};

/// Terminal status of one merge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Success,
    Conflict,
    Error,
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Conflict => write!(f, "conflict"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of a merge, including any backup files left on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub status: MergeStatus,
    pub message: String,
    /// Backup artifacts this merge created.
    pub artifacts: Vec<PathBuf>,
    /// Number of conflicting positions (0 unless `status` is `Conflict`).
    pub conflicts: usize,
}

impl MergeOutcome {
    pub fn success(message: impl Into<String>, artifacts: Vec<PathBuf>) -> Self {
        Self {
            status: MergeStatus::Success,
            message: message.into(),
            artifacts,
            conflicts: 0,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: MergeStatus::Error,
            message: message.into(),
            artifacts: Vec::new(),
            conflicts: 0,
        }
    }
}

/// Merge `local_version` into the live `document`, never returning an error.
///
/// Failures become an outcome with [`MergeStatus::Error`].
pub fn merge_document(document: &Path, local_version: Option<&Path>) -> MergeOutcome {
    match try_merge_document(document, local_version) {
        Ok(outcome) => outcome,
        Err(MergeError::NoBaseline(_)) => {
            warn!(path = %document.display(), "merge attempted without a baseline");
            MergeOutcome::error("No baseline found")
        }
        Err(e) => {
            warn!(path = %document.display(), error = %e, "merge failed");
            MergeOutcome::error(format!("Merge error: {e}"))
        }
    }
}

/// Like [`merge_document`] but with the failure kept as a typed error.
pub fn try_merge_document(
    document: &Path,
    local_version: Option<&Path>,
) -> Result<MergeOutcome, MergeError> {
    let baseline_path = Sidecar::Baseline.path_for(document);
    if !baseline_path.exists() {
        return Err(MergeError::NoBaseline(document.display().to_string()));
    }

    let base_text = read_lossy(&baseline_path)?;
    let remote_text = read_lossy(document)?;
    let local_source = match local_version {
        Some(path) if path.exists() => path,
        _ => baseline_path.as_path(),
    };
    let local_text = read_lossy(local_source)?;

    let base = split_lines(&base_text);
    let local = split_lines(&local_text);
    let remote = split_lines(&remote_text);

    match LineMerger::merge(&base, &local, &remote) {
        LineMerge::Conflict { indices } => {
            let remote_backup = Sidecar::RemoteBackup.path_for(document);
            let local_backup = Sidecar::LocalBackup.path_for(document);
            copy(document, &remote_backup)?;
            copy(local_source, &local_backup)?;

            info!(
                path = %document.display(),
                conflicts = indices.len(),
                "merge aborted, backups kept for manual resolution"
            );
            Ok(MergeOutcome {
                status: MergeStatus::Conflict,
                message: format!(
                    "Conflicts detected at {} line(s).\nBackups created:\n{}\n{}",
                    indices.len(),
                    display_name(&remote_backup),
                    display_name(&local_backup)
                ),
                artifacts: vec![remote_backup, local_backup],
                conflicts: indices.len(),
            })
        }
        LineMerge::Clean { lines, resolution } => {
            let merged = lines.concat();
            if merged == remote_text {
                info!(path = %document.display(), ?resolution, "live document already holds the merge result");
                return Ok(MergeOutcome::success(describe(resolution, None), Vec::new()));
            }

            let backup = Sidecar::PreMergeBackup.path_for(document);
            copy(document, &backup)?;
            replace_contents(document, merged.as_bytes())?;

            info!(path = %document.display(), ?resolution, "merged content written");
            Ok(MergeOutcome::success(
                describe(resolution, Some(&backup)),
                vec![backup],
            ))
        }
    }
}

fn describe(resolution: Resolution, backup: Option<&Path>) -> String {
    let head = match resolution {
        Resolution::RemoteUnchanged => "No remote changes - keeping local version",
        Resolution::LocalUnchanged => "No local changes - accepting remote version",
        Resolution::Combined => "Successfully merged changes.",
    };
    match backup {
        Some(path) => format!("{head}\nBackup saved as: {}", display_name(path)),
        None => head.to_string(),
    }
}

fn read_lossy(path: &Path) -> Result<String, MergeError> {
    let bytes =
        std::fs::read(path).map_err(io_at(path, |path, source| MergeError::Io { path, source }))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn copy(from: &Path, to: &Path) -> Result<(), MergeError> {
    std::fs::copy(from, to).map_err(io_at(to, |path, source| MergeError::Io { path, source }))?;
    Ok(())
}

/// Write `bytes` to a temp file beside `document` and rename it into place,
/// keeping the document's permissions.
pub(crate) fn replace_contents(document: &Path, bytes: &[u8]) -> Result<(), MergeError> {
    let wrap = |source: std::io::Error| MergeError::Io {
        path: document.to_path_buf(),
        source,
    };
    let dir = document
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let permissions = std::fs::metadata(document).map_err(wrap)?.permissions();
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(wrap)?;
    tmp.write_all(bytes).map_err(wrap)?;
    tmp.as_file().sync_all().map_err(wrap)?;
    std::fs::set_permissions(tmp.path(), permissions).map_err(wrap)?;
    tmp.persist(document).map_err(|e| wrap(e.error))?;
    Ok(())
}
