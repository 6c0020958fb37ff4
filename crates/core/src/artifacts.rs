//! Sidecar artifact naming.
//!
//! Every artifact sidelock writes lives next to the document it belongs to,
//! named by appending a fixed suffix to the full document path. Other
//! participants find markers by suffix alone, so the suffixes are part of the
//! on-disk interface and must not change.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// The kinds of sidecar files kept next to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sidecar {
    /// Advisory claim marker holding the owner identity as plain text.
    Lock,
    /// Byte-identical snapshot taken at claim time.
    Baseline,
    /// Remote side preserved for manual resolution after a conflict.
    RemoteBackup,
    /// Local side preserved for manual resolution after a conflict.
    LocalBackup,
    /// Live content saved just before a merge overwrites it.
    PreMergeBackup,
    /// External snapshot captured when drift is detected.
    RemoteVersion,
    /// Local working copy captured when reconciliation starts.
    LocalVersion,
    /// Write-ahead journal for an in-flight reconciliation.
    Journal,
}

impl Sidecar {
    /// Every sidecar kind, in a stable order.
    pub const ALL: [Sidecar; 8] = [
        Sidecar::Lock,
        Sidecar::Baseline,
        Sidecar::RemoteBackup,
        Sidecar::LocalBackup,
        Sidecar::PreMergeBackup,
        Sidecar::RemoteVersion,
        Sidecar::LocalVersion,
        Sidecar::Journal,
    ];

    /// The suffix appended to the document path.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Lock => ".lock",
            Self::Baseline => ".baseline",
            Self::RemoteBackup => ".remote_backup",
            Self::LocalBackup => ".local_backup",
            Self::PreMergeBackup => ".pre_merge_backup",
            Self::RemoteVersion => ".remote_version",
            Self::LocalVersion => ".local_version",
            Self::Journal => ".reconcile",
        }
    }

    /// Path of this sidecar for `document`.
    pub fn path_for(self, document: &Path) -> PathBuf {
        let mut raw: OsString = document.as_os_str().to_os_string();
        raw.push(self.suffix());
        PathBuf::from(raw)
    }

    /// If `path` is a sidecar of this kind, return the document it belongs to.
    pub fn document_of(self, path: &Path) -> Option<PathBuf> {
        let raw = path.to_str()?;
        let stem = raw.strip_suffix(self.suffix())?;
        if stem.is_empty() || stem.ends_with(std::path::MAIN_SEPARATOR) {
            return None;
        }
        Some(PathBuf::from(stem))
    }
}

impl std::fmt::Display for Sidecar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix().trim_start_matches('.'))
    }
}

/// `true` if `path` names any sidelock sidecar rather than a user document.
pub fn is_sidecar(path: &Path) -> bool {
    Sidecar::ALL.iter().any(|kind| kind.document_of(path).is_some())
}

/// Sidecars of `document` that currently exist on disk.
pub fn existing_sidecars(document: &Path) -> Vec<(Sidecar, PathBuf)> {
    Sidecar::ALL
        .iter()
        .map(|kind| (*kind, kind.path_for(document)))
        .filter(|(_, path)| path.exists())
        .collect()
}

/// Short display name for a document (file name, falling back to the full path).
pub fn display_name(document: &Path) -> String {
    document
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| document.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_appended_to_full_name() {
        let doc = Path::new("/shared/thesis/chapter1.lyx");
        assert_eq!(
            Sidecar::Lock.path_for(doc),
            PathBuf::from("/shared/thesis/chapter1.lyx.lock")
        );
        assert_eq!(
            Sidecar::PreMergeBackup.path_for(doc),
            PathBuf::from("/shared/thesis/chapter1.lyx.pre_merge_backup")
        );
    }

    #[test]
    fn test_document_of_strips_suffix() {
        let marker = Path::new("/shared/a.lyx.lock");
        assert_eq!(
            Sidecar::Lock.document_of(marker),
            Some(PathBuf::from("/shared/a.lyx"))
        );
        assert_eq!(Sidecar::Baseline.document_of(marker), None);
        assert_eq!(Sidecar::Lock.document_of(Path::new("/shared/.lock")), None);
    }

    #[test]
    fn test_is_sidecar() {
        assert!(is_sidecar(Path::new("/d/a.lyx.remote_version")));
        assert!(is_sidecar(Path::new("/d/a.lyx.reconcile")));
        assert!(!is_sidecar(Path::new("/d/a.lyx")));
    }

    #[test]
    fn test_existing_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("notes.lyx");
        std::fs::write(&doc, "x").unwrap();
        std::fs::write(Sidecar::Baseline.path_for(&doc), "x").unwrap();

        let found = existing_sidecars(&doc);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, Sidecar::Baseline);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Path::new("/a/b/paper.lyx")), "paper.lyx");
        assert_eq!(Sidecar::RemoteBackup.to_string(), "remote_backup");
    }
}
