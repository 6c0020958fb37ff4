//! Discovering which documents are open on this machine.
//!
//! Detectors report raw paths; [`within_roots`] turns them into the
//! canonical document identities the coordinator works with.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::artifacts::is_sidecar;
use crate::config::{DetectorConfig, DetectorKind};
use crate::errors::{io_at, ActivityError, ConfigError};

/// Source of the set of documents currently being edited locally.
///
/// Polled once per tick. An `Err` means "unknown this tick", which is not
/// the same as "nothing open".
pub trait ActivityDetector: Send {
    fn name(&self) -> &str;

    fn open_documents(&mut self) -> Result<BTreeSet<PathBuf>, ActivityError>;
}

/// Build the detector selected in the configuration.
pub fn from_config(config: &DetectorConfig) -> Result<Box<dyn ActivityDetector>, ConfigError> {
    match config.kind {
        DetectorKind::Process => Ok(Box::new(ProcessScanDetector::new(
            config.extensions.clone(),
        ))),
        DetectorKind::ListFile => {
            let path = config
                .list_file
                .clone()
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "detector.list_file".into(),
                    detail: "required when detector.kind = \"list_file\"".into(),
                })?;
            Ok(Box::new(ListFileDetector::new(path)))
        }
    }
}

/// Canonicalize `documents` and keep the ones inside a watched root.
///
/// Paths that no longer exist and sidecar files are dropped.
pub fn within_roots(documents: &BTreeSet<PathBuf>, roots: &[PathBuf]) -> BTreeSet<PathBuf> {
    let roots: Vec<PathBuf> = roots
        .iter()
        .filter_map(|root| root.canonicalize().ok())
        .collect();

    documents
        .iter()
        .filter(|doc| !is_sidecar(doc))
        .filter_map(|doc| match doc.canonicalize() {
            Ok(canonical) => Some(canonical),
            Err(e) => {
                trace!(path = %doc.display(), error = %e, "open document not resolvable");
                None
            }
        })
        .filter(|doc| doc.is_file() && roots.iter().any(|root| doc.starts_with(root)))
        .collect()
}

// ---------------------------------------------------------------------------
// Process scan
// ---------------------------------------------------------------------------

/// Finds documents named on the command line of running processes.
///
/// Reads `/proc/<pid>/cmdline`; relative arguments are resolved against the
/// process's working directory. Only available on Linux.
#[derive(Debug, Clone)]
pub struct ProcessScanDetector {
    extensions: Vec<String>,
    proc_root: PathBuf,
}

impl ProcessScanDetector {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Scan a different procfs mount (used by tests).
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    fn matches_extension(&self, arg: &Path) -> bool {
        arg.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn documents_of(&self, pid_dir: &Path) -> Vec<PathBuf> {
        // Processes exit between listing and reading; that is not an error.
        let Ok(raw) = std::fs::read(pid_dir.join("cmdline")) else {
            return Vec::new();
        };

        let args: Vec<PathBuf> = raw
            .split(|b| *b == 0)
            .skip(1)
            .filter(|arg| !arg.is_empty())
            .map(|arg| PathBuf::from(String::from_utf8_lossy(arg).into_owned()))
            .filter(|arg| self.matches_extension(arg))
            .collect();
        if args.is_empty() {
            return args;
        }

        let cwd = std::fs::read_link(pid_dir.join("cwd")).ok();
        args.into_iter()
            .filter_map(|arg| {
                if arg.is_absolute() {
                    Some(arg)
                } else {
                    cwd.as_ref().map(|cwd| cwd.join(arg))
                }
            })
            .filter(|path| path.is_file())
            .collect()
    }
}

impl ActivityDetector for ProcessScanDetector {
    fn name(&self) -> &str {
        "process"
    }

    fn open_documents(&mut self) -> Result<BTreeSet<PathBuf>, ActivityError> {
        if !cfg!(target_os = "linux") && self.proc_root == Path::new("/proc") {
            return Err(ActivityError::Unsupported(self.name().to_string()));
        }

        let entries = std::fs::read_dir(&self.proc_root)
            .map_err(io_at(&self.proc_root, |path, source| ActivityError::Io { path, source }))?;

        let mut found = BTreeSet::new();
        for entry in entries.flatten() {
            let is_pid = entry
                .file_name()
                .to_str()
                .map(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false);
            if !is_pid {
                continue;
            }
            found.extend(self.documents_of(&entry.path()));
        }

        debug!(count = found.len(), "process scan complete");
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// List file
// ---------------------------------------------------------------------------

/// Reads open documents from a newline-separated file kept by an editor hook.
///
/// A missing file means nothing is open. Blank lines and `#` comments are
/// ignored.
#[derive(Debug, Clone)]
pub struct ListFileDetector {
    path: PathBuf,
}

impl ListFileDetector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ActivityDetector for ListFileDetector {
    fn name(&self) -> &str {
        "list_file"
    }

    fn open_documents(&mut self) -> Result<BTreeSet<PathBuf>, ActivityError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => {
                return Err(ActivityError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(PathBuf::from)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

/// Fixed set of open documents, replaceable between ticks.
#[derive(Debug, Clone, Default)]
pub struct StaticDetector {
    open: BTreeSet<PathBuf>,
    failing: bool,
}

impl StaticDetector {
    pub fn new<I, P>(open: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            open: open.into_iter().map(Into::into).collect(),
            failing: false,
        }
    }

    pub fn set_open<I, P>(&mut self, open: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.open = open.into_iter().map(Into::into).collect();
    }

    /// Make every poll fail until called again with `false`.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }
}

impl ActivityDetector for StaticDetector {
    fn name(&self) -> &str {
        "static"
    }

    fn open_documents(&mut self) -> Result<BTreeSet<PathBuf>, ActivityError> {
        if self.failing {
            return Err(ActivityError::Unsupported(self.name().to_string()));
        }
        Ok(self.open.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_file_detector() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("open.txt");
        let mut detector = ListFileDetector::new(&list);
        assert!(detector.open_documents().unwrap().is_empty());

        std::fs::write(&list, "# editor hook\n/a/b.lyx\n\n  /c/d.lyx  \n/a/b.lyx\n").unwrap();
        let open = detector.open_documents().unwrap();
        assert_eq!(
            open.into_iter().collect::<Vec<_>>(),
            vec![PathBuf::from("/a/b.lyx"), PathBuf::from("/c/d.lyx")]
        );
    }

    #[test]
    fn test_within_roots_filters_and_canonicalizes() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let inside_doc = root.path().join("paper.lyx");
        let outside_doc = outside.path().join("notes.lyx");
        let sidecar = root.path().join("paper.lyx.baseline");
        std::fs::write(&inside_doc, "").unwrap();
        std::fs::write(&outside_doc, "").unwrap();
        std::fs::write(&sidecar, "").unwrap();

        let detected: BTreeSet<PathBuf> = [
            root.path().join(".").join("paper.lyx"),
            outside_doc,
            sidecar,
            root.path().join("vanished.lyx"),
        ]
        .into_iter()
        .collect();

        let kept = within_roots(&detected, &[root.path().to_path_buf()]);
        assert_eq!(
            kept.into_iter().collect::<Vec<_>>(),
            vec![inside_doc.canonicalize().unwrap()]
        );
    }

    #[test]
    fn test_process_scan_over_fake_procfs() {
        let proc_root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let doc = work.path().join("thesis.lyx");
        std::fs::write(&doc, "").unwrap();

        let pid = proc_root.path().join("4242");
        std::fs::create_dir(&pid).unwrap();
        let cmdline = format!("lyx\0-dbg\0{}\0missing.lyx\0", doc.display());
        std::fs::write(pid.join("cmdline"), cmdline).unwrap();

        let other = proc_root.path().join("7");
        std::fs::create_dir(&other).unwrap();
        std::fs::write(other.join("cmdline"), "vim\0notes.txt\0").unwrap();
        std::fs::create_dir(proc_root.path().join("self")).unwrap();

        let mut detector =
            ProcessScanDetector::new(vec!["lyx".into()]).with_proc_root(proc_root.path());
        let open = detector.open_documents().unwrap();
        assert_eq!(open.into_iter().collect::<Vec<_>>(), vec![doc]);
    }

    #[test]
    fn test_static_detector_failure_toggle() {
        let mut detector = StaticDetector::new(["/a.lyx"]);
        assert_eq!(detector.open_documents().unwrap().len(), 1);
        detector.set_failing(true);
        assert!(detector.open_documents().is_err());
    }

    #[test]
    fn test_from_config_requires_list_file() {
        let config = DetectorConfig {
            kind: DetectorKind::ListFile,
            ..DetectorConfig::default()
        };
        assert!(from_config(&config).is_err());
    }
}
