//! Persisted list of watched root directories.
//!
//! Roots added at runtime are kept in a small JSON file in the data
//! directory so they survive restarts. Older files stored a single
//! `watch_dir` string; those are read as a one-element list.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::WatchListError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchList {
    #[serde(default)]
    pub watch_dirs: Vec<PathBuf>,
}

#[derive(Deserialize)]
struct RawWatchList {
    #[serde(default)]
    watch_dirs: Option<Vec<PathBuf>>,
    #[serde(default)]
    watch_dir: Option<PathBuf>,
}

impl WatchList {
    /// Load the list; a missing file is an empty list.
    pub fn load(path: &Path) -> Result<Self, WatchListError> {
        if !path.exists() {
            debug!(path = %path.display(), "no persisted watch list");
            return Ok(Self::default());
        }
        let raw: RawWatchList = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let watch_dirs = match (raw.watch_dirs, raw.watch_dir) {
            (Some(dirs), _) => dirs,
            (None, Some(single)) => {
                info!(path = %path.display(), "migrating single-root watch list");
                vec![single]
            }
            (None, None) => Vec::new(),
        };
        Ok(Self { watch_dirs })
    }

    /// Write the list through a temporary file in the same directory, so
    /// the daemon's reloader never reads a half-written file.
    pub fn save(&self, path: &Path) -> Result<(), WatchListError> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Add a root; returns `false` if it was already present.
    pub fn add(&mut self, root: PathBuf) -> bool {
        if self.watch_dirs.contains(&root) {
            return false;
        }
        self.watch_dirs.push(root);
        true
    }

    /// Remove a root; returns `false` if it was not present.
    pub fn remove(&mut self, root: &Path) -> bool {
        let before = self.watch_dirs.len();
        self.watch_dirs.retain(|d| d != root);
        before != self.watch_dirs.len()
    }
}

/// Configured roots followed by persisted ones, without duplicates.
pub fn effective_roots(configured: &[PathBuf], persisted: &WatchList) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for root in configured.iter().chain(persisted.watch_dirs.iter()) {
        if !roots.contains(root) {
            roots.push(root.clone());
        }
    }
    roots
}
