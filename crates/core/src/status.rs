//! Point-in-time view of a participant for observers (CLI, tray, scripts).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifacts::display_name;

/// Coarse state for an icon or prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Idle,
    /// We hold at least one claim.
    Editing,
    /// Someone else holds a claim. Wins over `Editing`.
    LockedByOthers,
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Editing => write!(f, "editing"),
            Self::LockedByOthers => write!(f, "locked by others"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignClaim {
    pub document: PathBuf,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub identity: String,
    pub roots: Vec<PathBuf>,
    pub my_claims: Vec<PathBuf>,
    pub other_claims: Vec<ForeignClaim>,
    pub pending_merges: Vec<PathBuf>,
    pub indicator: Indicator,
}

impl StatusSnapshot {
    /// Build a snapshot from the latest claim scan.
    ///
    /// Scanned claims on documents we hold are ours and are not listed as
    /// foreign, whatever identity the marker carries.
    pub fn build(
        identity: &str,
        roots: &[PathBuf],
        my_claims: impl IntoIterator<Item = PathBuf>,
        scanned: &BTreeMap<PathBuf, String>,
        pending_merges: Vec<PathBuf>,
    ) -> Self {
        let my_claims: Vec<PathBuf> = my_claims.into_iter().collect();
        let other_claims: Vec<ForeignClaim> = scanned
            .iter()
            .filter(|(doc, _)| !my_claims.contains(*doc))
            .map(|(doc, owner)| ForeignClaim {
                document: doc.clone(),
                owner: owner.clone(),
            })
            .collect();

        let indicator = if !other_claims.is_empty() {
            Indicator::LockedByOthers
        } else if !my_claims.is_empty() {
            Indicator::Editing
        } else {
            Indicator::Idle
        };

        Self {
            generated_at: Utc::now(),
            identity: identity.to_string(),
            roots: roots.to_vec(),
            my_claims,
            other_claims,
            pending_merges,
            indicator,
        }
    }

    /// Multi-line human summary.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("Watching {} folder(s)", self.roots.len())];
        if !self.my_claims.is_empty() {
            let names: Vec<String> = self.my_claims.iter().map(|d| display_name(d)).collect();
            parts.push(format!("You: {}", names.join(", ")));
        }
        if !self.other_claims.is_empty() {
            let names: Vec<String> = self
                .other_claims
                .iter()
                .map(|c| format!("{} ({})", display_name(&c.document), c.owner))
                .collect();
            parts.push(format!("Others: {}", names.join(", ")));
        }
        if parts.len() == 1 {
            parts.push("No files open".to_string());
        }
        parts.join("\n")
    }

    /// Write the snapshot as JSON, replacing any previous one atomically.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
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

    pub fn read_from(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
