//! Configuration for a sidelock participant.
//!
//! One TOML file per machine. Everything except `[participant]` has a
//! default, so a minimal file only needs to name the watched roots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::hashing::HashAlgorithm;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Configuration for one participant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Who this participant is, as written into lock markers.
    #[serde(default)]
    pub participant: ParticipantConfig,

    /// Statically configured watched roots.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Tick interval and drift hashing.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// How open documents are discovered.
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Daemon process settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// Owner identity written into markers. Defaults to the login name.
    #[serde(default = "default_identity")]
    pub identity: String,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
        }
    }
}

/// `$USER`, then `$USERNAME`, then `"unknown"`.
pub fn default_identity() -> String {
    std::env::var("USER")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var("USERNAME").ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".into())
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Root directories scanned for documents and markers.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Milliseconds between ticks (default 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Digest used for drift detection.
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Which activity detector the daemon uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Inspect running processes' command lines.
    #[default]
    Process,
    /// Read a list of open paths maintained by an editor hook.
    ListFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub kind: DetectorKind,

    /// File extensions (without the dot) that count as documents.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Path of the open-documents list for `kind = "list_file"`.
    #[serde(default)]
    pub list_file: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::default(),
            extensions: default_extensions(),
            list_file: None,
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["lyx".into()]
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory for the PID file, status snapshot, event log and watch list.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl DaemonConfig {
    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("sidelock.pid")
    }

    pub fn status_file(&self) -> PathBuf {
        self.data_dir.join("status.json")
    }

    pub fn events_file(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    pub fn watch_list_file(&self) -> PathBuf {
        self.data_dir.join("watch_list.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.local/share/sidelock")
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Expand `~` in every path-valued field.
    pub fn resolve_paths(&mut self) {
        self.daemon.data_dir = expand_tilde(&self.daemon.data_dir);
        self.watch.roots = self.watch.roots.iter().map(|r| expand_tilde(r)).collect();
        self.detector.list_file = self.detector.list_file.as_deref().map(expand_tilde);
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.participant.identity.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "participant.identity".into(),
                detail: "identity must not be empty".into(),
            });
        }
        if self.participant.identity.contains('\n') {
            return Err(ConfigError::InvalidValue {
                field: "participant.identity".into(),
                detail: "identity must be a single line".into(),
            });
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.poll_interval_ms".into(),
                detail: "poll interval must be > 0".into(),
            });
        }
        if self.detector.extensions.iter().any(|e| e.is_empty() || e.starts_with('.')) {
            return Err(ConfigError::InvalidValue {
                field: "detector.extensions".into(),
                detail: "extensions are given without a leading dot and must not be empty".into(),
            });
        }
        if self.detector.kind == DetectorKind::ListFile && self.detector.list_file.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "detector.list_file".into(),
                detail: "list_file is required when detector.kind = \"list_file\"".into(),
            });
        }
        for root in &self.watch.roots {
            if root.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "watch.roots".into(),
                    detail: "root paths must not be empty".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_paths();
        config.validate()?;
        Ok(config)
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# sidelock configuration

[participant]
# identity = "alice"          # defaults to $USER

[watch]
roots = ["~/Dropbox/shared"]

[monitor]
poll_interval_ms = 1000
hash_algorithm = "sha256"     # or "sha512"

[detector]
kind = "process"              # or "list_file"
extensions = ["lyx"]
# list_file = "~/.local/share/sidelock/open_documents"

[daemon]
# data_dir = "~/.local/share/sidelock"
log_level = "info"
"#
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
[participant]
identity = "alice"

[watch]
roots = ["/srv/shared/thesis", "/srv/shared/papers"]

[monitor]
poll_interval_ms = 250
hash_algorithm = "sha512"

[detector]
kind = "list_file"
extensions = ["lyx", "tex"]
list_file = "/tmp/sidelock-open"

[daemon]
data_dir = "/tmp/sidelock"
log_level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.participant.identity, "alice");
        assert_eq!(config.watch.roots.len(), 2);
        assert_eq!(config.monitor.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.monitor.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.detector.kind, DetectorKind::ListFile);
        assert_eq!(config.detector.extensions, vec!["lyx", "tex"]);
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(
            config.daemon.status_file(),
            PathBuf::from("/tmp/sidelock/status.json")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("[watch]\nroots = [\"/a\"]\n").unwrap();
        assert_eq!(config.monitor.poll_interval_ms, 1000);
        assert_eq!(config.monitor.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.detector.kind, DetectorKind::Process);
        assert_eq!(config.detector.extensions, vec!["lyx"]);
        assert_eq!(config.daemon.log_level, "info");
        assert!(!config.participant.identity.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidelock.toml");
        std::fs::write(&path, sample_toml()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load failed");
        assert_eq!(config.participant.identity, "alice");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/sidelock.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_zero_poll() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.monitor.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "monitor.poll_interval_ms"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_identity() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.participant.identity = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "participant.identity"
        ));
    }

    #[test]
    fn test_validate_requires_list_file() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.detector.list_file = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_dotted_extension() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.detector.extensions = vec![".lyx".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/abs/path");
        assert_eq!(expand_tilde(plain), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x")), home.join("x"));
        }
    }

    #[test]
    fn test_default_template_is_valid() {
        let config: AppConfig = toml::from_str(AppConfig::default_template())
            .expect("default template should be valid TOML");
        config.validate().unwrap();
    }
}
