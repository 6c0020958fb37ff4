//! Content hashing for drift detection.
//!
//! A document's hash is recomputed every tick while it is claimed, so the
//! algorithm is configurable independently of the coordination logic.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Hash a byte slice.
    pub fn digest(self, bytes: &[u8]) -> ContentHash {
        let hex = match self {
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
            Self::Sha512 => hex::encode(Sha512::digest(bytes)),
        };
        ContentHash(hex)
    }

    /// Read a file and hash its current bytes.
    pub fn digest_file(self, path: &Path) -> std::io::Result<ContentHash> {
        let bytes = std::fs::read(path)?;
        Ok(self.digest(&bytes))
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Hex-encoded digest of a document's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let a = HashAlgorithm::Sha256.digest(b"hello world");
        let b = HashAlgorithm::Sha256.digest(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, HashAlgorithm::Sha256.digest(b"hello world\n"));
    }

    #[test]
    fn test_hash_lengths() {
        assert_eq!(HashAlgorithm::Sha256.digest(b"x").as_str().len(), 64);
        assert_eq!(HashAlgorithm::Sha512.digest(b"x").as_str().len(), 128);
        assert_eq!(HashAlgorithm::Sha256.digest(b"x").short().len(), 12);
    }

    #[test]
    fn test_digest_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.lyx");
        std::fs::write(&path, b"line\n").unwrap();
        assert_eq!(
            HashAlgorithm::Sha512.digest_file(&path).unwrap(),
            HashAlgorithm::Sha512.digest(b"line\n")
        );
        assert!(HashAlgorithm::Sha256
            .digest_file(&dir.path().join("missing"))
            .is_err());
    }

    #[test]
    fn test_algorithm_serde_names() {
        #[derive(Deserialize)]
        struct Wrap {
            algo: HashAlgorithm,
        }
        let w: Wrap = toml::from_str("algo = \"sha512\"").unwrap();
        assert_eq!(w.algo, HashAlgorithm::Sha512);
        assert_eq!(HashAlgorithm::default().to_string(), "sha256");
    }
}
