//! Cache types: identities, phases, entry records.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from identity computation and cache storage.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("No audio stream in {0}")]
    NoAudio(PathBuf),

    #[error("Failed to decode {path}: {message}")]
    Decoder { path: PathBuf, message: String },

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Invalid media identity '{0}'")]
    InvalidIdentity(String),

    #[error("Cache entry {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },
}

impl CacheError {
    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn decoder(path: &Path, message: impl Into<String>) -> Self {
        Self::Decoder {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn corrupted(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Content-derived key for a piece of media (lowercase SHA-256 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaIdentity(String);

impl MediaIdentity {
    pub fn parse(s: &str) -> CacheResult<Self> {
        let valid = s.len() == 64
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(CacheError::InvalidIdentity(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for MediaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MediaIdentity {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MediaIdentity {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MediaIdentity> for String {
    fn from(id: MediaIdentity) -> Self {
        id.0
    }
}

/// Reusable artifact groups per media identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePhase {
    /// Recognition output. No secondary key.
    Baseline,
    /// Entity-corrected output, keyed by glossary content hash.
    Glossary,
    /// Translated output, keyed by target language code.
    Translation,
}

impl CachePhase {
    pub const ALL: [CachePhase; 3] = [
        CachePhase::Baseline,
        CachePhase::Glossary,
        CachePhase::Translation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CachePhase::Baseline => "baseline",
            CachePhase::Glossary => "glossary",
            CachePhase::Translation => "translation",
        }
    }

    /// Whether entries of this phase live under a secondary key.
    pub fn requires_secondary(&self) -> bool {
        match self {
            CachePhase::Baseline => false,
            CachePhase::Glossary | CachePhase::Translation => true,
        }
    }
}

impl fmt::Display for CachePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CachePhase {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CachePhase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CacheError::InvalidKey(format!("unknown phase '{}'", s)))
    }
}

/// One stored file in an entry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheArtifact {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

/// Contents of `entry.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identity: MediaIdentity,
    pub phase: CachePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub artifacts: Vec<CacheArtifact>,
}

impl CacheEntry {
    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }
}

/// A verified entry returned by `get`.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry: CacheEntry,
    /// Directory holding the artifact files.
    pub dir: PathBuf,
}

impl CacheHit {
    /// Path of the stored artifact `name`.
    pub fn artifact_path(&self, name: &str) -> Option<PathBuf> {
        self.entry
            .artifacts
            .iter()
            .find(|a| a.name == name)
            .map(|a| self.dir.join(&a.name))
    }
}

/// Summary row produced by `list`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheListing {
    pub identity: MediaIdentity,
    pub phase: CachePhase,
    pub secondary: Option<String>,
    pub artifact_count: usize,
    pub total_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_requires_lowercase_sha256_hex() {
        let good = "a".repeat(64);
        assert!(MediaIdentity::parse(&good).is_ok());
        assert!(MediaIdentity::parse(&"A".repeat(64)).is_err());
        assert!(MediaIdentity::parse("abc").is_err());
        assert!(MediaIdentity::parse(&"g".repeat(64)).is_err());
        assert_eq!(MediaIdentity::parse(&good).unwrap().short(), "aaaaaaaaaaaa");
    }

    #[test]
    fn phase_parses_and_reports_secondary() {
        assert_eq!("glossary".parse::<CachePhase>().unwrap(), CachePhase::Glossary);
        assert!("unknown".parse::<CachePhase>().is_err());
        assert!(!CachePhase::Baseline.requires_secondary());
        assert!(CachePhase::Translation.requires_secondary());
    }
}
