//! Manifest error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::status::StageStatus;

/// Errors from reading or writing stage and pipeline manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error on manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Stage '{stage}' cannot go from {from} to {to}")]
    InvalidTransition {
        stage: String,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("Stage '{0}' is not part of this pipeline")]
    UnknownStage(String),

    #[error("Pipeline manifest lists stages {found:?}, expected {expected:?}")]
    TopologyMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

impl ManifestError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_transition(stage: impl Into<String>, from: StageStatus, to: StageStatus) -> Self {
        Self::InvalidTransition {
            stage: stage.into(),
            from,
            to,
        }
    }
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
