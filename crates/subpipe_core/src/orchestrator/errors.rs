//! Error types for the orchestrator.
//!
//! Errors carry context that chains through layers:
//! Job → Stage → Operation → Detail

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::jobs::JobError;
use crate::manifest::ManifestError;

/// Job-level error with job context.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A mandatory stage failed or timed out.
    #[error("Job '{job_id}' failed at stage '{stage}': {reason}")]
    StageFailed {
        job_id: String,
        stage: String,
        reason: String,
    },

    /// The job is marked failed; it has to be resumed explicitly.
    #[error("Job '{job_id}' previously failed at stage '{stage}'; resume it to retry")]
    AlreadyFailed { job_id: String, stage: String },

    /// The stage table is inconsistent.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// A stage name that is not in the topology.
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    /// Manifest could not be read or written.
    #[error("Job '{job_id}' manifest error: {source}")]
    Manifest {
        job_id: String,
        #[source]
        source: ManifestError,
    },

    /// Cache read-back verification failed.
    #[error("Job '{job_id}' stage '{stage}' cache error: {source}")]
    Cache {
        job_id: String,
        stage: String,
        #[source]
        source: CacheError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Job(#[from] JobError),

    /// Failed to set up the job (logger, directories).
    #[error("Job '{job_id}' setup failed: {source}")]
    Setup {
        job_id: String,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn stage_failed(
        job_id: impl Into<String>,
        stage: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StageFailed {
            job_id: job_id.into(),
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest(job_id: impl Into<String>, source: ManifestError) -> Self {
        Self::Manifest {
            job_id: job_id.into(),
            source,
        }
    }

    pub fn cache(job_id: impl Into<String>, stage: impl Into<String>, source: CacheError) -> Self {
        Self::Cache {
            job_id: job_id.into(),
            stage: stage.into(),
            source,
        }
    }

    pub fn setup(job_id: impl Into<String>, source: io::Error) -> Self {
        Self::Setup {
            job_id: job_id.into(),
            source,
        }
    }
}

/// Error preventing one stage execution from dispatching or completing.
///
/// These are handled like a worker failure: fatal for mandatory stages,
/// tolerated for optional ones.
#[derive(Error, Debug)]
pub enum StageError {
    /// A declared input does not exist.
    #[error("Input '{key}' not found: {}", path.display())]
    MissingInput { key: String, path: PathBuf },

    /// A setting an input depends on is not configured.
    #[error("Input '{key}' needs setting '{setting}', which is not set")]
    MissingSetting { key: String, setting: String },

    /// The worker reported success but a declared output is missing.
    #[error("Output '{key}' was not produced: {}", path.display())]
    MissingOutput { key: String, path: PathBuf },

    /// Fallback chain points at something that can't be resolved.
    #[error("Cannot resolve '{0}'")]
    Unresolvable(String),

    /// File I/O error.
    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_displays_context() {
        let err = StageError::MissingOutput {
            key: "segments".to_string(),
            path: PathBuf::from("/jobs/20250101-001/02_vad/vad.json"),
        };
        let msg = err.to_string();
        assert!(msg.contains("segments"));
        assert!(msg.contains("vad.json"));
    }

    #[test]
    fn pipeline_error_chains_context() {
        let err = PipelineError::stage_failed("20250101-001", "transcribe", "timed out after 5s");

        let msg = err.to_string();
        assert!(msg.contains("20250101-001"));
        assert!(msg.contains("transcribe"));
        assert!(msg.contains("timed out"));
    }
}
