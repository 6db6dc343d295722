//! Core types for the orchestrator.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigSnapshot, Settings};
use crate::jobs::{Job, JobId, JobLayout};
use crate::logging::{JobLogger, LogCallback};
use crate::manifest::PipelineStatus;

use super::errors::{PipelineError, PipelineResult};

/// Read-only context for one run of one job.
///
/// Everything comes from the job directory: the snapshot, never the base
/// config, decides how the job runs.
pub struct JobContext {
    /// The job as recorded in its snapshot.
    pub job: Job,
    /// Frozen configuration.
    pub snapshot: ConfigSnapshot,
    /// Paths inside the job directory.
    pub layout: JobLayout,
    /// Per-job logger (`pipeline.log`).
    pub logger: Arc<JobLogger>,
}

impl JobContext {
    /// Open an existing job directory.
    pub fn open(job_dir: &Path, callback: Option<LogCallback>) -> PipelineResult<Self> {
        let snapshot = ConfigSnapshot::load(job_dir)?;
        let job = snapshot.job().to_job();
        let job_id = job.id.to_string();
        let job_dir = fs::canonicalize(job_dir).map_err(|e| PipelineError::setup(&job_id, e))?;
        let layout = JobLayout::new(&job_dir);

        let logger = JobLogger::new(
            job_id.clone(),
            layout.log_file(),
            snapshot.settings().log_config(),
            callback,
        )
        .map_err(|e| PipelineError::setup(&job_id, e))?;

        Ok(Self {
            job,
            snapshot,
            layout,
            logger: Arc::new(logger),
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job.id
    }

    pub fn settings(&self) -> &Settings {
        self.snapshot.settings()
    }
}

/// What happened to one stage during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageDisposition {
    /// A worker ran and succeeded.
    Executed,
    /// Outputs were restored from the media cache.
    FromCache,
    /// Disabled or tolerated failure.
    Skipped(String),
}

/// Result of one `run` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub job_id: JobId,
    pub status: PipelineStatus,
    /// Stages finished in an earlier run.
    pub already_done: Vec<String>,
    /// Stages whose worker ran in this run.
    pub executed: Vec<String>,
    /// Stages satisfied from the cache in this run.
    pub from_cache: Vec<String>,
    /// Stages skipped in this run.
    pub skipped: Vec<String>,
}

impl RunSummary {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status: PipelineStatus::Running,
            already_done: Vec::new(),
            executed: Vec::new(),
            from_cache: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: &str, disposition: &StageDisposition) {
        let list = match disposition {
            StageDisposition::Executed => &mut self.executed,
            StageDisposition::FromCache => &mut self.from_cache,
            StageDisposition::Skipped(_) => &mut self.skipped,
        };
        list.push(stage.to_string());
    }
}
