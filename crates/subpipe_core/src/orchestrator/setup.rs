//! Job creation and lookup.
//!
//! Creating a job allocates its id and directory tree, freezes the
//! configuration snapshot and writes the initial pipeline manifest. After
//! that the job is self-contained: every run opens it from its directory.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

use crate::config::{ConfigSnapshot, Settings};
use crate::jobs::{Job, JobAllocator, JobId, JobLayout};
use crate::manifest::PipelineManifest;

use super::errors::{PipelineError, PipelineResult};
use super::topology::Topology;

/// Create a job for today's date.
pub fn create_job(
    settings: &Settings,
    topology: &Topology,
    user_id: u32,
    media: &Path,
) -> PipelineResult<Job> {
    create_job_on(settings, topology, Local::now().date_naive(), user_id, media)
}

/// Create a job for an explicit date.
pub fn create_job_on(
    settings: &Settings,
    topology: &Topology,
    date: NaiveDate,
    user_id: u32,
    media: &Path,
) -> PipelineResult<Job> {
    let names = topology.stage_names();
    let allocator = JobAllocator::new(settings.paths.output_root(), names.iter().cloned());
    let job = allocator.allocate_on(date, user_id, media)?;

    ConfigSnapshot::materialize(settings, &job)?;
    PipelineManifest::load_or_create(&JobLayout::new(&job.job_dir), job.id, &names)
        .map_err(|e| PipelineError::manifest(job.id.to_string(), e))?;

    tracing::info!("Created job {} in {}", job.id, job.job_dir.display());
    Ok(job)
}

/// Directory of an existing job under the configured output root.
pub fn find_job(settings: &Settings, job_id: &str) -> PipelineResult<PathBuf> {
    let id = JobId::parse(job_id)?;
    let allocator = JobAllocator::new(settings.paths.output_root(), Vec::<String>::new());
    Ok(allocator.job_dir(&id)?)
}
