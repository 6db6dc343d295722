//! Job identifier allocation.
//!
//! Identifiers are `YYYYMMDD-NNN`. The allocator scans the output root for
//! the highest sequence number of the day and claims the next one with an
//! exclusive `create_dir`. If another process claims the same number first
//! the create fails with `AlreadyExists` and the allocator moves on to the
//! next number, so two concurrent callers never receive the same id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, Utc};

use super::layout::JobLayout;
use super::types::{Job, JobError, JobId, JobResult};

/// Upper bound on claim attempts for a single allocation.
const MAX_CLAIM_ATTEMPTS: u32 = 10_000;

/// Mints job identifiers and creates job directory trees.
#[derive(Debug, Clone)]
pub struct JobAllocator {
    output_root: PathBuf,
    stage_names: Vec<String>,
}

impl JobAllocator {
    /// Create an allocator for `output_root`.
    ///
    /// `stage_names` is the pipeline topology in order; one subdirectory is
    /// created per stage.
    pub fn new<I, S>(output_root: impl Into<PathBuf>, stage_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            output_root: output_root.into(),
            stage_names: stage_names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Allocate a job for today's (local) date.
    pub fn allocate(&self, user_id: u32, input_media: &Path) -> JobResult<Job> {
        self.allocate_on(Local::now().date_naive(), user_id, input_media)
    }

    /// Allocate a job for an explicit date.
    pub fn allocate_on(&self, date: NaiveDate, user_id: u32, input_media: &Path) -> JobResult<Job> {
        if !input_media.is_file() {
            return Err(JobError::MediaNotFound(input_media.to_path_buf()));
        }
        let input_media = fs::canonicalize(input_media)
            .map_err(|e| JobError::io("resolve input media", e))?;

        fs::create_dir_all(&self.output_root).map_err(|e| self.unwritable(e))?;

        let mut sequence = self.highest_sequence(date)? + 1;
        let mut attempts = 0;

        let id = loop {
            if attempts >= MAX_CLAIM_ATTEMPTS {
                return Err(JobError::SequenceExhausted(JobId::date_prefix(date)));
            }
            attempts += 1;

            let candidate = JobId::new(date, sequence);
            match fs::create_dir(self.output_root.join(candidate.to_string())) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!("Job id {} already claimed, trying next", candidate);
                    sequence += 1;
                }
                Err(e) => return Err(self.unwritable(e)),
            }
        };

        // Workers run inside their stage dir, so job paths must not be relative.
        let job_dir = fs::canonicalize(self.output_root.join(id.to_string()))
            .map_err(|e| self.unwritable(e))?;
        JobLayout::new(&job_dir)
            .create_stage_dirs(&self.stage_names)
            .map_err(|e| self.unwritable(e))?;

        tracing::info!(
            "Allocated job {} for user {} ({})",
            id,
            user_id,
            input_media.display()
        );

        Ok(Job {
            id,
            user_id,
            input_media,
            job_dir,
            created_at: Utc::now(),
        })
    }

    /// Highest existing sequence number for `date`, or 0 if there is none.
    ///
    /// Entries that do not parse as job ids are ignored.
    pub fn highest_sequence(&self, date: NaiveDate) -> JobResult<u32> {
        if !self.output_root.exists() {
            return Ok(0);
        }

        let entries = fs::read_dir(&self.output_root)
            .map_err(|e| JobError::io("scan output root", e))?;

        let mut highest = 0;
        for entry in entries {
            let entry = entry.map_err(|e| JobError::io("scan output root", e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Ok(id) = JobId::parse(name) {
                if id.date() == date {
                    highest = highest.max(id.sequence());
                }
            }
        }

        Ok(highest)
    }

    /// Locate an existing job's directory.
    pub fn job_dir(&self, id: &JobId) -> JobResult<PathBuf> {
        let dir = self.output_root.join(id.to_string());
        if dir.is_dir() {
            fs::canonicalize(&dir).map_err(|e| JobError::io("resolve job dir", e))
        } else {
            Err(JobError::NotFound {
                job_id: id.to_string(),
                root: self.output_root.clone(),
            })
        }
    }

    /// All job ids present under the output root, sorted.
    pub fn list_jobs(&self) -> JobResult<Vec<JobId>> {
        if !self.output_root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.output_root).map_err(|e| JobError::io("list jobs", e))? {
            let entry = entry.map_err(|e| JobError::io("list jobs", e))?;
            if let Some(id) = entry.file_name().to_str().and_then(|n| JobId::parse(n).ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn unwritable(&self, source: io::Error) -> JobError {
        JobError::OutputRootUnwritable {
            path: self.output_root.clone(),
            source,
        }
    }
}
