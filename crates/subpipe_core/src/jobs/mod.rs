//! Job identity and directory management.
//!
//! This module provides:
//! - `JobId`: date-based identifier (`YYYYMMDD-NNN`)
//! - `Job`: immutable record of one processing request
//! - `JobAllocator`: collision-free id allocation and directory creation
//! - `JobLayout`: path resolution inside a job directory

mod allocator;
mod layout;
mod types;

pub use allocator::JobAllocator;
pub use layout::{
    JobLayout, CONFIG_SNAPSHOT_FILE, JOB_LOG_FILE, PIPELINE_MANIFEST_FILE, STAGE_MANIFEST_FILE,
};
pub use types::{Job, JobError, JobId, JobResult};
