//! Persisted execution state.
//!
//! This module provides:
//! - `StageManifest` / `StageRecorder`: one `stage.json` per stage execution
//! - `PipelineManifest`: `pipeline.json`, the job-level record read by resume
//! - Closed status enums for both
//!
//! Both manifests are pretty-printed JSON written atomically.

mod error;
mod pipeline;
mod stage;
mod status;

pub use error::{ManifestError, ManifestResult};
pub use pipeline::{PipelineManifest, StageSummary};
pub use stage::{ArtifactRecord, StageManifest, StageRecorder};
pub use status::{PipelineStatus, StageStatus};
