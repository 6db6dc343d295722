//! Pipeline orchestrator for running jobs stage by stage.
//!
//! This module provides the control loop that takes a job from its input
//! media to subtitled output. Stages are opaque workers that read declared
//! input files and write declared output files; the orchestrator decides
//! what runs, what comes from the cache, and what is skipped.
//!
//! # Architecture
//!
//! ```text
//! StageRunner
//!     ├── 01 demux        (mandatory)
//!     ├── 02 vad          (mandatory)
//!     ├── 03 refine-vad   (optional, falls back to vad)
//!     ├── 04 diarize      (optional, falls back to refine-vad)
//!     ├── 05 transcribe   (mandatory, cached: baseline)
//!     ├── 06 correct      (optional, cached: glossary)
//!     ├── 07 translate    (optional, cached: translation)
//!     ├── 08 subtitles    (mandatory)
//!     └── 09 mux          (optional)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use subpipe_core::config::Settings;
//! use subpipe_core::orchestrator::{create_job, JobContext, StageRunner, Topology};
//!
//! let settings = Settings::default();
//! let job = create_job(&settings, &Topology::standard(), 1, Path::new("talk.mkv"))?;
//!
//! let ctx = JobContext::open(&job.job_dir, None)?;
//! let runner = StageRunner::for_snapshot(Topology::standard(), &ctx.snapshot);
//! let summary = runner.run(&ctx)?;
//! println!("{} stages executed", summary.executed.len());
//! # Ok::<(), subpipe_core::orchestrator::PipelineError>(())
//! ```

mod errors;
mod resolve;
mod runner;
mod setup;
mod topology;
mod types;
mod worker;

pub use errors::{PipelineError, PipelineResult, StageError, StageResult};
pub use resolve::{ResolvedInput, Resolver};
pub use runner::StageRunner;
pub use setup::{create_job, create_job_on, find_job};
pub use topology::{
    CachePolicy, InputSource, SecondaryKey, StageInput, StageKind, StageOutput, StageSpec,
    Topology,
};
pub use types::{JobContext, RunSummary, StageDisposition};
pub use worker::{CommandWorker, StageWorker, WorkerOutcome, WorkerRegistry, WorkerRequest};
