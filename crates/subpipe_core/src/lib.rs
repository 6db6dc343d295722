//! subpipe core - job orchestration for the subtitle pipeline
//!
//! This crate contains the orchestration logic with no UI dependencies:
//! job allocation, configuration snapshots, stage and pipeline manifests,
//! the content-addressed media cache and the stage runner. It is used by
//! the `subpipe` CLI.

pub mod cache;
pub mod config;
pub mod fs_utils;
pub mod jobs;
pub mod logging;
pub mod manifest;
pub mod orchestrator;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
