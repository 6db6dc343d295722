//! On-disk layout of a job directory.
//!
//! ```text
//! <output_root>/<YYYYMMDD-NNN>/
//!     pipeline.json
//!     config.snapshot.toml
//!     pipeline.log
//!     01_demux/
//!         stage.json
//!         audio.wav
//!     02_vad/
//!     ...
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Pipeline manifest file name (job root).
pub const PIPELINE_MANIFEST_FILE: &str = "pipeline.json";
/// Configuration snapshot file name (job root).
pub const CONFIG_SNAPSHOT_FILE: &str = "config.snapshot.toml";
/// Per-job log file name (job root).
pub const JOB_LOG_FILE: &str = "pipeline.log";
/// Stage manifest file name (inside each stage directory).
pub const STAGE_MANIFEST_FILE: &str = "stage.json";

/// Resolves paths inside one job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pipeline_manifest(&self) -> PathBuf {
        self.root.join(PIPELINE_MANIFEST_FILE)
    }

    pub fn config_snapshot(&self) -> PathBuf {
        self.root.join(CONFIG_SNAPSHOT_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(JOB_LOG_FILE)
    }

    /// Directory name for a stage: `NN_<stage>` with a 1-based ordinal.
    pub fn stage_dir_name(ordinal: u32, stage: &str) -> String {
        format!("{:02}_{}", ordinal, stage)
    }

    pub fn stage_dir(&self, ordinal: u32, stage: &str) -> PathBuf {
        self.root.join(Self::stage_dir_name(ordinal, stage))
    }

    pub fn stage_manifest(&self, ordinal: u32, stage: &str) -> PathBuf {
        self.stage_dir(ordinal, stage).join(STAGE_MANIFEST_FILE)
    }

    /// Stage manifest path relative to the job root (as stored in the pipeline manifest).
    pub fn relative_stage_manifest(ordinal: u32, stage: &str) -> PathBuf {
        PathBuf::from(Self::stage_dir_name(ordinal, stage)).join(STAGE_MANIFEST_FILE)
    }

    /// Create one directory per stage, in topology order.
    pub fn create_stage_dirs<S: AsRef<str>>(&self, stages: &[S]) -> io::Result<()> {
        for (i, stage) in stages.iter().enumerate() {
            fs::create_dir_all(self.stage_dir(i as u32 + 1, stage.as_ref()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stage_paths_use_ordinal_prefix() {
        let layout = JobLayout::new("/jobs/20250101-001");

        assert_eq!(
            layout.stage_dir(1, "demux"),
            PathBuf::from("/jobs/20250101-001/01_demux")
        );
        assert_eq!(
            layout.stage_manifest(3, "refine-vad"),
            PathBuf::from("/jobs/20250101-001/03_refine-vad/stage.json")
        );
        assert_eq!(
            JobLayout::relative_stage_manifest(3, "refine-vad"),
            PathBuf::from("03_refine-vad/stage.json")
        );
    }

    #[test]
    fn creates_stage_dirs_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let layout = JobLayout::new(temp_dir.path());

        layout.create_stage_dirs(&["demux", "vad"]).unwrap();

        assert!(temp_dir.path().join("01_demux").is_dir());
        assert!(temp_dir.path().join("02_vad").is_dir());
    }
}
