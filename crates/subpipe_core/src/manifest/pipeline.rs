//! Pipeline manifest (`pipeline.json`).
//!
//! Aggregates per-stage state for one job. `next_stage` is persisted and
//! recomputed on every `record`: it is always the first topology entry that
//! is in neither `completed` nor `skipped`. Every mutation is written
//! atomically before the call returns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ManifestError, ManifestResult};
use super::status::{PipelineStatus, StageStatus};
use crate::fs_utils::{read_json, write_json_atomic};
use crate::jobs::{JobId, JobLayout};

/// Per-stage entry in the pipeline manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub status: StageStatus,
    pub ordinal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Stage manifest location relative to the job root.
    pub manifest: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineManifest {
    pub job_id: JobId,
    /// Stage names in topology order.
    pub stages: Vec<String>,
    /// Stages finished successfully, in topology order.
    pub completed: Vec<String>,
    /// Stages skipped (disabled or tolerated failure), in topology order.
    pub skipped: Vec<String>,
    pub next_stage: Option<String>,
    pub status: PipelineStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub stage_records: BTreeMap<String, StageSummary>,

    #[serde(skip)]
    path: PathBuf,
}

impl PipelineManifest {
    /// Load the job's manifest, or create and persist a fresh one.
    ///
    /// An existing manifest must list exactly `stages`. Loading never
    /// writes.
    pub fn load_or_create<S: AsRef<str>>(
        layout: &JobLayout,
        job_id: JobId,
        stages: &[S],
    ) -> ManifestResult<Self> {
        let path = layout.pipeline_manifest();
        let expected: Vec<String> = stages.iter().map(|s| s.as_ref().to_string()).collect();

        if path.exists() {
            let manifest = Self::load(&path)?;
            if manifest.stages != expected {
                return Err(ManifestError::TopologyMismatch {
                    expected,
                    found: manifest.stages,
                });
            }
            return Ok(manifest);
        }

        let stage_records = expected
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let ordinal = i as u32 + 1;
                let summary = StageSummary {
                    status: StageStatus::Pending,
                    ordinal,
                    notes: None,
                    manifest: JobLayout::relative_stage_manifest(ordinal, name),
                };
                (name.clone(), summary)
            })
            .collect();

        let mut manifest = Self {
            job_id,
            next_stage: expected.first().cloned(),
            stages: expected,
            completed: Vec::new(),
            skipped: Vec::new(),
            status: PipelineStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            stage_records,
            path,
        };
        if manifest.next_stage.is_none() {
            manifest.status = PipelineStatus::Completed;
            manifest.completed_at = Some(manifest.created_at);
        }
        manifest.save()?;

        tracing::info!("Created pipeline manifest for job {}", manifest.job_id);
        Ok(manifest)
    }

    pub fn load(path: &Path) -> ManifestResult<Self> {
        let mut manifest: Self = read_json(path).map_err(|e| ManifestError::io(path, e))?;
        manifest.path = path.to_path_buf();
        Ok(manifest)
    }

    pub fn save(&self) -> ManifestResult<()> {
        write_json_atomic(&self.path, self).map_err(|e| ManifestError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_stage(&self) -> Option<&str> {
        self.next_stage.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// Whether `stage` is in the completed or skipped set.
    pub fn is_done(&self, stage: &str) -> bool {
        self.completed.iter().any(|s| s == stage) || self.skipped.iter().any(|s| s == stage)
    }

    pub fn is_skipped(&self, stage: &str) -> bool {
        self.skipped.iter().any(|s| s == stage)
    }

    pub fn stage_status(&self, stage: &str) -> Option<StageStatus> {
        self.stage_records.get(stage).map(|s| s.status)
    }

    pub fn summary(&self, stage: &str) -> Option<&StageSummary> {
        self.stage_records.get(stage)
    }

    /// Mark `stage` as running and persist.
    pub fn mark_started(&mut self, stage: &str) -> ManifestResult<()> {
        let summary = self
            .stage_records
            .get_mut(stage)
            .ok_or_else(|| ManifestError::UnknownStage(stage.to_string()))?;
        summary.status = StageStatus::Running;
        summary.notes = None;
        self.status = PipelineStatus::Running;
        self.save()
    }

    /// Record a stage outcome and persist.
    ///
    /// `success` adds the stage to `completed`, `skipped` to `skipped`, and
    /// `failed` removes it from both and fails the pipeline. The next-stage
    /// pointer and overall status are recomputed in every case.
    pub fn record(
        &mut self,
        stage: &str,
        status: StageStatus,
        notes: Option<String>,
    ) -> ManifestResult<()> {
        if !status.is_terminal() {
            let from = self.stage_status(stage).unwrap_or_default();
            return Err(ManifestError::invalid_transition(stage, from, status));
        }
        let summary = self
            .stage_records
            .get_mut(stage)
            .ok_or_else(|| ManifestError::UnknownStage(stage.to_string()))?;
        summary.status = status;
        summary.notes = notes;

        self.completed.retain(|s| s != stage);
        self.skipped.retain(|s| s != stage);
        match status {
            StageStatus::Success => self.completed.push(stage.to_string()),
            StageStatus::Skipped => self.skipped.push(stage.to_string()),
            StageStatus::Failed | StageStatus::Pending | StageStatus::Running => {}
        }
        self.sort_sets();
        self.next_stage = self.first_open_stage();

        self.status = match (status, &self.next_stage) {
            (StageStatus::Failed, _) => PipelineStatus::Failed,
            (_, None) => PipelineStatus::Completed,
            (_, Some(_)) => PipelineStatus::Running,
        };
        self.completed_at = match self.status {
            PipelineStatus::Completed => Some(Utc::now()),
            PipelineStatus::Running | PipelineStatus::Failed => None,
        };

        self.save()
    }

    /// Reset `stage` and every stage after it to pending (forced resume).
    ///
    /// Returns the reopened stage names.
    pub fn reopen_from(&mut self, stage: &str) -> ManifestResult<Vec<String>> {
        let start = self
            .stages
            .iter()
            .position(|s| s == stage)
            .ok_or_else(|| ManifestError::UnknownStage(stage.to_string()))?;

        let reopened: Vec<String> = self.stages[start..].to_vec();
        self.completed.retain(|s| !reopened.contains(s));
        self.skipped.retain(|s| !reopened.contains(s));
        for name in &reopened {
            if let Some(summary) = self.stage_records.get_mut(name) {
                summary.status = StageStatus::Pending;
                summary.notes = None;
            }
        }

        self.next_stage = self.first_open_stage();
        self.status = PipelineStatus::Running;
        self.completed_at = None;
        self.save()?;

        tracing::info!("Job {} reopened from stage '{}'", self.job_id, stage);
        Ok(reopened)
    }

    /// Put a failed pipeline back into `running` so it can be resumed.
    pub fn mark_resumed(&mut self) -> ManifestResult<()> {
        if self.status != PipelineStatus::Failed {
            return Ok(());
        }
        self.status = PipelineStatus::Running;
        self.save()
    }

    fn first_open_stage(&self) -> Option<String> {
        self.stages.iter().find(|s| !self.is_done(s)).cloned()
    }

    fn sort_sets(&mut self) {
        let position = |name: &String| self.stages.iter().position(|s| s == name);
        let mut completed = std::mem::take(&mut self.completed);
        let mut skipped = std::mem::take(&mut self.skipped);
        completed.sort_by_key(position);
        skipped.sort_by_key(position);
        self.completed = completed;
        self.skipped = skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    const STAGES: [&str; 4] = ["demux", "vad", "refine-vad", "transcribe"];

    fn job_id() -> JobId {
        JobId::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), 1)
    }

    fn fresh(dir: &Path) -> PipelineManifest {
        PipelineManifest::load_or_create(&JobLayout::new(dir), job_id(), &STAGES).unwrap()
    }

    #[test]
    fn create_persists_pending_pipeline() {
        let dir = tempdir().unwrap();
        let manifest = fresh(dir.path());

        assert_eq!(manifest.next_stage(), Some("demux"));
        assert_eq!(manifest.status, PipelineStatus::Running);
        assert_eq!(manifest.stage_status("vad"), Some(StageStatus::Pending));
        assert_eq!(
            manifest.summary("vad").unwrap().manifest,
            PathBuf::from("02_vad/stage.json")
        );
        assert!(dir.path().join("pipeline.json").exists());
    }

    #[test]
    fn record_advances_next_stage_and_persists() {
        let dir = tempdir().unwrap();
        let mut manifest = fresh(dir.path());

        manifest.record("demux", StageStatus::Success, None).unwrap();
        manifest.record("vad", StageStatus::Success, None).unwrap();
        manifest
            .record("refine-vad", StageStatus::Skipped, Some("timed out".into()))
            .unwrap();

        let reloaded = PipelineManifest::load(&dir.path().join("pipeline.json")).unwrap();
        assert_eq!(reloaded.next_stage(), Some("transcribe"));
        assert_eq!(reloaded.completed, vec!["demux", "vad"]);
        assert_eq!(reloaded.skipped, vec!["refine-vad"]);
        assert_eq!(
            reloaded.summary("refine-vad").unwrap().notes.as_deref(),
            Some("timed out")
        );
    }

    #[test]
    fn stage_is_in_at_most_one_set() {
        let dir = tempdir().unwrap();
        let mut manifest = fresh(dir.path());

        manifest.record("demux", StageStatus::Skipped, None).unwrap();
        manifest.record("demux", StageStatus::Success, None).unwrap();

        assert_eq!(manifest.completed, vec!["demux"]);
        assert!(manifest.skipped.is_empty());
    }

    #[test]
    fn final_record_completes_pipeline() {
        let dir = tempdir().unwrap();
        let mut manifest = fresh(dir.path());

        for stage in STAGES {
            manifest.record(stage, StageStatus::Success, None).unwrap();
        }

        assert!(manifest.is_completed());
        assert!(manifest.completed_at.is_some());
        assert_eq!(manifest.next_stage(), None);
    }

    #[test]
    fn failure_keeps_pointer_on_failed_stage() {
        let dir = tempdir().unwrap();
        let mut manifest = fresh(dir.path());

        manifest.record("demux", StageStatus::Success, None).unwrap();
        manifest.mark_started("vad").unwrap();
        manifest
            .record("vad", StageStatus::Failed, Some("exit 1".into()))
            .unwrap();

        assert_eq!(manifest.status, PipelineStatus::Failed);
        assert_eq!(manifest.next_stage(), Some("vad"));

        manifest.mark_resumed().unwrap();
        assert_eq!(manifest.status, PipelineStatus::Running);
    }

    #[test]
    fn reopen_from_resets_downstream() {
        let dir = tempdir().unwrap();
        let mut manifest = fresh(dir.path());
        for stage in STAGES {
            manifest.record(stage, StageStatus::Success, None).unwrap();
        }

        let reopened = manifest.reopen_from("refine-vad").unwrap();

        assert_eq!(reopened, vec!["refine-vad", "transcribe"]);
        assert_eq!(manifest.completed, vec!["demux", "vad"]);
        assert_eq!(manifest.next_stage(), Some("refine-vad"));
        assert_eq!(manifest.status, PipelineStatus::Running);
        assert!(manifest.completed_at.is_none());
        assert_eq!(
            manifest.stage_status("transcribe"),
            Some(StageStatus::Pending)
        );
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let dir = tempdir().unwrap();
        let mut manifest = fresh(dir.path());

        assert!(matches!(
            manifest.record("ocr", StageStatus::Success, None),
            Err(ManifestError::UnknownStage(_))
        ));
        assert!(matches!(
            manifest.record("vad", StageStatus::Running, None),
            Err(ManifestError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn loading_existing_manifest_does_not_rewrite() {
        let dir = tempdir().unwrap();
        let mut manifest = fresh(dir.path());
        manifest.record("demux", StageStatus::Success, None).unwrap();
        let before = fs::read(dir.path().join("pipeline.json")).unwrap();

        let again = fresh(dir.path());

        assert_eq!(again.completed, vec!["demux"]);
        assert_eq!(fs::read(dir.path().join("pipeline.json")).unwrap(), before);
    }

    #[test]
    fn topology_mismatch_is_reported() {
        let dir = tempdir().unwrap();
        fresh(dir.path());

        let err = PipelineManifest::load_or_create(
            &JobLayout::new(dir.path()),
            job_id(),
            &["demux", "transcribe"],
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::TopologyMismatch { .. }));
    }
}
