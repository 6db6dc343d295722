//! Per-stage manifest and its scoped recorder.
//!
//! A [`StageRecorder`] is bound to one execution of one stage. `begin`
//! persists a `running` record, `finalize` persists the terminal one and
//! consumes the recorder. A recorder dropped without `finalize` (panic
//! unwind) persists `failed` with an `abandoned` reason. If the process is
//! killed instead, the record stays `running` on disk, which the pipeline
//! treats as not completed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ManifestError, ManifestResult};
use super::status::StageStatus;
use crate::fs_utils::{file_size, read_json, write_json_atomic};

/// One declared input or output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub key: String,
    pub path: PathBuf,
    /// Whether the file existed when it was recorded.
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ArtifactRecord {
    /// Describe `path`, resolving existence and size now.
    pub fn capture(key: impl Into<String>, path: impl Into<PathBuf>, description: Option<&str>) -> Self {
        let path = path.into();
        let size = file_size(&path);
        Self {
            key: key.into(),
            exists: size.is_some(),
            size,
            path,
            description: description.map(str::to_string),
        }
    }
}

/// Persisted record of one stage execution (`stage.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageManifest {
    pub stage: String,
    /// 1-based position in the topology.
    pub ordinal: u32,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inputs: Vec<ArtifactRecord>,
    #[serde(default)]
    pub outputs: Vec<ArtifactRecord>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl StageManifest {
    pub fn new(stage: impl Into<String>, ordinal: u32) -> Self {
        Self {
            stage: stage.into(),
            ordinal,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> ManifestResult<Self> {
        read_json(path).map_err(|e| ManifestError::io(path, e))
    }

    pub fn save(&self, path: &Path) -> ManifestResult<()> {
        write_json_atomic(path, self).map_err(|e| ManifestError::io(path, e))
    }

    pub fn input(&self, key: &str) -> Option<&ArtifactRecord> {
        self.inputs.iter().find(|a| a.key == key)
    }

    pub fn output(&self, key: &str) -> Option<&ArtifactRecord> {
        self.outputs.iter().find(|a| a.key == key)
    }

    /// Metadata value as a string, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Wall-clock duration in seconds, once finished.
    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds() as f64 / 1000.0)
    }

    fn transition(&mut self, next: StageStatus) -> ManifestResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ManifestError::invalid_transition(
                &self.stage,
                self.status,
                next,
            ));
        }
        self.status = next;
        Ok(())
    }
}

fn upsert(list: &mut Vec<ArtifactRecord>, record: ArtifactRecord) {
    match list.iter_mut().find(|a| a.key == record.key) {
        Some(existing) => *existing = record,
        None => list.push(record),
    }
}

/// Scoped writer for one stage execution.
pub struct StageRecorder {
    path: PathBuf,
    manifest: StageManifest,
    finalized: bool,
}

impl StageRecorder {
    /// Start a stage: persist a `running` record at `path`.
    pub fn begin(stage: impl Into<String>, ordinal: u32, path: impl Into<PathBuf>) -> ManifestResult<Self> {
        let path = path.into();
        let mut manifest = StageManifest::new(stage, ordinal);
        manifest.transition(StageStatus::Running)?;
        manifest.started_at = Some(Utc::now());
        manifest.save(&path)?;

        tracing::debug!("Stage '{}' running ({})", manifest.stage, path.display());

        Ok(Self {
            path,
            manifest,
            finalized: false,
        })
    }

    /// Persist a `skipped` record for a stage that never starts.
    pub fn skip(
        stage: impl Into<String>,
        ordinal: u32,
        path: impl Into<PathBuf>,
        reason: &str,
    ) -> ManifestResult<StageManifest> {
        let path = path.into();
        let mut manifest = StageManifest::new(stage, ordinal);
        manifest.transition(StageStatus::Skipped)?;
        manifest.finished_at = Some(Utc::now());
        manifest
            .metadata
            .insert("reason".to_string(), reason.into());
        manifest.save(&path)?;
        Ok(manifest)
    }

    pub fn manifest(&self) -> &StageManifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an input; existence and size are captured now.
    pub fn add_input(&mut self, key: &str, path: &Path, description: Option<&str>) {
        upsert(
            &mut self.manifest.inputs,
            ArtifactRecord::capture(key, path, description),
        );
    }

    /// Record an output; existence and size are captured now.
    pub fn add_output(&mut self, key: &str, path: &Path, description: Option<&str>) {
        upsert(
            &mut self.manifest.outputs,
            ArtifactRecord::capture(key, path, description),
        );
    }

    pub fn add_metadata(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.manifest.metadata.insert(key.to_string(), value.into());
    }

    /// Persist the in-progress record without changing status.
    pub fn checkpoint(&self) -> ManifestResult<()> {
        self.manifest.save(&self.path)
    }

    /// Persist the terminal record. Consumes the recorder.
    pub fn finalize(mut self, status: StageStatus) -> ManifestResult<StageManifest> {
        if !status.is_terminal() {
            return Err(ManifestError::invalid_transition(
                &self.manifest.stage,
                self.manifest.status,
                status,
            ));
        }
        self.manifest.transition(status)?;
        self.manifest.finished_at = Some(Utc::now());
        self.manifest.save(&self.path)?;
        self.finalized = true;

        tracing::debug!("Stage '{}' finalized as {}", self.manifest.stage, status);
        Ok(self.manifest.clone())
    }
}

impl Drop for StageRecorder {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.manifest.status = StageStatus::Failed;
        self.manifest.finished_at = Some(Utc::now());
        self.manifest
            .metadata
            .insert("error".to_string(), "abandoned".into());
        if let Err(e) = self.manifest.save(&self.path) {
            tracing::error!(
                "Failed to persist abandoned stage '{}': {}",
                self.manifest.stage,
                e
            );
        }
    }
}
