//! Closed status enums for stage and pipeline manifests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one stage execution.
///
/// Transitions are monotone: `pending -> running -> {success|failed|skipped}`,
/// plus `pending -> skipped` for stages that never start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Success,
    Skipped,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            StageStatus::Success | StageStatus::Skipped | StageStatus::Failed => true,
            StageStatus::Pending | StageStatus::Running => false,
        }
    }

    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        match (self, next) {
            (StageStatus::Pending, StageStatus::Running) => true,
            (StageStatus::Pending, StageStatus::Skipped) => true,
            (StageStatus::Running, StageStatus::Success) => true,
            (StageStatus::Running, StageStatus::Failed) => true,
            (StageStatus::Running, StageStatus::Skipped) => true,
            (StageStatus::Pending, _)
            | (StageStatus::Running, _)
            | (StageStatus::Success, _)
            | (StageStatus::Skipped, _)
            | (StageStatus::Failed, _) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Success => "success",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Overall state of a job's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
