//! Input resolution through fallback chains.
//!
//! A reference to `stage.output` resolves to the file in that stage's
//! directory unless the stage was skipped, in which case its fallback for
//! that output is followed instead (possibly through several skipped
//! stages).

use std::path::PathBuf;

use crate::config::ConfigSnapshot;
use crate::jobs::{Job, JobLayout};
use crate::manifest::PipelineManifest;

use super::errors::{StageError, StageResult};
use super::topology::{InputSource, StageSpec, Topology};

/// An input path plus the skipped outputs it stands in for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub key: String,
    pub path: PathBuf,
    /// `stage.output` references replaced along the way, in order.
    pub substituted: Vec<String>,
}

impl ResolvedInput {
    pub fn via_fallback(&self) -> bool {
        !self.substituted.is_empty()
    }
}

/// Borrowed view of what resolution needs.
pub struct Resolver<'a> {
    pub topology: &'a Topology,
    pub manifest: &'a PipelineManifest,
    pub layout: &'a JobLayout,
    pub snapshot: &'a ConfigSnapshot,
    pub job: &'a Job,
}

impl Resolver<'_> {
    /// Resolve every declared input of `spec`.
    pub fn inputs(&self, spec: &StageSpec) -> StageResult<Vec<ResolvedInput>> {
        spec.inputs
            .iter()
            .map(|input| self.resolve(&input.key, &input.source))
            .collect()
    }

    /// Resolve one source for the input named `key`.
    pub fn resolve(&self, key: &str, source: &InputSource) -> StageResult<ResolvedInput> {
        let mut substituted = Vec::new();
        let mut current = source.clone();

        // Fallbacks always point at earlier stages, so this terminates.
        loop {
            let next = match &current {
                InputSource::Media => {
                    return Ok(ResolvedInput {
                        key: key.to_string(),
                        path: self.job.input_media.clone(),
                        substituted,
                    })
                }
                InputSource::Setting(setting) => {
                    let value = self
                        .snapshot
                        .str_value(setting)
                        .filter(|v| !v.trim().is_empty())
                        .ok_or_else(|| StageError::MissingSetting {
                            key: key.to_string(),
                            setting: setting.clone(),
                        })?;
                    return Ok(ResolvedInput {
                        key: key.to_string(),
                        path: PathBuf::from(value),
                        substituted,
                    });
                }
                InputSource::Stage { stage, output } => {
                    let spec = self
                        .topology
                        .get(stage)
                        .ok_or_else(|| StageError::Unresolvable(current.describe()))?;

                    if !self.manifest.is_skipped(stage) {
                        let path = self
                            .output_path(spec, output)
                            .ok_or_else(|| StageError::Unresolvable(current.describe()))?;
                        return Ok(ResolvedInput {
                            key: key.to_string(),
                            path,
                            substituted,
                        });
                    }

                    let next = spec
                        .fallbacks
                        .get(output)
                        .cloned()
                        .ok_or_else(|| StageError::Unresolvable(current.describe()))?;
                    substituted.push(current.describe());
                    next
                }
            };
            current = next;
        }
    }

    /// Where `spec` writes its output `key`.
    pub fn output_path(&self, spec: &StageSpec, key: &str) -> Option<PathBuf> {
        let ordinal = self.topology.ordinal(&spec.name)?;
        let output = spec.output_spec(key)?;
        Some(
            self.layout
                .stage_dir(ordinal, &spec.name)
                .join(&output.file_name),
        )
    }
}
