//! Stage runner: the orchestration loop.
//!
//! For each stage in topology order the runner:
//!
//! 1. Skips it if the pipeline manifest lists it as completed or skipped
//! 2. Records it `skipped` with reason `disabled` if its switch is off
//! 3. Restores its outputs from the media cache on a verified hit
//! 4. Otherwise resolves inputs (through fallbacks) and dispatches the worker
//! 5. On success verifies the declared outputs and stores them in the cache
//! 6. On failure halts the job (mandatory) or skips the stage (optional)
//!
//! The stage manifest is always finalized before the pipeline manifest
//! records the outcome, so a crash in between re-runs the stage.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::cache::{CacheError, CachePhase, MediaCacheManager, MediaIdentity};
use crate::config::ConfigSnapshot;
use crate::fs_utils::sha256_file;
use crate::logging::JobLogger;
use crate::manifest::{ManifestError, PipelineManifest, PipelineStatus, StageRecorder, StageStatus};

use super::errors::{PipelineError, PipelineResult, StageError};
use super::resolve::Resolver;
use super::topology::{SecondaryKey, StageSpec, Topology};
use super::types::{JobContext, RunSummary, StageDisposition};
use super::worker::{WorkerOutcome, WorkerRegistry, WorkerRequest};

/// Drives one job's stages to completion.
pub struct StageRunner {
    topology: Topology,
    workers: WorkerRegistry,
    cache: Option<MediaCacheManager>,
}

impl StageRunner {
    pub fn new(topology: Topology, workers: WorkerRegistry) -> Self {
        Self {
            topology,
            workers,
            cache: None,
        }
    }

    /// Runner configured from a job snapshot: command workers from
    /// `[workers]` and the media cache unless `[cache] enabled = false`.
    pub fn for_snapshot(topology: Topology, snapshot: &ConfigSnapshot) -> Self {
        let settings = snapshot.settings();
        let runner = Self::new(topology, WorkerRegistry::from_settings(settings));
        if settings.cache.enabled {
            runner.with_cache(MediaCacheManager::with_decoder_kind(
                settings.paths.cache_root(),
                settings.cache.identity_decoder,
            ))
        } else {
            runner
        }
    }

    pub fn with_cache(mut self, cache: MediaCacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn cache(&self) -> Option<&MediaCacheManager> {
        self.cache.as_ref()
    }

    /// Run every stage that is not yet completed or skipped.
    ///
    /// A completed job returns immediately without touching any manifest.
    /// A failed job is refused; use [`resume`](Self::resume).
    pub fn run(&self, ctx: &JobContext) -> PipelineResult<RunSummary> {
        let job_id = ctx.job_id().to_string();
        let mut manifest = self.load_manifest(ctx)?;
        let mut summary = RunSummary::new(ctx.job_id());

        match manifest.status {
            PipelineStatus::Completed => {
                ctx.logger.info(&format!("Job {} already completed", job_id));
                summary.status = PipelineStatus::Completed;
                summary.already_done = self.done_stages(&manifest);
                return Ok(summary);
            }
            PipelineStatus::Failed => {
                return Err(PipelineError::AlreadyFailed {
                    job_id,
                    stage: manifest.next_stage().unwrap_or_default().to_string(),
                })
            }
            PipelineStatus::Running => {}
        }

        ctx.logger.section(&format!("Job {}", job_id));
        tracing::info!(
            "Running job {} from stage {:?}",
            job_id,
            manifest.next_stage()
        );

        let mut identity = IdentityState::Unknown;
        for (index, spec) in self.topology.stages().iter().enumerate() {
            if manifest.is_done(&spec.name) {
                summary.already_done.push(spec.name.clone());
                continue;
            }

            let ordinal = index as u32 + 1;
            let disposition = self.run_stage(ctx, &mut manifest, spec, ordinal, &mut identity)?;
            summary.record(&spec.name, &disposition);
        }

        summary.status = manifest.status;
        ctx.logger.success(&format!(
            "Job {} {} ({} run, {} from cache, {} skipped)",
            job_id,
            manifest.status,
            summary.executed.len(),
            summary.from_cache.len(),
            summary.skipped.len()
        ));
        ctx.logger.flush();
        Ok(summary)
    }

    /// Continue a stopped or failed job.
    ///
    /// With `force_from`, that stage and everything after it are reset to
    /// pending first, even if they had completed.
    pub fn resume(&self, ctx: &JobContext, force_from: Option<&str>) -> PipelineResult<RunSummary> {
        let job_id = ctx.job_id().to_string();
        let mut manifest = self.load_manifest(ctx)?;

        match force_from {
            Some(stage) => {
                if self.topology.get(stage).is_none() {
                    return Err(PipelineError::UnknownStage(stage.to_string()));
                }
                let reopened = manifest
                    .reopen_from(stage)
                    .map_err(manifest_err(&job_id))?;
                ctx.logger
                    .info(&format!("Forced resume, reopened: {}", reopened.join(", ")));
            }
            None => {
                manifest.mark_resumed().map_err(manifest_err(&job_id))?;
                ctx.logger.info(&format!(
                    "Resuming at {}",
                    manifest.next_stage().unwrap_or("(nothing left)")
                ));
            }
        }

        self.run(ctx)
    }

    fn load_manifest(&self, ctx: &JobContext) -> PipelineResult<PipelineManifest> {
        PipelineManifest::load_or_create(&ctx.layout, ctx.job_id(), &self.topology.stage_names())
            .map_err(manifest_err(&ctx.job_id().to_string()))
    }

    fn done_stages(&self, manifest: &PipelineManifest) -> Vec<String> {
        self.topology
            .stages()
            .iter()
            .filter(|s| manifest.is_done(&s.name))
            .map(|s| s.name.clone())
            .collect()
    }

    fn run_stage(
        &self,
        ctx: &JobContext,
        manifest: &mut PipelineManifest,
        spec: &StageSpec,
        ordinal: u32,
        identity: &mut IdentityState,
    ) -> PipelineResult<StageDisposition> {
        let job_id = ctx.job_id().to_string();
        let name = spec.name.as_str();
        let logger = ctx.logger.as_ref();
        let stage_dir = ctx.layout.stage_dir(ordinal, name);
        let stage_manifest = ctx.layout.stage_manifest(ordinal, name);

        logger.phase(name);

        if let Some(switch) = &spec.enabled_when {
            if !ctx.snapshot.is_enabled(switch) {
                StageRecorder::skip(name, ordinal, &stage_manifest, "disabled")
                    .map_err(manifest_err(&job_id))?;
                manifest
                    .record(name, StageStatus::Skipped, Some("disabled".to_string()))
                    .map_err(manifest_err(&job_id))?;
                logger.info(&format!("{} disabled ({} is off)", name, switch));
                return Ok(StageDisposition::Skipped("disabled".to_string()));
            }
        }

        fs::create_dir_all(&stage_dir).map_err(|e| PipelineError::setup(&job_id, e))?;
        manifest.mark_started(name).map_err(manifest_err(&job_id))?;
        let mut recorder =
            StageRecorder::begin(name, ordinal, &stage_manifest).map_err(manifest_err(&job_id))?;

        let prepared = {
            let resolver = Resolver {
                topology: &self.topology,
                manifest: &*manifest,
                layout: &ctx.layout,
                snapshot: &ctx.snapshot,
                job: &ctx.job,
            };
            prepare(&resolver, spec, &mut recorder)
        };
        let (inputs, outputs) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                return self.fail_stage(ctx, manifest, spec, recorder, Failure::from_error(&e));
            }
        };

        let cache_key = self.cache_key(ctx, spec, identity);
        if let Some(key) = &cache_key {
            if self.try_restore(logger, key, &stage_dir, &outputs, &mut recorder) {
                recorder.add_metadata("source", "cache");
                recorder.add_metadata("cache_identity", key.identity.as_str());
                recorder
                    .finalize(StageStatus::Success)
                    .map_err(manifest_err(&job_id))?;
                manifest
                    .record(name, StageStatus::Success, Some("cache".to_string()))
                    .map_err(manifest_err(&job_id))?;
                return Ok(StageDisposition::FromCache);
            }
        }

        for (_, path) in &outputs {
            if let Err(e) = remove_stale(path) {
                let failure = Failure::from_error(&StageError::io("remove stale output", e));
                return self.fail_stage(ctx, manifest, spec, recorder, failure);
            }
        }

        let Some(worker) = self.workers.get(name) else {
            let failure = Failure::message(format!("no worker configured for stage '{}'", name));
            return self.fail_stage(ctx, manifest, spec, recorder, failure);
        };

        let request = WorkerRequest {
            job_id: job_id.clone(),
            stage: name.to_string(),
            stage_dir: stage_dir.clone(),
            job_dir: ctx.layout.root().to_path_buf(),
            media: ctx.job.input_media.clone(),
            config: ctx.snapshot.path().to_path_buf(),
            inputs,
            outputs: outputs
                .iter()
                .map(|(key, path)| (key.clone(), path.clone()))
                .collect(),
        };
        let timeout = ctx.settings().timeout_for(name);

        recorder.add_metadata("worker", worker.describe());
        recorder.add_metadata("timeout_secs", timeout.as_secs());
        recorder.checkpoint().map_err(manifest_err(&job_id))?;

        logger.clear_tail();
        let started = Instant::now();
        let outcome = worker.dispatch(&request, timeout, logger);
        recorder.add_metadata("elapsed_secs", started.elapsed().as_secs_f64());

        if !outcome.is_success() {
            return self.fail_stage(ctx, manifest, spec, recorder, Failure::from_outcome(&outcome));
        }

        for (key, path) in &outputs {
            let description = spec.output_spec(key).and_then(|o| o.description.as_deref());
            recorder.add_output(key, path, description);
            if !path.is_file() {
                let error = StageError::MissingOutput {
                    key: key.clone(),
                    path: path.clone(),
                };
                return self.fail_stage(ctx, manifest, spec, recorder, Failure::from_error(&error));
            }
        }
        recorder.add_metadata("source", "worker");

        if let Some(key) = &cache_key {
            match self.store(key, spec, &outputs) {
                Ok(()) => recorder.add_metadata("cached", true),
                Err(e @ CacheError::Corrupted { .. }) => {
                    logger.error(&format!("Cache verification failed: {}", e));
                    recorder.add_metadata("error", e.to_string());
                    recorder
                        .finalize(StageStatus::Failed)
                        .map_err(manifest_err(&job_id))?;
                    manifest
                        .record(name, StageStatus::Failed, Some("cache corrupted".to_string()))
                        .map_err(manifest_err(&job_id))?;
                    return Err(PipelineError::cache(&job_id, name, e));
                }
                Err(e) => logger.warn(&format!("Could not cache {} outputs: {}", name, e)),
            }
        }

        recorder
            .finalize(StageStatus::Success)
            .map_err(manifest_err(&job_id))?;
        manifest
            .record(name, StageStatus::Success, None)
            .map_err(manifest_err(&job_id))?;
        logger.success(&format!("{} completed in {:.1}s", name, started.elapsed().as_secs_f64()));
        Ok(StageDisposition::Executed)
    }

    /// Apply the mandatory/optional rule to a failed stage.
    fn fail_stage(
        &self,
        ctx: &JobContext,
        manifest: &mut PipelineManifest,
        spec: &StageSpec,
        mut recorder: StageRecorder,
        failure: Failure,
    ) -> PipelineResult<StageDisposition> {
        let job_id = ctx.job_id().to_string();
        let name = spec.name.as_str();
        let logger = ctx.logger.as_ref();

        recorder.add_metadata("error", failure.reason.as_str());
        recorder.add_metadata("timed_out", failure.timed_out);
        if let Some(code) = failure.exit_code {
            recorder.add_metadata("exit_code", code);
        }
        if !failure.tail.is_empty() {
            recorder.add_metadata("stderr_tail", failure.tail.clone());
        }
        logger.show_tail(name);

        if spec.is_optional() {
            let fallbacks: serde_json::Map<String, serde_json::Value> = spec
                .fallbacks
                .iter()
                .map(|(output, source)| (output.clone(), source.describe().into()))
                .collect();
            recorder.add_metadata("tolerated", true);
            recorder.add_metadata("fallback", serde_json::Value::Object(fallbacks));
            recorder
                .finalize(StageStatus::Skipped)
                .map_err(manifest_err(&job_id))?;
            manifest
                .record(name, StageStatus::Skipped, Some(failure.reason.clone()))
                .map_err(manifest_err(&job_id))?;
            logger.warn(&format!(
                "Optional stage {} skipped: {}",
                name, failure.reason
            ));
            return Ok(StageDisposition::Skipped(failure.reason));
        }

        recorder
            .finalize(StageStatus::Failed)
            .map_err(manifest_err(&job_id))?;
        manifest
            .record(name, StageStatus::Failed, Some(failure.reason.clone()))
            .map_err(manifest_err(&job_id))?;
        logger.error(&format!("Stage {} failed: {}", name, failure.reason));
        logger.flush();
        Err(PipelineError::stage_failed(job_id, name, failure.reason))
    }

    /// Cache key for `spec`, or `None` if the stage is not cacheable or
    /// the cache can't be used for this job.
    fn cache_key(
        &self,
        ctx: &JobContext,
        spec: &StageSpec,
        identity: &mut IdentityState,
    ) -> Option<CacheKey> {
        let policy = spec.cache.as_ref()?;
        let cache = self.cache.as_ref()?;
        if !ctx.settings().cache.enabled {
            return None;
        }

        let id = identity.resolve(cache, &ctx.job.input_media, &ctx.logger)?;
        let secondary = match &policy.secondary {
            None => None,
            Some(SecondaryKey::Value(setting)) => {
                Some(ctx.snapshot.str_value(setting)?.trim().to_string())
            }
            Some(SecondaryKey::FileHash(setting)) => {
                let path = ctx.snapshot.str_value(setting)?;
                match sha256_file(Path::new(path)) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        ctx.logger
                            .warn(&format!("Cannot hash {} for cache key: {}", path, e));
                        return None;
                    }
                }
            }
        };

        Some(CacheKey {
            identity: id,
            phase: policy.phase,
            secondary,
        })
    }

    /// Restore outputs from a verified cache entry. Returns whether every
    /// declared output is now in place.
    fn try_restore(
        &self,
        logger: &JobLogger,
        key: &CacheKey,
        stage_dir: &Path,
        outputs: &[(String, PathBuf)],
        recorder: &mut StageRecorder,
    ) -> bool {
        let Some(cache) = self.cache.as_ref() else {
            return false;
        };

        let hit = match cache.get(&key.identity, key.phase, key.secondary.as_deref()) {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                logger.debug(&format!("Cache miss for {}", key));
                return false;
            }
            Err(e) => {
                logger.warn(&format!("Cache lookup failed for {}: {}", key, e));
                return false;
            }
        };

        let all_present = outputs.iter().all(|(_, path)| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| hit.artifact_path(n).is_some())
        });
        if !all_present {
            logger.warn(&format!("Cache entry {} lacks declared outputs", key));
            return false;
        }

        if let Err(e) = cache.restore(&hit, stage_dir) {
            logger.warn(&format!("Cache restore failed for {}: {}", key, e));
            return false;
        }

        for (output_key, path) in outputs {
            recorder.add_output(output_key, path, Some("restored from cache"));
        }
        logger.cache(&format!("Restored {} artifact(s) from {}", outputs.len(), key));
        true
    }

    fn store(&self, key: &CacheKey, spec: &StageSpec, outputs: &[(String, PathBuf)]) -> Result<(), CacheError> {
        let Some(cache) = self.cache.as_ref() else {
            return Ok(());
        };

        let artifacts: Vec<(&str, &Path)> = outputs
            .iter()
            .filter_map(|(output_key, path)| {
                let output = spec.output_spec(output_key)?;
                Some((output.file_name.as_str(), path.as_path()))
            })
            .collect();
        cache
            .put(&key.identity, key.phase, key.secondary.as_deref(), &artifacts)
            .map(|_| ())
    }
}

/// Resolve inputs and compute output paths, recording inputs.
fn prepare(
    resolver: &Resolver<'_>,
    spec: &StageSpec,
    recorder: &mut StageRecorder,
) -> Result<(BTreeMap<String, PathBuf>, Vec<(String, PathBuf)>), StageError> {
    let resolved = resolver.inputs(spec)?;

    let mut inputs = BTreeMap::new();
    let mut substitutions = serde_json::Map::new();
    for input in resolved {
        let description = input
            .via_fallback()
            .then(|| format!("fallback for {}", input.substituted.join(" -> ")));
        recorder.add_input(&input.key, &input.path, description.as_deref());
        if input.via_fallback() {
            substitutions.insert(input.key.clone(), input.substituted.join(" -> ").into());
        }
        if !input.path.exists() {
            return Err(StageError::MissingInput {
                key: input.key,
                path: input.path,
            });
        }
        inputs.insert(input.key, input.path);
    }
    if !substitutions.is_empty() {
        recorder.add_metadata("substituted_inputs", serde_json::Value::Object(substitutions));
    }

    let outputs = spec
        .outputs
        .iter()
        .map(|output| -> Result<(String, PathBuf), StageError> {
            let path = resolver
                .output_path(spec, &output.key)
                .ok_or_else(|| StageError::Unresolvable(format!("{}.{}", spec.name, output.key)))?;
            Ok((output.key.clone(), path))
        })
        .collect::<Result<Vec<_>, StageError>>()?;

    Ok((inputs, outputs))
}

fn remove_stale(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn manifest_err(job_id: &str) -> impl FnOnce(ManifestError) -> PipelineError + '_ {
    move |e| PipelineError::manifest(job_id, e)
}

/// Full cache coordinates for one stage.
#[derive(Debug, Clone)]
struct CacheKey {
    identity: MediaIdentity,
    phase: CachePhase,
    secondary: Option<String>,
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.identity.short(), self.phase)?;
        if let Some(secondary) = &self.secondary {
            write!(f, "/{}", secondary)?;
        }
        Ok(())
    }
}

/// Media identity, computed at most once per run.
enum IdentityState {
    Unknown,
    Known(MediaIdentity),
    Unavailable,
}

impl IdentityState {
    fn resolve(
        &mut self,
        cache: &MediaCacheManager,
        media: &Path,
        logger: &JobLogger,
    ) -> Option<MediaIdentity> {
        if matches!(self, IdentityState::Unknown) {
            *self = match cache.compute_identity(media) {
                Ok(id) => {
                    logger.cache(&format!("Media identity {}", id.short()));
                    IdentityState::Known(id)
                }
                Err(e) => {
                    logger.warn(&format!("Media cache unavailable for this job: {}", e));
                    IdentityState::Unavailable
                }
            };
        }
        match self {
            IdentityState::Known(id) => Some(id.clone()),
            IdentityState::Unknown | IdentityState::Unavailable => None,
        }
    }
}

/// Why a stage did not succeed.
struct Failure {
    reason: String,
    exit_code: Option<i32>,
    timed_out: bool,
    tail: Vec<String>,
}

impl Failure {
    fn message(reason: String) -> Self {
        Self {
            reason,
            exit_code: None,
            timed_out: false,
            tail: Vec::new(),
        }
    }

    fn from_error(error: &StageError) -> Self {
        Self::message(error.to_string())
    }

    fn from_outcome(outcome: &WorkerOutcome) -> Self {
        let reason = outcome.reason().unwrap_or_default();
        match outcome {
            WorkerOutcome::Succeeded => Self::message(reason),
            WorkerOutcome::Failed {
                exit_code,
                stderr_tail,
                ..
            } => Self {
                reason,
                exit_code: *exit_code,
                timed_out: false,
                tail: stderr_tail.clone(),
            },
            WorkerOutcome::TimedOut { stderr_tail, .. } => Self {
                reason,
                exit_code: None,
                timed_out: true,
                tail: stderr_tail.clone(),
            },
        }
    }
}
