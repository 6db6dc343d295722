//! Shared fixtures for the pipeline integration tests.
//!
//! Jobs run the standard topology against a small WAV file with in-process
//! workers that write deterministic outputs and count their calls.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use subpipe_core::cache::MediaCacheManager;
use subpipe_core::config::{IdentityDecoder, Settings};
use subpipe_core::orchestrator::{
    create_job_on, JobContext, StageRunner, Topology, WorkerOutcome, WorkerRegistry,
    WorkerRequest,
};
use tempfile::TempDir;

pub const STANDARD_STAGES: [&str; 9] = [
    "demux",
    "vad",
    "refine-vad",
    "diarize",
    "transcribe",
    "correct",
    "translate",
    "subtitles",
    "mux",
];

/// Temporary output root, cache root and input media.
pub struct Harness {
    pub dir: TempDir,
    pub settings: Settings,
    pub media: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.paths.output_root = dir.path().join("jobs").to_string_lossy().into_owned();
        settings.paths.cache_root = dir.path().join("cache").to_string_lossy().into_owned();
        settings.cache.identity_decoder = IdentityDecoder::Wav;

        let media = dir.path().join("talk.wav");
        write_wav(&media, &tone(4000, 7), 16000);

        Self {
            dir,
            settings,
            media,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a job dated 2025-01-01 for user 1.
    pub fn create_job(&self) -> JobContext {
        self.create_job_for(&self.media)
    }

    pub fn create_job_for(&self, media: &Path) -> JobContext {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let job = create_job_on(&self.settings, &Topology::standard(), date, 1, media).unwrap();
        JobContext::open(&job.job_dir, None).unwrap()
    }

    pub fn cache(&self) -> MediaCacheManager {
        MediaCacheManager::with_decoder_kind(self.settings.paths.cache_root(), IdentityDecoder::Wav)
    }

    pub fn runner(&self, workers: WorkerRegistry) -> StageRunner {
        StageRunner::new(Topology::standard(), workers).with_cache(self.cache())
    }
}

/// Every dispatch, in order, with the inputs it received.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<(String, BTreeMap<String, PathBuf>)>>>);

impl Calls {
    pub fn record(&self, request: &WorkerRequest) {
        self.0
            .lock()
            .push((request.stage.clone(), request.inputs.clone()));
    }

    pub fn count(&self, stage: &str) -> usize {
        self.0.lock().iter().filter(|(s, _)| s == stage).count()
    }

    pub fn total(&self) -> usize {
        self.0.lock().len()
    }

    /// Inputs of the most recent dispatch of `stage`.
    pub fn inputs(&self, stage: &str) -> Option<BTreeMap<String, PathBuf>> {
        self.0
            .lock()
            .iter()
            .rev()
            .find(|(s, _)| s == stage)
            .map(|(_, inputs)| inputs.clone())
    }
}

/// Worker that writes every declared output. Content depends only on the
/// stage and the names of its input files, so reruns are byte-identical.
pub fn writer(calls: &Calls) -> impl Fn(&WorkerRequest) -> WorkerOutcome + Send + Sync + 'static {
    let calls = calls.clone();
    move |request: &WorkerRequest| {
        calls.record(request);
        let sources: Vec<String> = request
            .inputs
            .iter()
            .map(|(key, path)| {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                format!("{}={}", key, name)
            })
            .collect();
        for path in request.outputs.values() {
            let content = format!("{} <- {}\n", request.stage, sources.join(", "));
            if let Err(e) = fs::write(path, content) {
                return WorkerOutcome::failed(e.to_string());
            }
        }
        WorkerOutcome::Succeeded
    }
}

/// Worker that records the call and returns `outcome`.
pub fn scripted(
    calls: &Calls,
    outcome: WorkerOutcome,
) -> impl Fn(&WorkerRequest) -> WorkerOutcome + Send + Sync + 'static {
    let calls = calls.clone();
    move |request: &WorkerRequest| {
        calls.record(request);
        outcome.clone()
    }
}

/// Writing workers for every standard stage.
pub fn standard_workers(calls: &Calls) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for stage in STANDARD_STAGES {
        registry.register(stage, writer(calls));
    }
    registry
}

/// Contents of `pipeline.json` and every `stage.json` in a job directory.
pub fn manifest_bytes(job_dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    files.insert(
        PathBuf::from("pipeline.json"),
        fs::read(job_dir.join("pipeline.json")).unwrap(),
    );
    for entry in fs::read_dir(job_dir).unwrap() {
        let stage_manifest = entry.unwrap().path().join("stage.json");
        if stage_manifest.is_file() {
            let relative = stage_manifest.strip_prefix(job_dir).unwrap().to_path_buf();
            files.insert(relative, fs::read(&stage_manifest).unwrap());
        }
    }
    files
}

pub fn tone(len: usize, step: i16) -> Vec<i16> {
    (0..len)
        .map(|i| ((i as i32 * step as i32) % 2000 - 1000) as i16)
        .collect()
}

/// Minimal 16-bit mono PCM WAV file.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) {
    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    let mut file = Vec::new();
    file.extend_from_slice(b"RIFF");
    file.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    file.extend_from_slice(b"WAVE");
    file.extend_from_slice(b"fmt ");
    file.extend_from_slice(&16u32.to_le_bytes());
    file.extend_from_slice(&1u16.to_le_bytes());
    file.extend_from_slice(&1u16.to_le_bytes());
    file.extend_from_slice(&sample_rate.to_le_bytes());
    file.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    file.extend_from_slice(&2u16.to_le_bytes());
    file.extend_from_slice(&16u16.to_le_bytes());
    file.extend_from_slice(b"data");
    file.extend_from_slice(&(data.len() as u32).to_le_bytes());
    file.extend_from_slice(&data);
    fs::write(path, file).unwrap();
}
