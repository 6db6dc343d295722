//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Worker commands live under `[workers.<stage>]`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::{LogConfig, LogLevel};

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Output and cache locations.
    #[serde(default)]
    pub paths: PathSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Stage switches and timeouts.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Media cache behavior.
    #[serde(default)]
    pub cache: CacheSettings,

    /// External worker command per stage name.
    #[serde(default = "default_workers")]
    pub workers: BTreeMap<String, WorkerSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paths: PathSettings::default(),
            logging: LoggingSettings::default(),
            pipeline: PipelineSettings::default(),
            cache: CacheSettings::default(),
            workers: default_workers(),
        }
    }
}

impl Settings {
    /// Timeout for a stage: its worker's `timeout_secs`, else the pipeline default.
    pub fn timeout_for(&self, stage: &str) -> Duration {
        let secs = self
            .workers
            .get(stage)
            .and_then(|w| w.timeout_secs)
            .unwrap_or(self.pipeline.default_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.logging.level,
            compact: self.logging.compact,
            error_tail: self.logging.error_tail as usize,
            show_timestamps: self.logging.show_timestamps,
        }
    }
}

/// Top-level TOML tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSection {
    Paths,
    Logging,
    Pipeline,
    Cache,
    Workers,
}

impl ConfigSection {
    pub const ALL: [ConfigSection; 5] = [
        ConfigSection::Paths,
        ConfigSection::Logging,
        ConfigSection::Pipeline,
        ConfigSection::Cache,
        ConfigSection::Workers,
    ];

    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "paths",
            ConfigSection::Logging => "logging",
            ConfigSection::Pipeline => "pipeline",
            ConfigSection::Cache => "cache",
            ConfigSection::Workers => "workers",
        }
    }

    /// Comment written above the section in generated config files.
    pub fn comment(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "Job output root and media cache location",
            ConfigSection::Logging => "Per-job logging",
            ConfigSection::Pipeline => "Stage switches and default worker timeout",
            ConfigSection::Cache => "Content-addressed media cache",
            ConfigSection::Workers => {
                "Worker command per stage. Placeholders: {input:<key>} {output:<key>} \
                 {stage_dir} {job_dir} {config} {media}"
            }
        }
    }
}

/// Output and cache locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Root folder under which job directories are created.
    #[serde(default = "default_output_root")]
    pub output_root: String,

    /// Root folder of the media cache (shared by all jobs).
    #[serde(default = "default_cache_root")]
    pub cache_root: String,
}

fn default_output_root() -> String {
    "jobs".to_string()
}

fn default_cache_root() -> String {
    directories::ProjectDirs::from("", "", "subpipe")
        .map(|dirs| dirs.cache_dir().join("media").to_string_lossy().into_owned())
        .unwrap_or_else(|| ".cache/subpipe/media".to_string())
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            cache_root: default_cache_root(),
        }
    }
}

impl PathSettings {
    pub fn output_root(&self) -> PathBuf {
        PathBuf::from(&self.output_root)
    }

    pub fn cache_root(&self) -> PathBuf {
        PathBuf::from(&self.cache_root)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Minimum level written to the job log.
    #[serde(default)]
    pub level: LogLevel,

    /// Keep worker output out of the job log (tail buffer only).
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Number of worker output lines kept for failure diagnosis.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,

    /// Prefix log lines with the wall-clock time.
    #[serde(default = "default_true")]
    pub show_timestamps: bool,
}

fn default_true() -> bool {
    true
}

fn default_error_tail() -> u32 {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            compact: true,
            error_tail: default_error_tail(),
            show_timestamps: true,
        }
    }
}

/// Stage switches and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Worker timeout used when a worker has no `timeout_secs` of its own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Glossary for entity correction. The `correct` stage is skipped without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glossary_path: Option<String>,

    /// Subtitle translation target. The `translate` stage is skipped without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,

    /// Run speaker diarization.
    #[serde(default = "default_true")]
    pub enable_diarization: bool,

    /// Mux subtitles into the source container.
    #[serde(default = "default_true")]
    pub enable_mux: bool,
}

fn default_timeout_secs() -> u64 {
    3600
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            glossary_path: None,
            target_language: None,
            enable_diarization: true,
            enable_mux: true,
        }
    }
}

/// How media identities are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityDecoder {
    /// Decode any container with ffmpeg to canonical PCM.
    #[default]
    Ffmpeg,
    /// Read PCM directly from RIFF/WAVE files (no external tools).
    Wav,
}

/// Media cache behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Consult and populate the media cache.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Decoder used to compute media identities.
    #[serde(default)]
    pub identity_decoder: IdentityDecoder,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            identity_decoder: IdentityDecoder::default(),
        }
    }
}

/// External command for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Program and arguments. May contain placeholders.
    pub command: Vec<String>,

    /// Per-stage timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Extra environment variables for the worker process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl WorkerSettings {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            timeout_secs: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Workers that only need stock tools. Model-serving stages have no default.
fn default_workers() -> BTreeMap<String, WorkerSettings> {
    let mut workers = BTreeMap::new();
    workers.insert(
        "demux".to_string(),
        WorkerSettings::new([
            "ffmpeg",
            "-nostdin",
            "-y",
            "-v",
            "error",
            "-i",
            "{media}",
            "-vn",
            "-ac",
            "1",
            "-ar",
            "16000",
            "-c:a",
            "pcm_s16le",
            "{output:audio}",
        ])
        .with_timeout(1800),
    );
    workers.insert(
        "mux".to_string(),
        WorkerSettings::new([
            "mkvmerge",
            "-q",
            "-o",
            "{output:video}",
            "{media}",
            "{input:subtitles}",
        ])
        .with_timeout(1800),
    );
    workers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let settings: Settings = toml::from_str("[paths]\noutput_root = \"out\"\n").unwrap();

        assert_eq!(settings.paths.output_root, "out");
        assert!(!settings.paths.cache_root.is_empty());
        assert_eq!(settings.pipeline.default_timeout_secs, 3600);
        assert!(settings.cache.enabled);
        assert!(settings.workers.contains_key("demux"));
    }

    #[test]
    fn timeout_prefers_worker_override() {
        let mut settings = Settings::default();
        settings.pipeline.default_timeout_secs = 100;
        settings
            .workers
            .insert("vad".to_string(), WorkerSettings::new(["vad-worker"]).with_timeout(5));
        settings
            .workers
            .insert("diarize".to_string(), WorkerSettings::new(["diarize-worker"]));

        assert_eq!(settings.timeout_for("vad"), Duration::from_secs(5));
        assert_eq!(settings.timeout_for("diarize"), Duration::from_secs(100));
        assert_eq!(settings.timeout_for("unknown"), Duration::from_secs(100));
    }

    #[test]
    fn settings_roundtrip_through_toml() {
        let mut settings = Settings::default();
        settings.pipeline.target_language = Some("de".to_string());
        settings.cache.identity_decoder = IdentityDecoder::Wav;

        let text = toml::to_string_pretty(&settings).unwrap();
        assert!(text.contains("[workers.demux]"));
        assert!(text.contains("identity_decoder = \"wav\""));

        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(back, settings);
    }
}
