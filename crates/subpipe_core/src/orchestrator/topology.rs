//! Declarative stage topology.
//!
//! The topology is the single place that says which stages exist, in what
//! order, what they read and write, whether their failure is tolerated and
//! which upstream artifact stands in for their outputs when they are
//! skipped. It is validated once at construction.

use std::collections::{BTreeMap, HashSet};

use crate::cache::CachePhase;
use crate::jobs::STAGE_MANIFEST_FILE;

use super::errors::{PipelineError, PipelineResult};

/// Whether a stage's failure halts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Failure or timeout fails the job.
    Mandatory,
    /// Failure or timeout skips the stage; fallbacks stand in for its outputs.
    Optional,
}

/// Where a stage input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// The job's input media file.
    Media,
    /// A declared output of an earlier stage.
    Stage { stage: String, output: String },
    /// A file path read from the config snapshot (dotted key).
    Setting(String),
}

impl InputSource {
    pub fn stage(stage: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            output: output.into(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            InputSource::Media => "media".to_string(),
            InputSource::Stage { stage, output } => format!("{}.{}", stage, output),
            InputSource::Setting(key) => format!("setting {}", key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    pub key: String,
    pub source: InputSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub key: String,
    /// File name inside the stage directory.
    pub file_name: String,
    pub description: Option<String>,
}

/// Secondary cache key for phases that need one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondaryKey {
    /// SHA-256 of the file named by a snapshot setting.
    FileHash(String),
    /// The string value of a snapshot setting.
    Value(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub phase: CachePhase,
    pub secondary: Option<SecondaryKey>,
}

/// One row of the topology table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    pub inputs: Vec<StageInput>,
    pub outputs: Vec<StageOutput>,
    /// Output key -> artifact used in its place when this stage is skipped.
    pub fallbacks: BTreeMap<String, InputSource>,
    pub cache: Option<CachePolicy>,
    /// Snapshot key that must be enabled for this stage to run.
    pub enabled_when: Option<String>,
}

impl StageSpec {
    pub fn mandatory(name: impl Into<String>) -> Self {
        Self::with_kind(name, StageKind::Mandatory)
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self::with_kind(name, StageKind::Optional)
    }

    fn with_kind(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fallbacks: BTreeMap::new(),
            cache: None,
            enabled_when: None,
        }
    }

    pub fn input(mut self, key: impl Into<String>, source: InputSource) -> Self {
        self.inputs.push(StageInput {
            key: key.into(),
            source,
        });
        self
    }

    pub fn output(mut self, key: impl Into<String>, file_name: impl Into<String>) -> Self {
        self.outputs.push(StageOutput {
            key: key.into(),
            file_name: file_name.into(),
            description: None,
        });
        self
    }

    /// Attach a description to the most recently declared output.
    pub fn described(mut self, description: impl Into<String>) -> Self {
        if let Some(last) = self.outputs.last_mut() {
            last.description = Some(description.into());
        }
        self
    }

    pub fn fallback(mut self, output: impl Into<String>, source: InputSource) -> Self {
        self.fallbacks.insert(output.into(), source);
        self
    }

    pub fn cached(mut self, phase: CachePhase, secondary: Option<SecondaryKey>) -> Self {
        self.cache = Some(CachePolicy { phase, secondary });
        self
    }

    pub fn enabled_when(mut self, key: impl Into<String>) -> Self {
        self.enabled_when = Some(key.into());
        self
    }

    pub fn is_optional(&self) -> bool {
        self.kind == StageKind::Optional
    }

    pub fn output_spec(&self, key: &str) -> Option<&StageOutput> {
        self.outputs.iter().find(|o| o.key == key)
    }
}

/// Validated, ordered list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    stages: Vec<StageSpec>,
}

impl Topology {
    pub fn new(stages: Vec<StageSpec>) -> PipelineResult<Self> {
        validate(&stages)?;
        Ok(Self { stages })
    }

    /// demux, vad, refine-vad, diarize, transcribe, correct, translate,
    /// subtitles, mux.
    pub fn standard() -> Self {
        let stages = vec![
            StageSpec::mandatory("demux")
                .input("media", InputSource::Media)
                .output("audio", "audio.wav")
                .described("16 kHz mono PCM"),
            StageSpec::mandatory("vad")
                .input("audio", InputSource::stage("demux", "audio"))
                .output("segments", "vad.json")
                .described("speech segments"),
            StageSpec::optional("refine-vad")
                .input("audio", InputSource::stage("demux", "audio"))
                .input("segments", InputSource::stage("vad", "segments"))
                .output("segments", "vad_refined.json")
                .described("refined speech segments")
                .fallback("segments", InputSource::stage("vad", "segments")),
            StageSpec::optional("diarize")
                .input("audio", InputSource::stage("demux", "audio"))
                .input("segments", InputSource::stage("refine-vad", "segments"))
                .output("speakers", "speakers.json")
                .described("segments with speaker labels")
                .fallback("speakers", InputSource::stage("refine-vad", "segments"))
                .enabled_when("pipeline.enable_diarization"),
            StageSpec::mandatory("transcribe")
                .input("audio", InputSource::stage("demux", "audio"))
                .input("segments", InputSource::stage("refine-vad", "segments"))
                .output("transcript", "transcript.json")
                .described("recognized text")
                .cached(CachePhase::Baseline, None),
            StageSpec::optional("correct")
                .input("transcript", InputSource::stage("transcribe", "transcript"))
                .input("speakers", InputSource::stage("diarize", "speakers"))
                .input(
                    "glossary",
                    InputSource::Setting("pipeline.glossary_path".to_string()),
                )
                .output("transcript", "corrected.json")
                .described("entity-corrected text")
                .fallback("transcript", InputSource::stage("transcribe", "transcript"))
                .cached(
                    CachePhase::Glossary,
                    Some(SecondaryKey::FileHash("pipeline.glossary_path".to_string())),
                )
                .enabled_when("pipeline.glossary_path"),
            StageSpec::optional("translate")
                .input("transcript", InputSource::stage("correct", "transcript"))
                .output("transcript", "translated.json")
                .described("translated text")
                .fallback("transcript", InputSource::stage("correct", "transcript"))
                .cached(
                    CachePhase::Translation,
                    Some(SecondaryKey::Value("pipeline.target_language".to_string())),
                )
                .enabled_when("pipeline.target_language"),
            StageSpec::mandatory("subtitles")
                .input("transcript", InputSource::stage("translate", "transcript"))
                .output("subtitles", "subtitles.srt")
                .described("SubRip subtitles"),
            StageSpec::optional("mux")
                .input("media", InputSource::Media)
                .input("subtitles", InputSource::stage("subtitles", "subtitles"))
                .output("video", "muxed.mkv")
                .described("media with embedded subtitles")
                .enabled_when("pipeline.enable_mux"),
        ];

        Self { stages }
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// 0-based position of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// 1-based ordinal used for stage directory names.
    pub fn ordinal(&self, name: &str) -> Option<u32> {
        self.position(name).map(|i| i as u32 + 1)
    }
}

fn validate(stages: &[StageSpec]) -> PipelineResult<()> {
    let fail = |message: String| Err(PipelineError::InvalidTopology(message));

    if stages.is_empty() {
        return fail("topology has no stages".to_string());
    }

    let mut cache_phases = HashSet::new();
    for (index, spec) in stages.iter().enumerate() {
        let earlier = &stages[..index];

        if spec.name.is_empty() || spec.name.contains(['/', '\\', '.']) {
            return fail(format!("invalid stage name '{}'", spec.name));
        }
        if earlier.iter().any(|s| s.name == spec.name) {
            return fail(format!("duplicate stage '{}'", spec.name));
        }

        let mut keys = HashSet::new();
        let mut files = HashSet::new();
        for output in &spec.outputs {
            if !keys.insert(output.key.as_str()) {
                return fail(format!("{}: duplicate output '{}'", spec.name, output.key));
            }
            if output.file_name == STAGE_MANIFEST_FILE
                || output.file_name.is_empty()
                || output.file_name.starts_with('.')
                || output.file_name.contains(['/', '\\'])
                || !files.insert(output.file_name.as_str())
            {
                return fail(format!(
                    "{}: invalid output file name '{}'",
                    spec.name, output.file_name
                ));
            }
        }

        let mut input_keys = HashSet::new();
        for input in &spec.inputs {
            if !input_keys.insert(input.key.as_str()) {
                return fail(format!("{}: duplicate input '{}'", spec.name, input.key));
            }
            check_source(earlier, &spec.name, &input.source)?;
        }

        match spec.kind {
            StageKind::Mandatory => {
                if !spec.fallbacks.is_empty() {
                    return fail(format!("{}: mandatory stages have no fallbacks", spec.name));
                }
                if spec.enabled_when.is_some() {
                    return fail(format!("{}: mandatory stages cannot be disabled", spec.name));
                }
            }
            StageKind::Optional => {
                for (output, source) in &spec.fallbacks {
                    if spec.output_spec(output).is_none() {
                        return fail(format!(
                            "{}: fallback for undeclared output '{}'",
                            spec.name, output
                        ));
                    }
                    if matches!(source, InputSource::Setting(_)) {
                        return fail(format!(
                            "{}: fallback for '{}' must be media or an upstream output",
                            spec.name, output
                        ));
                    }
                    check_source(earlier, &spec.name, source)?;
                }
            }
        }

        if let Some(policy) = &spec.cache {
            if !cache_phases.insert(policy.phase) {
                return fail(format!("{}: cache phase '{}' used twice", spec.name, policy.phase));
            }
            if policy.phase.requires_secondary() != policy.secondary.is_some() {
                return fail(format!(
                    "{}: cache phase '{}' secondary key mismatch",
                    spec.name, policy.phase
                ));
            }
        }
    }
    Ok(())
}

/// `source` must name an output of an earlier stage; an optional stage's
/// output must be covered by that stage's fallbacks.
fn check_source(earlier: &[StageSpec], stage: &str, source: &InputSource) -> PipelineResult<()> {
    let InputSource::Stage {
        stage: upstream,
        output,
    } = source
    else {
        return Ok(());
    };

    let Some(upstream_spec) = earlier.iter().find(|s| &s.name == upstream) else {
        return Err(PipelineError::InvalidTopology(format!(
            "{}: '{}' is not an earlier stage",
            stage, upstream
        )));
    };
    if upstream_spec.output_spec(output).is_none() {
        return Err(PipelineError::InvalidTopology(format!(
            "{}: '{}' has no output '{}'",
            stage, upstream, output
        )));
    }
    if upstream_spec.is_optional() && !upstream_spec.fallbacks.contains_key(output) {
        return Err(PipelineError::InvalidTopology(format!(
            "{}: optional stage '{}' has no fallback for '{}'",
            stage, upstream, output
        )));
    }
    Ok(())
}
