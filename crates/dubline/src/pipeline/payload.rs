use serde::{Deserialize, Serialize};

use super::error::StageError;
use super::stage::Stage;

/// Data threaded through a job's chain of stage tasks.
///
/// `job_id`, `input_uri` and `attempt` are set when the chain is built.
/// Every other field is produced by some stage and read by later ones; a
/// stage that finds an upstream field missing fails with
/// [`StageError::MissingField`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagePayload {
    pub job_id: String,
    pub input_uri: String,
    /// The job attempt this chain belongs to.
    #[serde(default)]
    pub attempt: u32,

    // asr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_path: Option<String>,

    // punctuate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentences: Option<Vec<String>>,

    // translate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_sentences: Option<Vec<String>>,

    // tts / separate_music / mix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed_path: Option<String>,

    // replace_audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_uri: Option<String>,
}

fn required<'a, T: ?Sized>(
    stage: Stage,
    field: &'static str,
    value: Option<&'a T>,
) -> Result<&'a T, StageError> {
    value.ok_or(StageError::MissingField { stage, field })
}

impl StagePayload {
    pub fn new(job_id: impl Into<String>, input_uri: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            input_uri: input_uri.into(),
            ..Default::default()
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn require_text(&self, stage: Stage) -> Result<&str, StageError> {
        required(stage, "text", self.text.as_deref())
    }

    pub fn require_wav_path(&self, stage: Stage) -> Result<&str, StageError> {
        required(stage, "wav_path", self.wav_path.as_deref())
    }

    pub fn require_sentences(&self, stage: Stage) -> Result<&[String], StageError> {
        required(stage, "sentences", self.sentences.as_deref())
    }

    pub fn require_sw_sentences(&self, stage: Stage) -> Result<&[String], StageError> {
        required(stage, "sw_sentences", self.sw_sentences.as_deref())
    }

    pub fn require_tts_path(&self, stage: Stage) -> Result<&str, StageError> {
        required(stage, "tts_path", self.tts_path.as_deref())
    }

    pub fn require_music_path(&self, stage: Stage) -> Result<&str, StageError> {
        required(stage, "music_path", self.music_path.as_deref())
    }

    pub fn require_mixed_path(&self, stage: Stage) -> Result<&str, StageError> {
        required(stage, "mixed_path", self.mixed_path.as_deref())
    }

    /// ASR time bounds as `(start, end)`, when both are known.
    pub fn time_bounds(&self) -> Option<(f64, f64)> {
        Some((self.start?, self.end?))
    }
}
