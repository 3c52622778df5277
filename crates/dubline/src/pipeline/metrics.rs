use serde::Serialize;
use serde_json::{Map, Value};

use crate::jobs::JobStep;

use super::payload::StagePayload;

/// Text analytics derived from the transcripts of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMetrics {
    pub english_word_count: usize,
    pub swahili_word_count: usize,
    pub english_char_count: usize,
    pub swahili_char_count: usize,
    pub segment_count: usize,
    pub translation_ratio: f64,
    pub total_duration: f64,
    pub avg_segment_duration: f64,
}

/// The punctuated source transcript, or the raw ASR text when punctuation
/// never ran.
fn english_transcript(payload: &StagePayload) -> Option<String> {
    match &payload.sentences {
        Some(sentences) if !sentences.is_empty() => Some(sentences.join(" ")),
        _ => payload.text.clone(),
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl TextMetrics {
    pub fn from_payload(payload: &StagePayload) -> Self {
        let english = english_transcript(payload).unwrap_or_default();
        let swahili = payload.sw_text.as_deref().unwrap_or_default();
        let english_word_count = english.split_whitespace().count();
        let swahili_word_count = swahili.split_whitespace().count();
        let segment_count = payload.sentences.as_ref().map_or(0, Vec::len);

        let translation_ratio = if english_word_count == 0 {
            0.0
        } else {
            round_to(swahili_word_count as f64 / english_word_count as f64, 3)
        };

        let total_duration = payload
            .time_bounds()
            .map_or(0.0, |(start, end)| (end - start).max(0.0));
        let avg_segment_duration = if segment_count == 0 {
            0.0
        } else {
            round_to(total_duration / segment_count as f64, 3)
        };

        Self {
            english_word_count,
            swahili_word_count,
            english_char_count: english.chars().count(),
            swahili_char_count: swahili.chars().count(),
            segment_count,
            translation_ratio,
            total_duration: round_to(total_duration, 3),
            avg_segment_duration,
        }
    }
}

/// `{stage: duration_seconds, ..., total_duration_seconds}` over the steps
/// that recorded a duration.
pub fn pipeline_metrics(steps: &[JobStep]) -> Map<String, Value> {
    let mut metrics = Map::new();
    let mut total = 0.0;
    for step in steps {
        if let Some(seconds) = step.duration_seconds() {
            total += seconds;
            metrics.insert(step.name.clone(), Value::from(seconds));
        }
    }
    metrics.insert(
        "total_duration_seconds".to_string(),
        Value::from(round_to(total, 3)),
    );
    metrics
}

/// Transcript entries for job meta. Absent transcripts are left out.
pub fn transcripts(payload: &StagePayload) -> Map<String, Value> {
    let mut meta = Map::new();
    if let Some(english) = english_transcript(payload) {
        meta.insert("english".into(), Value::from(english));
    }
    if let Some(sw_text) = &payload.sw_text {
        meta.insert("swahili".into(), Value::from(sw_text.as_str()));
    }
    if let Some(sentences) = &payload.sentences {
        meta.insert("english_segments".into(), Value::from(sentences.clone()));
    }
    if let Some(sw_sentences) = &payload.sw_sentences {
        meta.insert("swahili_segments".into(), Value::from(sw_sentences.clone()));
    }
    meta
}
