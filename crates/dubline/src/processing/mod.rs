//! Interface to the external processing service that runs the actual
//! speech, translation and audio models.
//!
//! Each endpoint is stateless: a request carries everything the model needs
//! and the response carries paths to produced files on the service side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod error;

pub use client::HttpProcessingClient;
pub use error::ProcessingError;

/// A media file sent to the service as a multipart upload.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl MediaUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrResponse {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub wav_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunctuateResponse {
    pub sentences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub sw_text: String,
    pub sw_sentences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsResponse {
    pub tts_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparateMusicResponse {
    pub music_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixResponse {
    pub mixed_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxResponse {
    pub output_video: String,
}

/// One call per pipeline stage.
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    async fn asr(&self, video: MediaUpload) -> Result<AsrResponse, ProcessingError>;

    async fn punctuate(&self, text: &str) -> Result<PunctuateResponse, ProcessingError>;

    async fn translate(&self, sentences: &[String]) -> Result<TranslateResponse, ProcessingError>;

    async fn synthesize(&self, sw_sentences: &[String]) -> Result<TtsResponse, ProcessingError>;

    async fn separate_music(&self, wav_path: &str)
        -> Result<SeparateMusicResponse, ProcessingError>;

    async fn mix(&self, music_path: &str, voice_path: &str)
        -> Result<MixResponse, ProcessingError>;

    async fn mux(&self, video: MediaUpload, audio_path: &str)
        -> Result<MuxResponse, ProcessingError>;

    /// Downloads a file produced by an earlier call.
    async fn fetch_file(&self, path: &str) -> Result<Vec<u8>, ProcessingError>;

    async fn health(&self) -> Result<(), ProcessingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_mime_type() {
        assert_eq!(MediaUpload::new("v1.mp4", vec![]).mime_type(), "video/mp4");
        assert_eq!(
            MediaUpload::new("blob", vec![]).mime_type(),
            "application/octet-stream"
        );
    }
}
