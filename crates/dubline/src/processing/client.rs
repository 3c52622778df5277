use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProcessingConfig;

use super::{
    AsrResponse, MediaUpload, MixResponse, MuxResponse, ProcessingBackend, ProcessingError,
    PunctuateResponse, SeparateMusicResponse, TranslateResponse, TtsResponse,
};

/// Error body returned by the service on 4xx/5xx.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the processing service.
///
/// Model calls legitimately run for minutes, so the request timeout is
/// taken from configuration rather than a short fixed default.
pub struct HttpProcessingClient {
    client: Client,
    base_url: String,
}

impl HttpProcessingClient {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ProcessingError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProcessingError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ProcessingConfig) -> Result<Self, ProcessingError> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.connect_timeout_seconds),
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn send(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, ProcessingError> {
        debug!("Calling processing service {}", endpoint);
        let response = request
            .send()
            .await
            .map_err(|e| ProcessingError::from_reqwest(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(ProcessingError::Status {
                endpoint,
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ProcessingError> {
        self.send(endpoint, request)
            .await?
            .json()
            .await
            .map_err(|e| ProcessingError::from_reqwest(endpoint, e))
    }

    fn video_part(endpoint: &'static str, video: MediaUpload) -> Result<Part, ProcessingError> {
        let mime = video.mime_type();
        Part::bytes(video.bytes)
            .file_name(video.file_name)
            .mime_str(&mime)
            .map_err(|e| ProcessingError::Transport {
                endpoint,
                message: format!("invalid upload content type '{}': {}", mime, e),
            })
    }
}

#[async_trait]
impl ProcessingBackend for HttpProcessingClient {
    async fn asr(&self, video: MediaUpload) -> Result<AsrResponse, ProcessingError> {
        let form = Form::new().part("video", Self::video_part("/asr", video)?);
        let request = self.client.post(self.url("/asr")).multipart(form);
        self.call_json("/asr", request).await
    }

    async fn punctuate(&self, text: &str) -> Result<PunctuateResponse, ProcessingError> {
        let request = self
            .client
            .post(self.url("/punctuate"))
            .json(&json!({ "text": text }));
        self.call_json("/punctuate", request).await
    }

    async fn translate(&self, sentences: &[String]) -> Result<TranslateResponse, ProcessingError> {
        let request = self
            .client
            .post(self.url("/mt"))
            .json(&json!({ "sentences": sentences }));
        self.call_json("/mt", request).await
    }

    async fn synthesize(&self, sw_sentences: &[String]) -> Result<TtsResponse, ProcessingError> {
        let request = self
            .client
            .post(self.url("/tts"))
            .json(&json!({ "sw_sentences": sw_sentences }));
        self.call_json("/tts", request).await
    }

    async fn separate_music(
        &self,
        wav_path: &str,
    ) -> Result<SeparateMusicResponse, ProcessingError> {
        let request = self
            .client
            .post(self.url("/separate_music"))
            .json(&json!({ "wav_path": wav_path }));
        self.call_json("/separate_music", request).await
    }

    async fn mix(&self, music_path: &str, voice_path: &str) -> Result<MixResponse, ProcessingError> {
        let request = self
            .client
            .post(self.url("/mix"))
            .json(&json!({ "music_path": music_path, "voice_path": voice_path }));
        self.call_json("/mix", request).await
    }

    async fn mux(&self, video: MediaUpload, audio_path: &str) -> Result<MuxResponse, ProcessingError> {
        let form = Form::new()
            .part("video", Self::video_part("/mux", video)?)
            .text("audio_path", audio_path.to_string());
        let request = self.client.post(self.url("/mux")).multipart(form);
        self.call_json("/mux", request).await
    }

    async fn fetch_file(&self, path: &str) -> Result<Vec<u8>, ProcessingError> {
        let request = self
            .client
            .get(self.url("/files"))
            .query(&[("path", path)]);
        let bytes = self
            .send("/files", request)
            .await?
            .bytes()
            .await
            .map_err(|e| ProcessingError::from_reqwest("/files", e))?;
        Ok(bytes.to_vec())
    }

    async fn health(&self) -> Result<(), ProcessingError> {
        let request = self.client.get(self.url("/health"));
        self.send("/health", request).await?;
        Ok(())
    }
}
