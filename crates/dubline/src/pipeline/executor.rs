use std::sync::Arc;

use log::debug;

use crate::error::StorageError;
use crate::processing::{MediaUpload, ProcessingBackend, ProcessingError};
use crate::storage::{BlobStore, BlobUri};

use super::error::StageError;
use super::payload::StagePayload;
use super::stage::Stage;

/// Runs one stage against the processing service and folds the response
/// into the payload. Holds no job state.
pub struct StageExecutor {
    backend: Arc<dyn ProcessingBackend>,
    blobs: Arc<dyn BlobStore>,
    outputs_bucket: String,
}

impl StageExecutor {
    pub fn new(
        backend: Arc<dyn ProcessingBackend>,
        blobs: Arc<dyn BlobStore>,
        outputs_bucket: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            blobs,
            outputs_bucket: outputs_bucket.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ProcessingBackend> {
        &self.backend
    }

    /// Object key of a job's final video in the outputs bucket.
    pub fn output_key(job_id: &str) -> String {
        format!("jobs/{}.mp4", job_id)
    }

    pub async fn execute(
        &self,
        stage: Stage,
        mut payload: StagePayload,
    ) -> Result<StagePayload, StageError> {
        let service = |source: ProcessingError| StageError::Service { stage, source };

        match stage {
            Stage::Asr => {
                let video = self.load_input(stage, &payload).await?;
                let response = self.backend.asr(video).await.map_err(service)?;
                payload.text = Some(response.text);
                payload.start = Some(response.start);
                payload.end = Some(response.end);
                payload.wav_path = Some(response.wav_path);
            }
            Stage::Punctuate => {
                let text = payload.require_text(stage)?;
                let response = self.backend.punctuate(text).await.map_err(service)?;
                payload.sentences = Some(response.sentences);
            }
            Stage::Translate => {
                let sentences = payload.require_sentences(stage)?;
                let response = self.backend.translate(sentences).await.map_err(service)?;
                payload.sw_text = Some(response.sw_text);
                payload.sw_sentences = Some(response.sw_sentences);
            }
            Stage::Tts => {
                let sw_sentences = payload.require_sw_sentences(stage)?;
                let response = self
                    .backend
                    .synthesize(sw_sentences)
                    .await
                    .map_err(service)?;
                payload.tts_path = Some(response.tts_path);
            }
            Stage::SeparateMusic => {
                let wav_path = payload.require_wav_path(stage)?;
                let response = self
                    .backend
                    .separate_music(wav_path)
                    .await
                    .map_err(service)?;
                payload.music_path = Some(response.music_path);
            }
            Stage::Mix => {
                let music_path = payload.require_music_path(stage)?;
                let voice_path = payload.require_tts_path(stage)?;
                let response = self
                    .backend
                    .mix(music_path, voice_path)
                    .await
                    .map_err(service)?;
                payload.mixed_path = Some(response.mixed_path);
            }
            Stage::ReplaceAudio => {
                let mixed_path = payload.require_mixed_path(stage)?.to_string();
                let video = self.load_input(stage, &payload).await?;
                let response = self
                    .backend
                    .mux(video, &mixed_path)
                    .await
                    .map_err(service)?;
                let bytes = self
                    .backend
                    .fetch_file(&response.output_video)
                    .await
                    .map_err(service)?;

                let key = Self::output_key(&payload.job_id);
                let uri = self
                    .blobs
                    .put(&self.outputs_bucket, &key, bytes)
                    .await
                    .map_err(|source| StageError::Storage { stage, source })?;
                payload.output_uri = Some(uri.to_string());
            }
        }

        debug!("Stage {} finished for job {}", stage, payload.job_id);
        Ok(payload)
    }

    async fn load_input(
        &self,
        stage: Stage,
        payload: &StagePayload,
    ) -> Result<MediaUpload, StageError> {
        let uri: BlobUri = payload
            .input_uri
            .parse()
            .map_err(|e: StorageError| StageError::InvalidInput {
                stage,
                message: e.to_string(),
            })?;
        let bytes = self
            .blobs
            .get(&uri.bucket, &uri.key)
            .await
            .map_err(|source| StageError::Storage { stage, source })?;
        Ok(MediaUpload::new(uri.file_name(), bytes))
    }
}
