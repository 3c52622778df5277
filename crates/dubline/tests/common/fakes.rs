//! In-process stand-ins for the processing service and the task queue.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use dubline::error::WorkerError;
use dubline::pipeline::Stage;
use dubline::processing::{
    AsrResponse, MediaUpload, MixResponse, MuxResponse, ProcessingBackend, ProcessingError,
    PunctuateResponse, SeparateMusicResponse, TranslateResponse, TtsResponse,
};
use dubline::worker::{Envelope, Task, TaskId, TaskQueue};

pub const OUTPUT_VIDEO_BYTES: &[u8] = b"dubbed-video";

/// How an injected failure presents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// A 500 response: retryable.
    Transient,
    /// A body that does not parse: permanent.
    Permanent,
}

struct FailurePlan {
    remaining: u32,
    mode: FailureMode,
}

/// Processing backend answering every endpoint with canned data, with
/// failures that can be injected per stage.
#[derive(Default)]
pub struct FakeBackend {
    failures: Mutex<HashMap<Stage, FailurePlan>>,
    calls: Mutex<HashMap<Stage, u32>>,
    uploads: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` calls of `stage` fail.
    pub fn fail_times(&self, stage: Stage, times: u32, mode: FailureMode) {
        self.failures.lock().unwrap().insert(
            stage,
            FailurePlan {
                remaining: times,
                mode,
            },
        );
    }

    pub fn fail_always(&self, stage: Stage, mode: FailureMode) {
        self.fail_times(stage, u32::MAX, mode);
    }

    pub fn calls(&self, stage: Stage) -> u32 {
        self.calls.lock().unwrap().get(&stage).copied().unwrap_or(0)
    }

    /// File names of every video uploaded to the service.
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    fn enter(&self, stage: Stage, endpoint: &'static str) -> Result<(), ProcessingError> {
        *self.calls.lock().unwrap().entry(stage).or_insert(0) += 1;

        let mut failures = self.failures.lock().unwrap();
        let Some(plan) = failures.get_mut(&stage) else {
            return Ok(());
        };
        if plan.remaining == 0 {
            return Ok(());
        }
        if plan.remaining != u32::MAX {
            plan.remaining -= 1;
        }
        Err(match plan.mode {
            FailureMode::Transient => ProcessingError::Status {
                endpoint,
                status: 500,
                message: format!("{} model crashed", stage),
            },
            FailureMode::Permanent => ProcessingError::MalformedResponse {
                endpoint,
                message: "expected value at line 1 column 1".to_string(),
            },
        })
    }
}

#[async_trait]
impl ProcessingBackend for FakeBackend {
    async fn asr(&self, video: MediaUpload) -> Result<AsrResponse, ProcessingError> {
        self.enter(Stage::Asr, "/asr")?;
        self.uploads.lock().unwrap().push(video.file_name);
        Ok(AsrResponse {
            text: "hello there my friend".to_string(),
            start: 0.0,
            end: 8.0,
            wav_path: "/work/audio.wav".to_string(),
        })
    }

    async fn punctuate(&self, _text: &str) -> Result<PunctuateResponse, ProcessingError> {
        self.enter(Stage::Punctuate, "/punctuate")?;
        Ok(PunctuateResponse {
            sentences: vec!["Hello there.".to_string(), "My friend.".to_string()],
        })
    }

    async fn translate(&self, sentences: &[String]) -> Result<TranslateResponse, ProcessingError> {
        self.enter(Stage::Translate, "/mt")?;
        let sw_sentences: Vec<String> = sentences
            .iter()
            .map(|s| format!("[sw] {}", s))
            .collect();
        Ok(TranslateResponse {
            sw_text: "habari rafiki yangu".to_string(),
            sw_sentences,
        })
    }

    async fn synthesize(&self, _sw_sentences: &[String]) -> Result<TtsResponse, ProcessingError> {
        self.enter(Stage::Tts, "/tts")?;
        Ok(TtsResponse {
            tts_path: "/work/tts.wav".to_string(),
        })
    }

    async fn separate_music(
        &self,
        _wav_path: &str,
    ) -> Result<SeparateMusicResponse, ProcessingError> {
        self.enter(Stage::SeparateMusic, "/separate_music")?;
        Ok(SeparateMusicResponse {
            music_path: "/work/music.wav".to_string(),
        })
    }

    async fn mix(&self, _music_path: &str, _voice_path: &str) -> Result<MixResponse, ProcessingError> {
        self.enter(Stage::Mix, "/mix")?;
        Ok(MixResponse {
            mixed_path: "/work/mixed.wav".to_string(),
        })
    }

    async fn mux(&self, video: MediaUpload, _audio_path: &str) -> Result<MuxResponse, ProcessingError> {
        self.enter(Stage::ReplaceAudio, "/mux")?;
        self.uploads.lock().unwrap().push(video.file_name);
        Ok(MuxResponse {
            output_video: "/work/out.mp4".to_string(),
        })
    }

    async fn fetch_file(&self, _path: &str) -> Result<Vec<u8>, ProcessingError> {
        Ok(OUTPUT_VIDEO_BYTES.to_vec())
    }

    async fn health(&self) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// Queue that only records tasks; tests hand them to the orchestrator.
/// Delays are recorded but not waited for.
#[derive(Default)]
pub struct ManualQueue {
    pending: Mutex<VecDeque<Envelope>>,
    delays: Mutex<Vec<(String, Duration)>>,
}

impl ManualQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<Envelope> {
        self.pending.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels of the pending tasks, in queue order.
    pub fn pending_labels(&self) -> Vec<&'static str> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.task.label())
            .collect()
    }

    /// Every `(label, delay)` ever enqueued.
    pub fn delays(&self) -> Vec<(String, Duration)> {
        self.delays.lock().unwrap().clone()
    }

    /// Delays of the tasks enqueued for `stage` with a non-zero delay.
    pub fn backoffs(&self, stage: Stage) -> Vec<Duration> {
        self.delays()
            .into_iter()
            .filter(|(label, delay)| label == stage.as_str() && !delay.is_zero())
            .map(|(_, delay)| delay)
            .collect()
    }
}

impl TaskQueue for ManualQueue {
    fn enqueue(&self, task: Task, delay: Duration) -> Result<TaskId, WorkerError> {
        let id = TaskId::generate();
        self.delays
            .lock()
            .unwrap()
            .push((task.label().to_string(), delay));
        self.pending.lock().unwrap().push_back(Envelope {
            id: id.clone(),
            task,
        });
        Ok(id)
    }
}
