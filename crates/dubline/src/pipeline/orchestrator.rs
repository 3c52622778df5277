//! Drives jobs through the stage chain.
//!
//! The chain runs one task per stage. A stage task executes its stage,
//! records the outcome in the ledger and schedules the next stage, or the
//! finalizer after the last one. Retryable failures reschedule the same
//! stage with backoff; the retry number always comes from the persisted
//! step row.
//!
//! Every task carries the job attempt it was scheduled under. A manual
//! retry opens a new attempt, so tasks left over from an earlier chain are
//! dropped instead of running inside the new one.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::config::Config;
use crate::jobs::{Job, JobState, JobStatusView, Ledger, StepState};
use crate::processing::{ProcessingBackend, ProcessingError};
use crate::storage::{BlobStore, BlobUri};
use crate::worker::{Envelope, Task, TaskHandler, TaskId, TaskQueue};

use super::error::OrchestratorError;
use super::executor::StageExecutor;
use super::finalizer::finalize;
use super::payload::StagePayload;
use super::retry::{RetryDecision, RetryPolicy};
use super::stage::Stage;

/// Error recorded on jobs whose chain was lost when the worker stopped.
pub const INTERRUPTED_MESSAGE: &str = "interrupted: worker stopped before the chain finished";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub uploads_bucket: String,
    pub outputs_bucket: String,
    pub signed_url_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            uploads_bucket: "uploads".to_string(),
            outputs_bucket: "outputs".to_string(),
            signed_url_ttl: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            uploads_bucket: config.storage.uploads_bucket.clone(),
            outputs_bucket: config.storage.outputs_bucket.clone(),
            signed_url_ttl: Duration::from_secs(config.storage.signed_url_ttl_seconds),
            retry: config.retry.policy(),
        }
    }
}

/// A newly created and started job.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub job_id: String,
    pub task_id: TaskId,
}

/// Result of [`Orchestrator::retry_all_failed`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryAllOutcome {
    pub count: usize,
    pub job_ids: Vec<String>,
}

/// Result of [`Orchestrator::recover`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// `queued` jobs whose chain was started.
    pub started: Vec<String>,
    /// `running` jobs marked failed because their chain was lost.
    pub interrupted: Vec<String>,
}

pub struct Orchestrator {
    ledger: Ledger,
    executor: StageExecutor,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn TaskQueue>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        ledger: Ledger,
        backend: Arc<dyn ProcessingBackend>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn TaskQueue>,
        settings: OrchestratorSettings,
    ) -> Self {
        let executor = StageExecutor::new(backend, Arc::clone(&blobs), &settings.outputs_bucket);
        Self {
            ledger,
            executor,
            blobs,
            queue,
            settings,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // ─── Client operations ─────────────────────────────────────────────────

    /// Stores the uploaded video and creates a `queued` job for it.
    pub async fn create(
        &self,
        user_id: &str,
        project_id: Option<String>,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, OrchestratorError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let file_name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "input.mp4".to_string());
        let key = format!("jobs/{}/{}", job_id, file_name);

        let uri = self
            .blobs
            .put(&self.settings.uploads_bucket, &key, bytes)
            .await?;
        let job = Job::new(job_id.clone(), user_id.to_string(), uri.to_string())
            .with_project(project_id);
        self.ledger.create_job(&job)?;
        info!("Created job {} for user {} from {}", job_id, user_id, uri);
        Ok(job_id)
    }

    /// [`create`](Self::create) followed by [`start`](Self::start).
    pub async fn submit(
        &self,
        user_id: &str,
        project_id: Option<String>,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Submission, OrchestratorError> {
        let job_id = self.create(user_id, project_id, file_name, bytes).await?;
        let task_id = self.start(&job_id)?;
        Ok(Submission { job_id, task_id })
    }

    /// Moves a `queued` job to `running`, creates its ledger rows and
    /// schedules the first stage.
    ///
    /// On a job that is already `running` only the missing ledger rows are
    /// created; nothing is scheduled and `InvalidState` is returned, since
    /// the job's chain is already in flight.
    pub fn start(&self, job_id: &str) -> Result<TaskId, OrchestratorError> {
        let job = self.require_job(job_id)?;
        if job.state.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                state: job.state,
            });
        }
        let input_uri = job
            .input_uri
            .clone()
            .ok_or_else(|| OrchestratorError::MissingInput {
                job_id: job_id.to_string(),
            })?;

        let started = self.ledger.begin(job_id)?;
        if !started.started {
            if started.steps_added > 0 {
                warn!(
                    "Job {} is already running, restored {} missing ledger rows",
                    job_id, started.steps_added
                );
            }
            let state = self.require_job(job_id)?.state;
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                state,
            });
        }

        let task = Task::RunStage {
            stage: Stage::first(),
            payload: StagePayload::new(job_id, input_uri).with_attempt(started.attempt),
        };
        let task_id = self.queue.enqueue(task, Duration::ZERO)?;
        info!(
            "Started job {} attempt {} ({} ledger rows created), task {}",
            job_id, started.attempt, started.steps_added, task_id
        );
        Ok(task_id)
    }

    /// Puts a terminal job back to `queued` with every step `pending`.
    /// Nothing is written when the job is not terminal or its input is gone.
    pub async fn requeue(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let job = self.require_job(job_id)?;
        if !job.state.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                state: job.state,
            });
        }
        self.ensure_input(&job).await?;

        if !self.ledger.reset_for_retry(job_id)? {
            let state = self.require_job(job_id)?.state;
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                state,
            });
        }
        info!("Job {} requeued for retry", job_id);
        Ok(())
    }

    /// Re-runs a terminal job from the first stage.
    pub async fn retry(&self, job_id: &str) -> Result<TaskId, OrchestratorError> {
        self.requeue(job_id).await?;
        self.start(job_id)
    }

    /// Retries every `failed` job. Jobs that cannot be retried are logged
    /// and skipped.
    pub async fn retry_all_failed(&self) -> Result<RetryAllOutcome, OrchestratorError> {
        self.for_each_failed(true).await
    }

    /// Like [`retry_all_failed`](Self::retry_all_failed) but leaves the
    /// jobs `queued` for a running worker to pick up.
    pub async fn requeue_all_failed(&self) -> Result<RetryAllOutcome, OrchestratorError> {
        self.for_each_failed(false).await
    }

    async fn for_each_failed(&self, start: bool) -> Result<RetryAllOutcome, OrchestratorError> {
        let mut outcome = RetryAllOutcome::default();
        for job_id in self.ledger.job_ids_in_state(JobState::Failed)? {
            let result = if start {
                self.retry(&job_id).await.map(|_| ())
            } else {
                self.requeue(&job_id).await
            };
            match result {
                Ok(()) => outcome.job_ids.push(job_id),
                Err(e) => warn!("Skipping retry of job {}: {}", job_id, e),
            }
        }
        outcome.count = outcome.job_ids.len();
        info!("Requeued {} failed jobs", outcome.count);
        Ok(outcome)
    }

    pub fn cancel(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let job = self.require_job(job_id)?;
        if job.state.is_terminal() || !self.ledger.cancel(job_id)? {
            let state = self.require_job(job_id)?.state;
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                state,
            });
        }
        info!("Job {} cancelled", job_id);
        Ok(())
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatusView, OrchestratorError> {
        let job = self.require_job(job_id)?;
        let steps = self.ledger.steps(job_id)?;
        let output_url = job
            .output_uri()
            .and_then(|uri| uri.parse::<BlobUri>().ok())
            .and_then(|uri| {
                self.blobs
                    .signed_url(&uri.bucket, &uri.key, self.settings.signed_url_ttl)
                    .map_err(|e| debug!("No signed URL for {}: {}", uri, e))
                    .ok()
            });
        Ok(JobStatusView::new(&job, &steps, output_url))
    }

    /// Starts the chain of every `queued` job, oldest first.
    pub fn start_queued(&self) -> Result<Vec<String>, OrchestratorError> {
        let mut started = Vec::new();
        for job_id in self.ledger.job_ids_in_state(JobState::Queued)? {
            match self.start(&job_id) {
                Ok(_) => started.push(job_id),
                Err(e) => warn!("Could not start queued job {}: {}", job_id, e),
            }
        }
        Ok(started)
    }

    /// Fails `running` jobs and starts `queued` ones. Chains live in memory
    /// only, so a `running` job found at startup has lost its tasks.
    pub fn recover(&self) -> Result<RecoveryReport, OrchestratorError> {
        let mut report = RecoveryReport::default();
        for job_id in self.ledger.job_ids_in_state(JobState::Running)? {
            if self.ledger.fail_job(&job_id, INTERRUPTED_MESSAGE)? {
                warn!("Job {} was interrupted, marked failed", job_id);
                report.interrupted.push(job_id);
            }
        }
        report.started = self.start_queued()?;
        Ok(report)
    }

    pub async fn processing_health(&self) -> Result<(), ProcessingError> {
        self.executor.backend().health().await
    }

    // ─── Task execution ────────────────────────────────────────────────────

    async fn run_stage(&self, stage: Stage, payload: StagePayload) -> Result<(), OrchestratorError> {
        let job_id = payload.job_id.clone();
        let Some(job) = self.ledger.job(&job_id)? else {
            warn!("Dropping {} task for unknown job {}", stage, job_id);
            return Ok(());
        };
        if job.state.is_terminal() {
            info!("Job {} is {}, dropping {} task", job_id, job.state, stage);
            return Ok(());
        }
        if payload.attempt != job.attempt {
            info!(
                "Dropping {} task of job {} from attempt {}, job is at attempt {}",
                stage, job_id, payload.attempt, job.attempt
            );
            return Ok(());
        }
        let Some(step) = self.ledger.step(&job_id, stage)? else {
            error!("Job {} has no ledger row for {}", job_id, stage);
            self.ledger
                .fail_job(&job_id, &format!("{}: ledger row missing", stage))?;
            return Ok(());
        };
        if step.state == StepState::Succeeded {
            debug!("Stage {} of job {} already succeeded, dropping duplicate", stage, job_id);
            return Ok(());
        }

        self.ledger.mark_running(&job_id, stage)?;
        let span = info_span!(
            "stage",
            job_id = %job_id,
            stage = %stage,
            attempt = payload.attempt,
            retry = step.retry_count
        );
        let result = self
            .executor
            .execute(stage, payload.clone())
            .instrument(span)
            .await;

        if self.current_attempt(&job_id)? != Some(payload.attempt) {
            info!(
                "Job {} left attempt {} while {} ran, discarding the result",
                job_id, payload.attempt, stage
            );
            return Ok(());
        }

        match result {
            Ok(output) => {
                self.ledger.mark_succeeded(&job_id, stage)?;
                self.ledger.set_progress(&job_id, stage.progress_after())?;
                let next = match stage.next() {
                    Some(next) => Task::RunStage {
                        stage: next,
                        payload: output,
                    },
                    None => Task::Finalize { payload: output },
                };
                self.schedule_if_current(&job_id, next, Duration::ZERO)?;
            }
            Err(err) if err.is_retryable() => {
                let message = err.to_string();
                match self.settings.retry.decide(step.retry_count) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            "Stage {} of job {} failed (attempt {}), retrying in {:?}: {}",
                            stage,
                            job_id,
                            step.retry_count + 1,
                            delay,
                            message
                        );
                        self.ledger.mark_retrying(&job_id, stage, &message)?;
                        self.schedule_if_current(&job_id, Task::RunStage { stage, payload }, delay)?;
                    }
                    RetryDecision::Fail => {
                        error!(
                            "Stage {} of job {} failed after {} retries: {}",
                            stage, job_id, step.retry_count, message
                        );
                        self.ledger.mark_failed(&job_id, stage, &message)?;
                    }
                }
            }
            Err(err) => {
                let message = err.to_string();
                error!("Stage {} of job {} failed permanently: {}", stage, job_id, message);
                self.ledger.mark_failed(&job_id, stage, &message)?;
            }
        }
        Ok(())
    }

    fn current_attempt(&self, job_id: &str) -> Result<Option<u32>, OrchestratorError> {
        Ok(self.ledger.job(job_id)?.map(|job| job.attempt))
    }

    /// Enqueues the follow-up task unless the job left the live states or
    /// moved to another attempt while the stage was running.
    fn schedule_if_current(
        &self,
        job_id: &str,
        task: Task,
        delay: Duration,
    ) -> Result<(), OrchestratorError> {
        let attempt = task.payload().attempt;
        match self.ledger.job(job_id)? {
            Some(job) if !job.state.is_terminal() && job.attempt == attempt => {
                self.queue.enqueue(task, delay)?;
            }
            Some(job) => info!(
                "Job {} is {} at attempt {}, not scheduling {} for attempt {}",
                job_id,
                job.state,
                job.attempt,
                task.label(),
                attempt
            ),
            None => warn!("Job {} disappeared, not scheduling {}", job_id, task.label()),
        }
        Ok(())
    }

    fn require_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        self.ledger
            .job(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))
    }

    async fn ensure_input(&self, job: &Job) -> Result<(), OrchestratorError> {
        let missing = || OrchestratorError::MissingInput {
            job_id: job.id.clone(),
        };
        let uri: BlobUri = job
            .input_uri
            .as_deref()
            .ok_or_else(missing)?
            .parse()
            .map_err(|_| missing())?;
        match self.blobs.exists(&uri.bucket, &uri.key).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(missing()),
            Err(e) if e.is_transient() => Err(e.into()),
            Err(_) => Err(missing()),
        }
    }
}

#[async_trait]
impl TaskHandler for Orchestrator {
    async fn handle(&self, envelope: Envelope) {
        let job_id = envelope.task.job_id().to_string();
        let label = envelope.task.label();

        let result = match envelope.task {
            Task::RunStage { stage, payload } => self.run_stage(stage, payload).await,
            Task::Finalize { payload } => finalize(&self.ledger, &payload)
                .map(|_| ())
                .map_err(OrchestratorError::from),
        };

        if let Err(e) = result {
            error!("Task {} ({}) for job {} failed: {}", envelope.id, label, job_id, e);
            if let Err(e) = self.ledger.fail_job(&job_id, &format!("{}: {}", label, e)) {
                error!("Could not record failure of job {}: {}", job_id, e);
            }
        }
    }
}
