//! Durable job and step state.
//!
//! Every operation here commits its change in a single SQLite transaction.
//! Job-level writes only apply while the job is still `queued` or `running`,
//! so a job cancelled concurrently is never flipped back by a late stage
//! callback or by the finalizer.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::db::{job_repo, output_repo, step_repo, Database, DatabaseError};
use crate::pipeline::Stage;

use super::model::{encode_json_map, format_timestamp, Job, JobState, JobStep, StepState};

/// Meta key holding the final output artifact address.
pub const OUTPUT_URI_KEY: &str = "output_s3_uri";

/// Result of [`Ledger::begin`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Started {
    /// Whether this call moved the job from `queued` to `running`.
    pub started: bool,
    /// The job's current attempt.
    pub attempt: u32,
    /// Ledger rows that had to be created.
    pub steps_added: usize,
}

/// Result of [`Ledger::complete`].
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Completed { output_uri: Option<String> },
    /// The job was already terminal; nothing was written.
    Skipped(JobState),
    /// The job was retried after this chain was scheduled; nothing was
    /// written.
    Superseded { current: u32 },
    NotFound,
}

#[derive(Clone)]
pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    pub fn job(&self, job_id: &str) -> Result<Option<Job>, DatabaseError> {
        self.db.with_conn(|conn| {
            job_repo::find_by_id(conn, job_id)?
                .map(Job::try_from)
                .transpose()
        })
    }

    /// All ledger rows of a job, ordered by stage position.
    pub fn steps(&self, job_id: &str) -> Result<Vec<JobStep>, DatabaseError> {
        let mut steps = self.db.with_conn(|conn| {
            step_repo::list_for_job(conn, job_id)?
                .into_iter()
                .map(JobStep::try_from)
                .collect::<Result<Vec<_>, _>>()
        })?;
        steps.sort_by_key(|s| stage_position(&s.name));
        Ok(steps)
    }

    pub fn step(&self, job_id: &str, stage: Stage) -> Result<Option<JobStep>, DatabaseError> {
        self.db.with_conn(|conn| {
            step_repo::find(conn, job_id, stage.as_str())?
                .map(JobStep::try_from)
                .transpose()
        })
    }

    pub fn outputs(&self, job_id: &str) -> Result<Vec<output_repo::OutputRow>, DatabaseError> {
        self.db
            .with_conn(|conn| output_repo::list_for_job(conn, job_id))
    }

    pub fn job_ids_in_state(&self, state: JobState) -> Result<Vec<String>, DatabaseError> {
        self.db
            .with_conn(|conn| job_repo::ids_by_state(conn, state.as_str()))
    }

    // ─── Job lifecycle ──────────────────────────────────────────────────────

    pub fn create_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let row = job.to_row()?;
        self.db.with_conn(|conn| job_repo::insert(conn, &row))
    }

    /// Moves a `queued` job to `running` and creates any missing ledger
    /// rows. On a job that is already `running` only the missing rows are
    /// added. Existing rows are left untouched, so this is safe to repeat.
    pub fn begin(&self, job_id: &str) -> Result<Started, DatabaseError> {
        let now = format_timestamp(Utc::now());
        self.db.with_tx(|tx| {
            let started = job_repo::update_started(tx, job_id, &now)?;
            let Some(row) = job_repo::find_by_id(tx, job_id)? else {
                return Ok(Started::default());
            };
            let steps_added = if row.state == JobState::Running.as_str() {
                step_repo::insert_missing(tx, job_id, &Stage::names())?
            } else {
                0
            };
            Ok(Started {
                started,
                attempt: u32::try_from(row.attempt).unwrap_or(0),
                steps_added,
            })
        })
    }

    pub fn set_progress(&self, job_id: &str, progress: f64) -> Result<bool, DatabaseError> {
        self.db
            .with_conn(|conn| job_repo::update_progress(conn, job_id, progress.clamp(0.0, 100.0)))
    }

    /// Cancels a live job. Returns `false` when the job was already terminal
    /// or does not exist.
    pub fn cancel(&self, job_id: &str) -> Result<bool, DatabaseError> {
        let now = format_timestamp(Utc::now());
        self.db
            .with_conn(|conn| job_repo::update_cancelled(conn, job_id, &now))
    }

    /// Puts a terminal job back to `queued` and every step back to `pending`.
    /// The previous output address is dropped from meta. Returns `false`
    /// without writing anything when the job is missing or not terminal.
    pub fn reset_for_retry(&self, job_id: &str) -> Result<bool, DatabaseError> {
        self.db.with_tx(|tx| {
            let Some(row) = job_repo::find_by_id(tx, job_id)? else {
                return Ok(false);
            };
            let job = Job::try_from(row)?;
            if !job.state.is_terminal() {
                return Ok(false);
            }

            let mut meta = job.meta;
            meta.remove(OUTPUT_URI_KEY);
            let meta = encode_json_map("meta", &meta)?;

            if !job_repo::update_requeued(tx, job_id, &meta)? {
                return Ok(false);
            }
            let reset = step_repo::reset_all(tx, job_id)?;
            log::debug!("Job {} requeued, {} steps reset", job_id, reset);
            Ok(true)
        })
    }

    // ─── Step transitions ───────────────────────────────────────────────────

    /// Step `running`; job `running` with this step as `current_step`.
    pub fn mark_running(&self, job_id: &str, stage: Stage) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        self.transition(job_id, stage, |tx, step| {
            step.state = StepState::Running;
            step.started_at = Some(now);
            step.finished_at = None;
            job_repo::update_current_step(tx, job_id, stage.as_str(), &format_timestamp(now))?;
            Ok(())
        })
    }

    /// Step `succeeded` with its wall-clock duration recorded in metrics.
    pub fn mark_succeeded(&self, job_id: &str, stage: Stage) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        self.transition(job_id, stage, |_tx, step| {
            complete_step(step, now);
            Ok(())
        })
    }

    /// Step `retrying`; the attempt is counted on both the step and the job.
    /// The job stays `running`.
    pub fn mark_retrying(
        &self,
        job_id: &str,
        stage: Stage,
        error: &str,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        self.transition(job_id, stage, |tx, step| {
            step.state = StepState::Retrying;
            step.finished_at = None;
            step.retry_count += 1;
            step.metrics
                .insert("last_error".into(), Value::from(error));
            step.metrics
                .insert("last_retry_at".into(), Value::from(format_timestamp(now)));
            job_repo::update_retrying(tx, job_id, error)?;
            Ok(())
        })
    }

    /// Step `failed`; job `failed` with the error as code and message.
    pub fn mark_failed(&self, job_id: &str, stage: Stage, error: &str) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        self.transition(job_id, stage, |tx, step| {
            step.state = StepState::Failed;
            step.finished_at = Some(now);
            step.metrics.insert("error".into(), Value::from(error));
            step.metrics
                .insert("failed_at".into(), Value::from(format_timestamp(now)));
            job_repo::update_failed(tx, job_id, error, &format_timestamp(now))?;
            Ok(())
        })
    }

    /// Fails a live job outside of any particular step.
    pub fn fail_job(&self, job_id: &str, error: &str) -> Result<bool, DatabaseError> {
        let now = format_timestamp(Utc::now());
        self.db
            .with_conn(|conn| job_repo::update_failed(conn, job_id, error, &now))
    }

    /// Reconciles a finished chain into the job record: every step not yet
    /// `succeeded` is completed, the job becomes `succeeded` at 100%, and the
    /// entries returned by `build_meta` are merged into meta. Terminal jobs
    /// and jobs whose `attempt` no longer matches are left untouched.
    pub fn complete<F>(
        &self,
        job_id: &str,
        attempt: u32,
        build_meta: F,
    ) -> Result<Completion, DatabaseError>
    where
        F: FnOnce(&Job, &[JobStep]) -> Map<String, Value>,
    {
        let now = Utc::now();
        let now_str = format_timestamp(now);
        self.db.with_tx(|tx| {
            let Some(row) = job_repo::find_by_id(tx, job_id)? else {
                return Ok(Completion::NotFound);
            };
            let job = Job::try_from(row)?;
            if job.state.is_terminal() {
                return Ok(Completion::Skipped(job.state));
            }
            if job.attempt != attempt {
                return Ok(Completion::Superseded {
                    current: job.attempt,
                });
            }

            step_repo::insert_missing(tx, job_id, &Stage::names())?;
            let mut steps = Vec::with_capacity(Stage::ALL.len());
            for row in step_repo::list_for_job(tx, job_id)? {
                let mut step = JobStep::try_from(row)?;
                if step.state != StepState::Succeeded {
                    complete_step(&mut step, now);
                    step_repo::update(tx, &step.to_row()?)?;
                }
                steps.push(step);
            }
            steps.sort_by_key(|s| stage_position(&s.name));

            let patch = build_meta(&job, &steps);
            let mut meta = job.meta;
            meta.extend(patch);
            let output_uri = meta
                .get(OUTPUT_URI_KEY)
                .and_then(Value::as_str)
                .map(str::to_string);

            let encoded = encode_json_map("meta", &meta)?;
            if !job_repo::update_succeeded(tx, job_id, &encoded, &now_str)? {
                return Ok(Completion::Skipped(job.state));
            }
            if let Some(uri) = &output_uri {
                output_repo::insert_if_absent(tx, job_id, "video", uri, &now_str)?;
            }
            Ok(Completion::Completed { output_uri })
        })
    }

    /// Loads the step row, applies `apply`, and writes it back in one
    /// transaction. A missing row is a silent no-op (`Ok(false)`).
    fn transition<F>(&self, job_id: &str, stage: Stage, apply: F) -> Result<bool, DatabaseError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>, &mut JobStep) -> Result<(), DatabaseError>,
    {
        self.db.with_tx(|tx| {
            let Some(row) = step_repo::find(tx, job_id, stage.as_str())? else {
                log::debug!("No ledger row for {}/{}, skipping transition", job_id, stage);
                return Ok(false);
            };
            let mut step = JobStep::try_from(row)?;
            apply(tx, &mut step)?;
            step_repo::update(tx, &step.to_row()?)?;
            Ok(true)
        })
    }
}

fn complete_step(step: &mut JobStep, now: chrono::DateTime<Utc>) {
    step.state = StepState::Succeeded;
    step.finished_at = Some(now);
    if let Some(started) = step.started_at {
        let seconds = (now - started).num_milliseconds() as f64 / 1000.0;
        step.metrics
            .insert("duration_seconds".into(), Value::from(seconds.max(0.0)));
    }
}

fn stage_position(name: &str) -> usize {
    name.parse::<Stage>()
        .map(|s| s.index())
        .unwrap_or(usize::MAX)
}
