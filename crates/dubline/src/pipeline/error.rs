use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{StorageError, WorkerError};
use crate::jobs::JobState;
use crate::processing::ProcessingError;

use super::stage::Stage;

/// Failure of a single stage execution.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage}: {source}")]
    Service {
        stage: Stage,
        #[source]
        source: ProcessingError,
    },

    #[error("{stage}: {source}")]
    Storage {
        stage: Stage,
        #[source]
        source: StorageError,
    },

    #[error("{stage}: missing required payload field '{field}'")]
    MissingField { stage: Stage, field: &'static str },

    #[error("{stage}: invalid input: {message}")]
    InvalidInput { stage: Stage, message: String },
}

impl StageError {
    /// Retryable failures consume an attempt and are rescheduled with
    /// backoff. Everything else fails the job immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::Service { source, .. } => source.is_retryable(),
            StageError::Storage { source, .. } => source.is_transient(),
            StageError::MissingField { .. } | StageError::InvalidInput { .. } => false,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageError::Service { stage, .. }
            | StageError::Storage { stage, .. }
            | StageError::MissingField { stage, .. }
            | StageError::InvalidInput { stage, .. } => *stage,
        }
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} is {state}, which does not allow this operation")]
    InvalidState { job_id: String, state: JobState },

    #[error("Input asset of job {job_id} is missing")]
    MissingInput { job_id: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Failed to schedule task: {0}")]
    Queue(#[from] WorkerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
