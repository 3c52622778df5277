pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod processing;
pub mod secrets;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use config::{load_config, Config, LogFormat};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, DublineError, Result, StorageError, WorkerError};
pub use jobs::{Job, JobState, JobStatusView, JobStep, Ledger, StepState};
pub use pipeline::{Orchestrator, OrchestratorError, OrchestratorSettings, RetryPolicy, Stage};
pub use processing::{HttpProcessingClient, ProcessingBackend, ProcessingError};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use storage::{BlobStore, BlobUri, FileBlobStore, UrlSigner};
pub use worker::{TaskQueue, WorkerPool};
