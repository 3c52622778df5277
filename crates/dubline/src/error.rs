use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DublineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Processing service error: {0}")]
    Processing(#[from] crate::processing::ProcessingError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] crate::pipeline::OrchestratorError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to resolve secret: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid blob URI '{0}'")]
    InvalidUri(String),

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("URL signing failed: {0}")]
    Signing(String),

    #[error("URL signing is not configured")]
    SigningUnavailable,
}

impl StorageError {
    /// Whether retrying the same call could succeed. Missing objects and
    /// malformed addresses never resolve by themselves.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::CreateDirectory { .. }
                | StorageError::WriteFile { .. }
                | StorageError::ReadFile { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DublineError>;
