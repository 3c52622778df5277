use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::pipeline::RetryPolicy;
use crate::secrets::{resolve_secret_optional, SecretError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Configured database path, or `~/.dubline/data/dubline.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    1800
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_seconds: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_seconds: default_base_backoff(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.base_backoff_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default = "default_uploads_bucket")]
    pub uploads_bucket: String,
    #[serde(default = "default_outputs_bucket")]
    pub outputs_bucket: String,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_seconds: u64,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default)]
    pub signing_key: Option<String>,
    #[serde(default)]
    pub signing_key_file: Option<String>,
    #[serde(default = "default_signing_key_env_var")]
    pub signing_key_env_var: Option<String>,
}

fn default_uploads_bucket() -> String {
    "uploads".to_string()
}

fn default_outputs_bucket() -> String {
    "outputs".to_string()
}

fn default_signed_url_ttl() -> u64 {
    3600
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080/blobs".to_string()
}

fn default_signing_key_env_var() -> Option<String> {
    Some(crate::secrets::SIGNING_KEY_ENV_VAR.to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            uploads_bucket: default_uploads_bucket(),
            outputs_bucket: default_outputs_bucket(),
            signed_url_ttl_seconds: default_signed_url_ttl(),
            public_base_url: default_public_base_url(),
            signing_key: None,
            signing_key_file: None,
            signing_key_env_var: default_signing_key_env_var(),
        }
    }
}

impl StorageConfig {
    /// Configured blob root, or `~/.dubline/blobs`.
    pub fn root(&self) -> Option<PathBuf> {
        match &self.root {
            Some(root) => Some(PathBuf::from(root)),
            None => dirs::home_dir().map(|h| h.join(".dubline").join("blobs")),
        }
    }

    /// The URL signing key, if any source provides one. An unset
    /// environment variable just disables signing.
    pub fn signing_key(&self) -> Result<Option<SecretString>, SecretError> {
        match resolve_secret_optional(
            self.signing_key.as_deref(),
            self.signing_key_file.as_deref(),
            self.signing_key_env_var.as_deref(),
        ) {
            Err(SecretError::EnvVarNotSet { name }) => {
                log::debug!("{} is not set, signed URLs disabled", name);
                Ok(None)
            }
            other => other,
        }
    }
}
