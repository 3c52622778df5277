//! Blob storage for uploaded inputs and produced outputs.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::StorageError;

pub mod filesystem;
pub mod signing;

pub use filesystem::FileBlobStore;
pub use signing::{Grant, UrlSigner};

/// Address of a stored object, written `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobUri {
    pub bucket: String,
    pub key: String,
}

static RE_BLOB_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^s3://([a-z0-9][a-z0-9.\-]{1,62})/(.+)$").unwrap());

impl BlobUri {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl FromStr for BlobUri {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RE_BLOB_URI
            .captures(s)
            .ok_or_else(|| StorageError::InvalidUri(s.to_string()))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl fmt::Display for BlobUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Object store used for job inputs and outputs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<BlobUri, StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// A URL granting read access to the object until `ttl` elapses.
    fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StorageError>;
}
