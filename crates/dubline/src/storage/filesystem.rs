use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;

use super::{BlobStore, BlobUri, UrlSigner};

/// Blob store laid out as `root/bucket/key` on the local filesystem.
///
/// Writes go to a uniquely named temporary file in the target directory
/// and are renamed into place, so readers never observe a partial object.
pub struct FileBlobStore {
    root: PathBuf,
    public_base_url: String,
    signer: Option<UrlSigner>,
}

impl FileBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            public_base_url: String::new(),
            signer: None,
        }
    }

    /// Enables [`BlobStore::signed_url`]; URLs are issued under `public_base_url`.
    pub fn with_signer(mut self, signer: UrlSigner, public_base_url: &str) -> Self {
        self.signer = Some(signer);
        self.public_base_url = public_base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn signer(&self) -> Option<&UrlSigner> {
        self.signer.as_ref()
    }

    /// Resolves an object path, rejecting keys that would escape the bucket.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            return Err(StorageError::InvalidKey(format!("{}/{}", bucket, key)));
        }
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    async fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<BlobUri, StorageError> {
        let path = self.object_path(bucket, key)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        self.ensure_directory(&dir).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: tmp.clone(),
                source: e,
            })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::WriteFile { path, source: e });
        }

        log::debug!("Stored {} bytes at {}/{}", bytes.len(), bucket, key);
        Ok(BlobUri::new(bucket, key))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::ReadFile { path, source: e }
            }
        })
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::ReadFile { path, source: e })
    }

    fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.object_path(bucket, key)?;
        let signer = self.signer.as_ref().ok_or(StorageError::SigningUnavailable)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StorageError::Signing(format!("Invalid TTL: {}", e)))?;
        let expires_at = Utc::now() + ttl;
        let token = signer.sign(bucket, key, expires_at)?;
        Ok(format!(
            "{}/{}/{}?expires={}&token={}",
            self.public_base_url,
            bucket,
            key,
            expires_at.timestamp(),
            token
        ))
    }
}
