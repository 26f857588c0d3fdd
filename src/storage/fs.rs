//! Filesystem-backed object store.
//!
//! Each bucket is a directory under the storage root and each key is a
//! relative path inside it. Objects carry no versioning, so every version
//! id is `"null"`.

use crate::error::{StoreError, StoreResult};
use crate::storage::ObjectStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use walkdir::WalkDir;

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> StoreResult<PathBuf> {
        if bucket.is_empty() || !is_plain_relative(Path::new(bucket)) || bucket.contains('/') {
            return Err(StoreError::InvalidKey(format!("bucket '{}'", bucket)));
        }
        Ok(self.root.join(bucket))
    }

    /// Resolve a key to a path, refusing anything that could leave the bucket.
    fn object_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if key.is_empty() || key.ends_with('/') || key.contains('\\') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let relative = Path::new(key);
        if !is_plain_relative(relative) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(dir.join(relative))
    }
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

async fn ensure_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::not_found(bucket, key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> StoreResult<()> {
        let path = self.object_path(bucket, key)?;
        ensure_parent(&path).await?;
        tokio::fs::write(&path, body).await?;
        debug!("Stored {}/{} ({} bytes, {})", bucket, key, body.len(), content_type);
        Ok(())
    }

    async fn put_if_absent(&self, bucket: &str, key: &str, body: &[u8]) -> StoreResult<bool> {
        let path = self.object_path(bucket, key)?;
        ensure_parent(&path).await?;

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match file {
            Ok(mut file) => {
                file.write_all(body).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        let path = self.object_path(bucket, key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            let key = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/");

            if key.starts_with(prefix) {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}
