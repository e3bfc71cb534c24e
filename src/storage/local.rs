//! Local filesystem storage implementation.
//!
//! Mirrors bucket/key addressing on disk for development and replaying
//! saved events. Production deployments should use S3Storage.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! └── {bucket}/
//!     └── {table}/date=YYYY-MM-DD/partition_name={partition}/
//!         ├── data.csv                      # Object body
//!         └── data.csv.object-meta.json     # User metadata (optional)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::ObjectMetadata;
use crate::storage::ObjectStore;

/// Suffix of the sidecar file holding an object's user metadata.
const META_SUFFIX: &str = ".object-meta.json";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the full path for a bucket/key pair.
    fn path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root_dir.join(bucket).join(key)
    }

    fn meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.path(bucket, &format!("{key}{META_SUFFIX}"))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
        Self::ensure_dir(path).await?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read a file, returning None if it doesn't exist.
    async fn read_file(path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn remove_file(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Attach user metadata to an object (the S3 `x-amz-meta-*` equivalent).
    pub async fn write_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(metadata)?;
        Self::write_file(&self.meta_path(bucket, key), &bytes).await
    }

    /// Recursively collect object keys under `dir`, relative to the bucket root.
    async fn walk(bucket_root: &Path, dir: PathBuf, keys: &mut Vec<String>) -> Result<()> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(AppError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(bucket_root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.ends_with(META_SUFFIX) && !key.ends_with(".tmp") {
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStorage {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        Self::remove_file(&self.path(bucket, key)).await?;
        Self::remove_file(&self.meta_path(bucket, key)).await?;
        log::debug!("Deleted {}/{}", bucket, key);
        Ok(())
    }

    async fn head_object_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        if tokio::fs::metadata(self.path(bucket, key)).await.is_err() {
            return Err(AppError::s3(format!("No such key: {bucket}/{key}")));
        }
        match Self::read_file(&self.meta_path(bucket, key)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(ObjectMetadata::new()),
        }
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket_root = self.root_dir.join(bucket);

        // Walk from the deepest directory fully contained in the prefix.
        let start = match prefix.rfind('/') {
            Some(idx) => bucket_root.join(&prefix[..idx]),
            None => bucket_root.clone(),
        };

        let mut keys = Vec::new();
        Self::walk(&bucket_root, start, &mut keys).await?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn read_bytes_optional(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Self::read_file(&self.path(bucket, key)).await
    }

    async fn write_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        Self::write_file(&self.path(bucket, key), &bytes).await
    }
}
