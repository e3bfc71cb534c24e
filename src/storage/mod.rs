//! Object storage abstractions.
//!
//! The pipeline touches object storage for four things: deleting metadata
//! sidecars, reading the user metadata of an uploaded object, pruning
//! superseded aggregate files and rewriting the baseline table.
//!
//! - `S3Storage`: AWS S3 backend (feature `aws`)
//! - `LocalStorage`: filesystem backend for local replays and tests

pub mod local;
#[cfg(feature = "aws")]
pub mod s3;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ObjectMetadata;

// Re-export for convenience
pub use local::LocalStorage;
#[cfg(feature = "aws")]
pub use s3::S3Storage;

/// Trait for object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Delete an object. Deleting a missing object is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Read the user metadata attached to an object.
    async fn head_object_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;

    /// List every key in `bucket` starting with `prefix`.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Read an object's bytes, returning `None` if it doesn't exist.
    async fn read_bytes_optional(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create or overwrite an object.
    async fn write_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;
}
