//! AWS S3 storage implementation.
//!
//! Unlike a bucket-scoped store, every call names its bucket: upload events
//! may come from any bucket the function is subscribed to.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::ObjectMetadata;
use crate::storage::ObjectStore;

/// S3-backed object store.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    /// Create a new S3 storage instance.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create S3 storage sharing an already loaded SDK configuration.
    pub fn from_sdk_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(Client::new(config))
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::s3(e.into_service_error()))?;

        info!("Deleted s3://{}/{}", bucket, key);
        Ok(())
    }

    async fn head_object_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::s3(format!(
                    "head s3://{bucket}/{key}: {}",
                    e.into_service_error()
                ))
            })?;

        Ok(output.metadata().cloned().unwrap_or_default())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| AppError::s3(e.into_service_error()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!("Listed {} keys under s3://{}/{}", keys.len(), bucket, prefix);
        Ok(keys)
    }

    async fn read_bytes_optional(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output.body.collect().await.map_err(AppError::s3)?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) => {
                // Check if it's a "not found" error
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    info!("No existing data at s3://{}/{}", bucket, key);
                    Ok(None)
                } else {
                    Err(AppError::s3(service_err))
                }
            }
        }
    }

    async fn write_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::s3(e.into_service_error()))?;

        info!("Wrote {} bytes to s3://{}/{}", size, bucket, key);
        Ok(())
    }
}
