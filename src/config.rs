// src/config.rs

//! Configuration loading utilities.
//!
//! Local runs read a TOML file; the Lambda reads it from S3 when
//! `CONFIG_S3_BUCKET`/`CONFIG_S3_KEY` are set and otherwise falls back to
//! the bundled file. Both apply the same environment overrides.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Bundled configuration path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file is missing. A file that exists but
/// does not parse is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::warn!("Config file {path:?} not found, using default configuration");
        return Ok(Config::default());
    }
    Config::load(path)
        .map_err(|e| AppError::config(format!("Failed to load config from {path:?}: {e}")))
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

/// Apply overrides looked up through `var`.
fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
        config.pipeline.max_concurrent = n;
    }
    if let Some(bucket) = var("RESULT_BUCKET").filter(|v| !v.is_empty()) {
        config.results.bucket = bucket;
    }
    if let Some(database) = var("ATHENA_DATABASE").filter(|v| !v.is_empty()) {
        config.athena.database = database;
    }
    if let Some(workgroup) = var("ATHENA_WORKGROUP").filter(|v| !v.is_empty()) {
        config.athena.workgroup = workgroup;
    }
}

#[cfg(feature = "aws")]
pub use lambda_loader::LambdaConfigLoader;

#[cfg(feature = "aws")]
mod lambda_loader {
    use std::path::PathBuf;

    use tracing::info;

    use super::{DEFAULT_CONFIG_PATH, apply_env_overrides, load_config};
    use crate::error::{AppError, Result};
    use crate::models::Config;
    use crate::storage::ObjectStore;
    use crate::storage::s3::S3Storage;

    /// Config loader for Lambda environment.
    pub struct LambdaConfigLoader {
        storage: S3Storage,
    }

    impl LambdaConfigLoader {
        pub fn new(storage: S3Storage) -> Self {
            Self { storage }
        }

        async fn load_from_s3(&self, bucket: &str, key: &str) -> Result<Config> {
            info!("Loading config file from s3://{}/{}", bucket, key);
            let bytes = self
                .storage
                .read_bytes_optional(bucket, key)
                .await?
                .ok_or_else(|| {
                    AppError::config(format!("Config file not found in S3: s3://{bucket}/{key}"))
                })?;

            let s = String::from_utf8(bytes).map_err(|e| {
                AppError::config(format!("Config file {key} is not valid UTF-8: {e}"))
            })?;
            Config::from_toml(&s)
        }

        /// Load, override and validate the effective configuration.
        pub async fn load_config(&self) -> Result<Config> {
            let bucket = std::env::var("CONFIG_S3_BUCKET").ok().filter(|v| !v.is_empty());
            let key = std::env::var("CONFIG_S3_KEY").ok().filter(|v| !v.is_empty());

            let mut config = match (bucket, key) {
                (Some(bucket), Some(key)) => self.load_from_s3(&bucket, &key).await?,
                _ => {
                    let path = std::env::var("CONFIG_PATH")
                        .map(PathBuf::from)
                        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
                    info!("Loading bundled config file {}", path.display());
                    load_config(&path)?
                }
            };

            apply_env_overrides(&mut config);
            config.validate()?;
            Ok(config)
        }
    }
}
