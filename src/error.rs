// src/error.rs

//! Unified error handling for the dispatch pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// AWS S3 error
    #[error("S3 error: {0}")]
    S3(String),

    /// Athena (catalog / query engine) error
    #[error("Athena error: {0}")]
    Athena(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Object key does not follow the `table/.../date=D/partition_name=P/file` layout
    #[error("Malformed key '{key}': {message}")]
    KeyLayout { key: String, message: String },

    /// Energy model id derived from a partition has no registry entry
    #[error("No query tags for energy model '{model_id}' (partition '{partition}')")]
    UnknownEnergyModel { model_id: String, partition: String },

    /// A single query submission failed
    #[error("Query {query} failed: {message}")]
    Query { query: String, message: String },

    /// A collaborator did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl AppError {
    /// Create an S3 error.
    pub fn s3(message: impl fmt::Display) -> Self {
        Self::S3(message.to_string())
    }

    /// Create an Athena error.
    pub fn athena(message: impl fmt::Display) -> Self {
        Self::Athena(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a key layout error.
    pub fn key_layout(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::KeyLayout {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a query submission error.
    pub fn query(query: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Query {
            query: query.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error signals a broken contract between upstream data
    /// and the pipeline rather than a transient collaborator failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::KeyLayout { .. } | Self::UnknownEnergyModel { .. } | Self::Config(_)
        )
    }
}
