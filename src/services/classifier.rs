// src/services/classifier.rs

//! Event classifier.
//!
//! Decides, for one notification, whether it is ignored, is a metadata
//! sidecar to delete, or names a partition that must be repaired (and
//! possibly dispatched). Keys of relevant objects follow the layout
//! `table/.../<date_segment>=D/<partition_segment>=P/file`.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::{AppError, Result};
use crate::models::{Classification, Config, Notification, ParsedEvent};

/// Service classifying storage notifications.
pub struct EventClassifier {
    config: Arc<Config>,
}

impl EventClassifier {
    /// Create a new classifier with the given configuration.
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Classify one notification.
    ///
    /// Unknown tables are `Ignore`, never an error. A tracked data key that
    /// does not follow the layout is a `KeyLayout` error.
    pub fn classify(&self, notification: &Notification) -> Result<Classification> {
        let table = notification.table();
        if !self.config.registry.is_tracked(table) {
            return Ok(Classification::Ignore);
        }

        let key = &notification.key;
        if key.ends_with(&self.config.layout.metadata_suffix) {
            return Ok(Classification::MetadataCleanup);
        }

        let (query_date, partition) = self.partition_coordinates(key)?;
        let source_id = self.source_id(key, &partition)?;

        Ok(Classification::Relevant(ParsedEvent {
            bucket: notification.bucket.clone(),
            key: key.clone(),
            table: table.to_string(),
            query_date,
            partition,
            source_id,
            requires_dispatch: self.config.registry.tags.contains(table),
        }))
    }

    /// Extract `(date, partition)` from the third- and second-from-last segments.
    fn partition_coordinates(&self, key: &str) -> Result<(String, String)> {
        let layout = &self.config.layout;
        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() < 4 {
            return Err(AppError::key_layout(
                key,
                format!(
                    "expected table/.../{}=D/{}=P/file, got {} segment(s)",
                    layout.date_segment,
                    layout.partition_segment,
                    segments.len()
                ),
            ));
        }

        let n = segments.len();
        let date = segment_value(key, segments[n - 3], &layout.date_segment)?;
        let partition = segment_value(key, segments[n - 2], &layout.partition_segment)?;

        if NaiveDate::parse_from_str(date, &layout.date_format).is_err() {
            return Err(AppError::key_layout(
                key,
                format!("date '{}' does not match '{}'", date, layout.date_format),
            ));
        }

        Ok((date.to_string(), partition.to_string()))
    }

    /// Derive the source id: `<prefix>_<second token of partition>`.
    fn source_id(&self, key: &str, partition: &str) -> Result<String> {
        match partition.split('_').nth(1) {
            Some(token) if !token.is_empty() => {
                Ok(format!("{}_{}", self.config.layout.source_prefix, token))
            }
            _ => Err(AppError::key_layout(
                key,
                format!("partition '{partition}' has no source token"),
            )),
        }
    }
}

/// Value of a `name=value` segment, requiring the expected name and a non-empty value.
///
/// Splits at the first `=`: the value keeps any further `=`.
fn segment_value<'a>(key: &str, segment: &'a str, expected: &str) -> Result<&'a str> {
    match segment.split_once('=') {
        Some((name, value)) if name == expected && !value.is_empty() => Ok(value),
        _ => Err(AppError::key_layout(
            key,
            format!("segment '{segment}' is not '{expected}=<value>'"),
        )),
    }
}
