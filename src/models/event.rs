//! Storage notification data structures.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

/// S3 event notification payload as delivered to the function.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

/// A single record of an S3 event notification.
#[derive(Debug, Clone, Deserialize)]
pub struct S3EventRecord {
    /// Event name (e.g. `ObjectCreated:Put`)
    #[serde(rename = "eventName", default)]
    pub event_name: Option<String>,

    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    /// URL-encoded object key
    pub key: String,

    #[serde(default)]
    pub size: Option<u64>,
}

impl S3Event {
    /// Convert every record into a decoded notification, in delivery order.
    pub fn into_notifications(self) -> Vec<Notification> {
        self.records
            .into_iter()
            .map(|record| {
                let key = decode_key(&record.s3.object.key);
                Notification::new(record.s3.bucket.name, key)
            })
            .collect()
    }
}

/// One storage upload event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Notification {
    pub bucket: String,

    /// Decoded, slash-delimited object key
    pub key: String,
}

impl Notification {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// First path segment of the key.
    pub fn table(&self) -> &str {
        self.key.split('/').next().unwrap_or_default()
    }
}

/// Decode an event key: `+` becomes a space, then percent escapes are resolved.
pub fn decode_key(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8_lossy()
        .into_owned()
}

/// A relevant notification with its partition coordinates extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub bucket: String,
    pub key: String,
    pub table: String,
    pub query_date: String,
    pub partition: String,
    pub source_id: String,

    /// Whether the table has query tags and must be dispatched
    pub requires_dispatch: bool,
}

/// Outcome of classifying one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Untracked table; no side effects
    Ignore,
    /// Tracked metadata sidecar that must be deleted
    MetadataCleanup,
    /// Tracked data object to repair and possibly dispatch
    Relevant(ParsedEvent),
}
