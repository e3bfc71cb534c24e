//! Batch and per-event reports.
//!
//! Every notification of a batch yields one `EventReport`; failures are
//! recorded against the stage that produced them instead of aborting the
//! batch.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::models::Notification;
use crate::services::{FailedQuery, SubmittedQuery};

/// Processing stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    MetadataCleanup,
    Repair,
    Prune,
    Metadata,
    Baseline,
    Dispatch,
}

/// Final status of one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Untracked table
    Ignored,
    /// Same bucket/key seen earlier in the batch
    Duplicate,
    /// Metadata sidecar deleted
    MetadataDeleted,
    /// Every step succeeded
    Completed,
    /// Repaired, but a later step failed
    Partial,
    /// Not repaired, or aborted by a contract violation
    Failed,
}

/// A failure recorded for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventFailure {
    pub stage: Stage,

    /// Query the failure belongs to, for dispatch failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    pub message: String,

    /// Upstream layout or registry contract violated
    pub fatal: bool,
}

impl EventFailure {
    pub fn new(stage: Stage, error: &AppError) -> Self {
        Self {
            stage,
            query: None,
            message: error.to_string(),
            fatal: error.is_contract_violation(),
        }
    }
}

impl From<FailedQuery> for EventFailure {
    fn from(failed: FailedQuery) -> Self {
        Self {
            stage: Stage::Dispatch,
            query: Some(failed.query_name),
            message: failed.error,
            fatal: false,
        }
    }
}

/// Report for one notification.
#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub bucket: String,
    pub key: String,
    pub status: EventStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    pub repaired: bool,

    /// Objects pruned, when the table is pruned at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned: Option<usize>,

    pub baseline_updated: bool,
    pub queries: Vec<SubmittedQuery>,
    pub failures: Vec<EventFailure>,
}

impl EventReport {
    pub fn new(notification: &Notification) -> Self {
        Self {
            bucket: notification.bucket.clone(),
            key: notification.key.clone(),
            status: EventStatus::Completed,
            table: None,
            repaired: false,
            pruned: None,
            baseline_updated: false,
            queries: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn with_status(notification: &Notification, status: EventStatus) -> Self {
        Self {
            status,
            ..Self::new(notification)
        }
    }

    /// Record a failure and log it with the event's coordinates.
    pub fn fail(&mut self, stage: Stage, error: &AppError) {
        let failure = EventFailure::new(stage, error);
        if failure.fatal {
            log::error!(
                "Contract violation at {:?} for s3://{}/{}: {}",
                stage,
                self.bucket,
                self.key,
                error
            );
        } else {
            log::error!(
                "{:?} failed for s3://{}/{}: {}",
                stage,
                self.bucket,
                self.key,
                error
            );
        }
        self.failures.push(failure);
    }

    /// Derive the final status from the recorded failures.
    pub fn settle(&mut self) {
        if self.status != EventStatus::Completed || self.failures.is_empty() {
            return;
        }
        let aborted = self.failures.iter().any(|f| {
            f.fatal || matches!(f.stage, Stage::Classify | Stage::MetadataCleanup | Stage::Repair)
        });
        self.status = if aborted {
            EventStatus::Failed
        } else {
            EventStatus::Partial
        };
    }
}

/// Batch totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub ignored: usize,
    pub duplicates: usize,
    pub metadata_deleted: usize,
    pub repaired: usize,
    pub pruned_objects: usize,
    pub baselines_updated: usize,
    pub queries_submitted: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
}

/// Report for one invocation's batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: BatchSummary,
    pub events: Vec<EventReport>,
}

impl BatchReport {
    pub fn new(started_at: DateTime<Utc>, mut events: Vec<EventReport>) -> Self {
        let mut summary = BatchSummary {
            total: events.len(),
            ..BatchSummary::default()
        };

        for event in &mut events {
            event.settle();
            match event.status {
                EventStatus::Ignored => summary.ignored += 1,
                EventStatus::Duplicate => summary.duplicates += 1,
                EventStatus::MetadataDeleted => summary.metadata_deleted += 1,
                EventStatus::Completed => summary.completed += 1,
                EventStatus::Partial => summary.partial += 1,
                EventStatus::Failed => summary.failed += 1,
            }
            summary.repaired += usize::from(event.repaired);
            summary.pruned_objects += event.pruned.unwrap_or(0);
            summary.baselines_updated += usize::from(event.baseline_updated);
            summary.queries_submitted += event.queries.len();
        }

        Self {
            started_at,
            finished_at: Utc::now(),
            summary,
            events,
        }
    }

    /// Whether every event was handled without failures.
    pub fn is_clean(&self) -> bool {
        self.summary.partial == 0 && self.summary.failed == 0
    }

    /// Failures of every event, with the event key.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &EventFailure)> {
        self.events
            .iter()
            .flat_map(|e| e.failures.iter().map(move |f| (e.key.as_str(), f)))
    }
}
