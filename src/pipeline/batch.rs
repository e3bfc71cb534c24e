// src/pipeline/batch.rs

//! Batch orchestrator.
//!
//! Drives one invocation's notifications through two ordered stages:
//!
//! 1. `repair_stage`: classify, delete metadata sidecars, repair partitions,
//!    read object metadata and record baselines. Once every repair has
//!    returned, prune obsolete aggregates serially, once per table.
//! 2. `dispatch_stage`: submit the query fan-out of every retained event.
//!
//! The dispatch stage only starts once every repair has returned, so no
//! query is submitted over a partition the catalog does not know yet.
//! Pruning reads and deletes across events of one table, so it never runs
//! inside the concurrent part of the pass.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;

use crate::engine::QueryEngine;
use crate::error::Result;
use crate::models::{
    Classification, Config, LocationFilter, Notification, ObjectMetadata, ParsedEvent,
};
use crate::pipeline::report::{BatchReport, EventReport, EventStatus, Stage};
use crate::services::{
    DispatchOutcome, EventClassifier, Housekeeping, PartitionMaintainer, QueryDispatcher,
};
use crate::storage::ObjectStore;

/// An event retained by the repair stage for dispatch.
#[derive(Debug, Clone)]
pub struct PendingDispatch {
    /// Position of the event's report in the batch
    pub index: usize,
    pub event: ParsedEvent,
    pub metadata: ObjectMetadata,
}

/// Outcome of pass 1 for one notification.
struct Prepared {
    report: EventReport,
    /// Repaired event of a pruned table
    prune: Option<ParsedEvent>,
    pending: Option<PendingDispatch>,
}

impl Prepared {
    fn done(report: EventReport) -> Self {
        Self {
            report,
            prune: None,
            pending: None,
        }
    }
}

/// Orchestrates one batch of notifications.
pub struct BatchOrchestrator<'a> {
    config: Arc<Config>,
    classifier: EventClassifier,
    maintainer: PartitionMaintainer<'a>,
    dispatcher: QueryDispatcher<'a>,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        config: Arc<Config>,
        store: &'a dyn ObjectStore,
        engine: &'a dyn QueryEngine,
        housekeeping: &'a dyn Housekeeping,
    ) -> Self {
        Self {
            classifier: EventClassifier::new(Arc::clone(&config)),
            maintainer: PartitionMaintainer::new(Arc::clone(&config), store, engine, housekeeping),
            dispatcher: QueryDispatcher::new(Arc::clone(&config), engine),
            config,
        }
    }

    /// Process a batch and report on every notification.
    ///
    /// Never fails as a whole: per-event failures are recorded in the report.
    pub async fn run(&self, notifications: Vec<Notification>) -> BatchReport {
        let started_at = Utc::now();
        log::info!("Processing batch of {} notification(s)", notifications.len());

        let (mut reports, pending) = self.repair_stage(notifications).await;
        self.dispatch_stage(&mut reports, pending).await;

        let report = BatchReport::new(started_at, reports);
        let s = &report.summary;
        log::info!(
            "Batch done: {} total, {} ignored, {} duplicate, {} metadata deleted, \
             {} repaired, {} queries submitted, {} partial, {} failed",
            s.total,
            s.ignored,
            s.duplicates,
            s.metadata_deleted,
            s.repaired,
            s.queries_submitted,
            s.partial,
            s.failed
        );
        report
    }

    /// Pass 1: classify, clean up, repair, record baselines, then prune.
    ///
    /// Returns one report per notification (in input order) and the events
    /// that still need their queries dispatched.
    pub async fn repair_stage(
        &self,
        notifications: Vec<Notification>,
    ) -> (Vec<EventReport>, Vec<PendingDispatch>) {
        let mut seen = HashSet::new();
        let jobs: Vec<(usize, Notification, bool)> = notifications
            .into_iter()
            .enumerate()
            .map(|(index, n)| {
                let duplicate = !seen.insert((n.bucket.clone(), n.key.clone()));
                (index, n, duplicate)
            })
            .collect();

        let results: Vec<Prepared> = stream::iter(jobs)
            .map(|(index, notification, duplicate)| async move {
                if duplicate {
                    log::debug!("Skipping duplicate notification for {}", notification.key);
                    return Prepared::done(EventReport::with_status(
                        &notification,
                        EventStatus::Duplicate,
                    ));
                }
                self.prepare(index, notification).await
            })
            .buffered(self.concurrency())
            .collect()
            .await;

        let mut reports = Vec::with_capacity(results.len());
        let mut prunes = Vec::new();
        let mut pending = Vec::new();
        for (index, prepared) in results.into_iter().enumerate() {
            reports.push(prepared.report);
            prunes.extend(prepared.prune.map(|event| (index, event)));
            pending.extend(prepared.pending);
        }

        self.prune_stage(&mut reports, prunes).await;

        log::info!(
            "Repair stage: {} event(s) repaired, {} awaiting dispatch",
            reports.iter().filter(|r| r.repaired).count(),
            pending.len()
        );
        (reports, pending)
    }

    /// Prune each pruned table once, from its newest repaired partition.
    ///
    /// Runs serially: pruning lists and deletes files other events of the
    /// same table just wrote.
    pub async fn prune_stage(
        &self,
        reports: &mut [EventReport],
        events: Vec<(usize, ParsedEvent)>,
    ) {
        let layout = &self.config.layout;
        let mut newest: IndexMap<(String, String), (usize, ParsedEvent)> = IndexMap::new();
        for (index, event) in events {
            let order = (layout.parse_date(&event.query_date), event.partition.clone());
            let group = (event.bucket.clone(), event.table.clone());
            let superseded = newest.get(&group).is_some_and(|(_, current)| {
                (layout.parse_date(&current.query_date), current.partition.clone()) >= order
            });
            if superseded {
                log::debug!("{} is superseded within the batch", event.key);
                continue;
            }
            newest.insert(group, (index, event));
        }

        for (index, event) in newest.into_values() {
            let outcome = self.maintainer.prune(&event).await;
            let Some(report) = reports.get_mut(index) else {
                continue;
            };
            match outcome {
                Some(Ok(count)) => report.pruned = Some(count),
                Some(Err(e)) => report.fail(Stage::Prune, &e),
                None => {}
            }
        }
    }

    /// Pass 2: dispatch the queries of every retained event.
    pub async fn dispatch_stage(&self, reports: &mut [EventReport], pending: Vec<PendingDispatch>) {
        let edge_networks = &self.config.filters.edge_networks;

        let outcomes: Vec<(usize, Result<DispatchOutcome>)> = stream::iter(pending)
            .map(|p| async move {
                let filter = LocationFilter::for_metadata(&p.metadata, edge_networks);
                (p.index, self.dispatcher.dispatch(&p.event, filter).await)
            })
            .buffered(self.concurrency())
            .collect()
            .await;

        let mut submitted = 0;
        for (index, outcome) in outcomes {
            let Some(report) = reports.get_mut(index) else {
                continue;
            };
            match outcome {
                Ok(outcome) => {
                    submitted += outcome.submitted.len();
                    report.queries = outcome.submitted;
                    report
                        .failures
                        .extend(outcome.failures.into_iter().map(Into::into));
                }
                Err(e) => report.fail(Stage::Dispatch, &e),
            }
        }

        log::info!("Dispatch stage: {} queries submitted", submitted);
    }

    /// Run pass 1 for a single notification.
    async fn prepare(
        &self,
        index: usize,
        notification: Notification,
    ) -> Prepared {
        let mut report = EventReport::new(&notification);

        let event = match self.classifier.classify(&notification) {
            Ok(Classification::Ignore) => {
                log::debug!("Ignoring untracked object {}", notification.key);
                report.status = EventStatus::Ignored;
                return Prepared::done(report);
            }
            Ok(Classification::MetadataCleanup) => {
                report.table = Some(notification.table().to_string());
                match self.maintainer.cleanup_metadata(&notification).await {
                    Ok(()) => report.status = EventStatus::MetadataDeleted,
                    Err(e) => report.fail(Stage::MetadataCleanup, &e),
                }
                return Prepared::done(report);
            }
            Ok(Classification::Relevant(event)) => event,
            Err(e) => {
                report.fail(Stage::Classify, &e);
                return Prepared::done(report);
            }
        };
        report.table = Some(event.table.clone());

        if let Err(e) = self.maintainer.repair(&event).await {
            report.fail(Stage::Repair, &e);
            return Prepared::done(report);
        }
        report.repaired = true;

        let prune = self.maintainer.needs_prune(&event).then(|| event.clone());

        let metadata = match self.maintainer.metadata(&event).await {
            Ok(metadata) => metadata,
            Err(e) => {
                report.fail(Stage::Metadata, &e);
                return Prepared {
                    report,
                    prune,
                    pending: None,
                };
            }
        };

        match self.maintainer.update_baseline(&event, &metadata).await {
            Some(Ok(())) => report.baseline_updated = true,
            Some(Err(e)) => report.fail(Stage::Baseline, &e),
            None => {}
        }

        let pending = event.requires_dispatch.then(|| PendingDispatch {
            index,
            event,
            metadata,
        });
        Prepared {
            report,
            prune,
            pending,
        }
    }

    fn concurrency(&self) -> usize {
        self.config.pipeline.max_concurrent.max(1)
    }
}
