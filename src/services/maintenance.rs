// src/services/maintenance.rs

//! Per-event catalog and storage upkeep.
//!
//! Decides which bookkeeping an event triggers: partition repair always,
//! obsolete-data pruning only for the aggregate table, and a baseline
//! update only for objects flagged as baseline runs.

use std::sync::Arc;

use crate::engine::QueryEngine;
use crate::error::Result;
use crate::models::{Config, Notification, ObjectMetadata, ParsedEvent, baseline_network};
use crate::services::housekeeping::Housekeeping;
use crate::storage::ObjectStore;

/// Service running repair, prune and baseline steps for one event.
pub struct PartitionMaintainer<'a> {
    config: Arc<Config>,
    store: &'a dyn ObjectStore,
    engine: &'a dyn QueryEngine,
    housekeeping: &'a dyn Housekeeping,
}

impl<'a> PartitionMaintainer<'a> {
    pub fn new(
        config: Arc<Config>,
        store: &'a dyn ObjectStore,
        engine: &'a dyn QueryEngine,
        housekeeping: &'a dyn Housekeeping,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            housekeeping,
        }
    }

    /// Delete a metadata sidecar object.
    pub async fn cleanup_metadata(&self, notification: &Notification) -> Result<()> {
        self.store
            .delete_object(&notification.bucket, &notification.key)
            .await
    }

    /// Register the event's partition with the catalog.
    pub async fn repair(&self, event: &ParsedEvent) -> Result<()> {
        self.engine
            .repair_partition(&event.table, &event.query_date, &event.partition)
            .await
    }

    /// Whether the event's table has superseded files to prune.
    pub fn needs_prune(&self, event: &ParsedEvent) -> bool {
        event.table == self.config.registry.aggregate_table
    }

    /// Prune data superseded by the event, if its table calls for it.
    ///
    /// Returns `None` when the table is not the aggregate table.
    pub async fn prune(&self, event: &ParsedEvent) -> Option<Result<usize>> {
        if !self.needs_prune(event) {
            return None;
        }
        Some(
            self.housekeeping
                .prune_obsolete(self.store, &event.bucket, &event.key, &event.table)
                .await,
        )
    }

    /// Record a baseline run if the object's metadata marks one.
    ///
    /// Returns `None` when the metadata does not qualify.
    pub async fn update_baseline(
        &self,
        event: &ParsedEvent,
        metadata: &ObjectMetadata,
    ) -> Option<Result<()>> {
        let network = baseline_network(metadata)?;
        Some(
            self.housekeeping
                .update_baseline(self.store, network, &event.source_id)
                .await,
        )
    }

    /// Read the uploaded object's user metadata.
    pub async fn metadata(&self, event: &ParsedEvent) -> Result<ObjectMetadata> {
        self.store
            .head_object_metadata(&event.bucket, &event.key)
            .await
    }
}
