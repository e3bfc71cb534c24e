//! Query engine that only logs what it would do.
//!
//! Used by `partition-dispatch replay` against local storage, where there
//! is no catalog to repair and no engine to run queries on.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::engine::{QueryEngine, repair_statement};
use crate::error::Result;
use crate::models::DispatchedQuery;

/// A call observed by the dry-run engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunCall {
    Repair {
        table: String,
        date: String,
        partition: String,
    },
    Query(DispatchedQuery),
}

/// Records every repair and query instead of executing it.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    calls: Mutex<Vec<DryRunCall>>,
    next_id: AtomicUsize,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls observed so far, in arrival order.
    pub async fn calls(&self) -> Vec<DryRunCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl QueryEngine for DryRunEngine {
    async fn repair_partition(&self, table: &str, date: &str, partition: &str) -> Result<()> {
        log::info!("[dry-run] {}", repair_statement(table, date, partition));
        self.calls.lock().await.push(DryRunCall::Repair {
            table: table.to_string(),
            date: date.to_string(),
            partition: partition.to_string(),
        });
        Ok(())
    }

    async fn run_query(&self, query: &DispatchedQuery) -> Result<String> {
        let id = format!("dry-run-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        log::info!(
            "[dry-run] {} -> {} (steps {}..{}, filter: {})",
            query.query_name,
            query.result_location,
            query.start_filter,
            query.stop_filter,
            query.location_filter
        );
        self.calls.lock().await.push(DryRunCall::Query(query.clone()));
        Ok(id)
    }
}
