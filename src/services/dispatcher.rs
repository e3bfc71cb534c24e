// src/services/dispatcher.rs

//! Query dispatcher.
//!
//! Resolves the query fan-out of a parsed event through the tag registry
//! and submits one query per `(result table, query name)` pair.

use std::sync::Arc;

use serde::Serialize;

use crate::engine::QueryEngine;
use crate::error::{AppError, Result};
use crate::models::{
    Config, DispatchedQuery, LocationFilter, ParsedEvent, ResultTables, result_location,
};

/// A query accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedQuery {
    pub query_name: String,
    pub result_location: String,
    pub execution_id: String,
}

/// A query the engine rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedQuery {
    pub query_name: String,
    pub result_location: String,
    pub error: String,
}

/// Outcome of dispatching every query of one event.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DispatchOutcome {
    pub submitted: Vec<SubmittedQuery>,
    pub failures: Vec<FailedQuery>,
}

impl DispatchOutcome {
    pub fn attempted(&self) -> usize {
        self.submitted.len() + self.failures.len()
    }
}

/// Service building and submitting the queries of an event.
pub struct QueryDispatcher<'a> {
    config: Arc<Config>,
    engine: &'a dyn QueryEngine,
}

impl<'a> QueryDispatcher<'a> {
    pub fn new(config: Arc<Config>, engine: &'a dyn QueryEngine) -> Self {
        Self { config, engine }
    }

    /// Registry entry driving an event's fan-out.
    ///
    /// The energy-trace table is keyed by energy model id: the partition
    /// with its `<source_id>_` prefix removed.
    pub fn resolve(&self, event: &ParsedEvent) -> Result<&ResultTables> {
        let registry = &self.config.registry;
        if event.table != registry.energy_table {
            return registry.tags.get(&event.table).ok_or_else(|| {
                AppError::config(format!("No query tags for table '{}'", event.table))
            });
        }

        let model_id = event
            .partition
            .strip_prefix(event.source_id.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or_default();

        registry
            .tags
            .get(model_id)
            .filter(|_| !model_id.is_empty())
            .ok_or_else(|| AppError::UnknownEnergyModel {
                model_id: model_id.to_string(),
                partition: event.partition.clone(),
            })
    }

    /// Build every query of an event in registry order.
    pub fn plan(
        &self,
        event: &ParsedEvent,
        filter: LocationFilter,
    ) -> Result<Vec<DispatchedQuery>> {
        let tables = self.resolve(event)?;
        let location_filter = self.config.filters.token(filter);
        let window = &self.config.window;

        let queries = tables
            .iter()
            .flat_map(|(result_table, names)| names.iter().map(move |name| (result_table, name)))
            .map(|(result_table, query_name)| DispatchedQuery {
                query_name: query_name.clone(),
                result_location: result_location(
                    &self.config.results.bucket,
                    result_table,
                    &event.query_date,
                    &event.source_id,
                    query_name,
                ),
                query_date: event.query_date.clone(),
                partition: event.partition.clone(),
                location_filter: location_filter.to_string(),
                start_filter: window.start_filter(),
                stop_filter: window.stop_filter(),
            })
            .collect();

        Ok(queries)
    }

    /// Submit every query of an event.
    ///
    /// A failing submission does not stop the remaining ones; failures are
    /// collected in the outcome. Only an unresolvable registry entry fails
    /// the whole dispatch.
    pub async fn dispatch(
        &self,
        event: &ParsedEvent,
        filter: LocationFilter,
    ) -> Result<DispatchOutcome> {
        let queries = self.plan(event, filter)?;
        let mut outcome = DispatchOutcome::default();

        for query in queries {
            match self.engine.run_query(&query).await {
                Ok(execution_id) => outcome.submitted.push(SubmittedQuery {
                    query_name: query.query_name,
                    result_location: query.result_location,
                    execution_id,
                }),
                Err(e) => {
                    log::error!(
                        "Query {} for {} failed: {}",
                        query.query_name,
                        event.key,
                        e
                    );
                    outcome.failures.push(FailedQuery {
                        query_name: query.query_name,
                        result_location: query.result_location,
                        error: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Dispatched {}/{} queries for {} ({})",
            outcome.submitted.len(),
            outcome.attempted(),
            event.key,
            match filter {
                LocationFilter::CrossSection => "cross-section filter",
                LocationFilter::Edge => "edge filter",
            }
        );
        Ok(outcome)
    }
}
