//! Amazon Athena query engine.
//!
//! Partition repairs are issued as `ALTER TABLE ... ADD IF NOT EXISTS
//! PARTITION` statements and awaited until they reach a terminal state, so
//! a repaired partition is visible before any query over it is submitted.
//! Analytical queries are fire-and-forget: the execution id is returned and
//! the engine writes results to the query's result location.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_athena::Client;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{QueryEngine, render_query, repair_statement};
use crate::error::{AppError, Result};
use crate::models::{AthenaConfig, Config, DispatchedQuery};

/// Athena-backed catalog and query engine.
pub struct AthenaEngine {
    client: Client,
    settings: AthenaConfig,
    templates: IndexMap<String, String>,

    /// Partitions repaired by this process, as `table/date/partition`
    repaired: Mutex<HashSet<String>>,
}

impl AthenaEngine {
    /// Create an engine; fails if any registered query lacks a SQL template.
    pub fn new(client: Client, config: &Config) -> Result<Self> {
        let missing = config.missing_query_templates();
        if !missing.is_empty() {
            return Err(AppError::config(format!(
                "Missing SQL templates for queries: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            client,
            settings: config.athena.clone(),
            templates: config.queries.clone(),
            repaired: Mutex::new(HashSet::new()),
        })
    }

    /// Create an engine sharing an already loaded SDK configuration.
    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig, config: &Config) -> Result<Self> {
        Self::new(Client::new(sdk_config), config)
    }

    /// Start a statement and return its execution id.
    async fn start(&self, sql: &str, output_location: Option<&str>) -> Result<String> {
        let context = QueryExecutionContext::builder()
            .database(&self.settings.database)
            .build();

        let mut request = self
            .client
            .start_query_execution()
            .query_string(sql)
            .query_execution_context(context)
            .work_group(&self.settings.workgroup);

        if let Some(location) = output_location {
            request = request.result_configuration(
                ResultConfiguration::builder()
                    .output_location(location)
                    .build(),
            );
        }

        let output = request
            .send()
            .await
            .map_err(|e| AppError::athena(e.into_service_error()))?;

        output
            .query_execution_id()
            .map(str::to_string)
            .ok_or_else(|| AppError::athena("StartQueryExecution returned no execution id"))
    }

    /// Poll an execution until it succeeds, fails or the repair timeout elapses.
    async fn wait_for(&self, execution_id: &str) -> Result<()> {
        let interval = Duration::from_millis(self.settings.poll_interval_ms.max(1));
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.settings.repair_timeout_secs);

        loop {
            let output = self
                .client
                .get_query_execution()
                .query_execution_id(execution_id)
                .send()
                .await
                .map_err(|e| AppError::athena(e.into_service_error()))?;

            let status = output.query_execution().and_then(|q| q.status());
            match status.and_then(|s| s.state()) {
                Some(QueryExecutionState::Succeeded) => return Ok(()),
                Some(QueryExecutionState::Failed) | Some(QueryExecutionState::Cancelled) => {
                    let reason = status
                        .and_then(|s| s.state_change_reason())
                        .unwrap_or("no reason given");
                    return Err(AppError::athena(format!(
                        "execution {execution_id} did not succeed: {reason}"
                    )));
                }
                state => debug!("Execution {} is {:?}", execution_id, state),
            }

            if tokio::time::Instant::now() >= deadline {
                warn!("Gave up waiting for execution {}", execution_id);
                return Err(AppError::Timeout(format!(
                    "execution {execution_id} still running after {}s",
                    self.settings.repair_timeout_secs
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[async_trait]
impl QueryEngine for AthenaEngine {
    async fn repair_partition(&self, table: &str, date: &str, partition: &str) -> Result<()> {
        let marker = format!("{table}/{date}/{partition}");
        if self.repaired.lock().await.contains(&marker) {
            debug!("Partition {} already repaired", marker);
            return Ok(());
        }

        let execution_id = self
            .start(&repair_statement(table, date, partition), None)
            .await?;
        self.wait_for(&execution_id).await?;

        self.repaired.lock().await.insert(marker);
        info!(
            "Repaired partition date={}/partition_name={} of {}",
            date, partition, table
        );
        Ok(())
    }

    async fn run_query(&self, query: &DispatchedQuery) -> Result<String> {
        let template = self.templates.get(&query.query_name).ok_or_else(|| {
            AppError::query(&query.query_name, "no SQL template configured")
        })?;
        let sql = render_query(template, query)?;

        let execution_id = self
            .start(&sql, Some(&query.result_location))
            .await
            .map_err(|e| AppError::query(&query.query_name, e))?;

        info!(
            "Started {} as {} -> {}",
            query.query_name, execution_id, query.result_location
        );
        Ok(execution_id)
    }
}
