// src/lambda/mod.rs

//! AWS Lambda handler for S3 upload notifications.
//!
//! Each invocation:
//! 1. Decodes the S3 event into notifications
//! 2. Repairs partitions and runs housekeeping (pass 1)
//! 3. Dispatches the query fan-out of every repaired partition (pass 2)
//! 4. Returns the batch report

use std::sync::Arc;
use std::time::Instant;

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::engine::QueryEngine;
use crate::models::{Config, S3Event};
use crate::pipeline::{BatchOrchestrator, BatchReport};
use crate::services::Housekeeping;
use crate::storage::ObjectStore;

/// Collaborators built once per cold start and shared by invocations.
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn ObjectStore>,
    pub engine: Arc<dyn QueryEngine>,
    pub housekeeping: Arc<dyn Housekeeping>,
}

/// Lambda response payload.
#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    /// Whether every notification was handled without failures
    pub success: bool,

    /// Summary of the failures, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,

    #[serde(flatten)]
    pub report: BatchReport,
}

/// Main Lambda handler function.
#[instrument(skip_all)]
pub async fn handler(
    ctx: Arc<AppContext>,
    event: LambdaEvent<S3Event>,
) -> std::result::Result<DispatchResponse, LambdaError> {
    let (payload, context) = event.into_parts();
    info!("Handling request {}", context.request_id);
    Ok(process(&ctx, payload).await)
}

/// Run one S3 event through both passes.
pub async fn process(ctx: &AppContext, payload: S3Event) -> DispatchResponse {
    let start = Instant::now();
    let notifications = payload.into_notifications();
    info!("Received {} record(s)", notifications.len());

    let orchestrator = BatchOrchestrator::new(
        Arc::clone(&ctx.config),
        ctx.store.as_ref(),
        ctx.engine.as_ref(),
        ctx.housekeeping.as_ref(),
    );
    let report = orchestrator.run(notifications).await;

    let success = report.is_clean();
    let error = (!success).then(|| {
        format!(
            "{} partial, {} failed of {} notification(s)",
            report.summary.partial, report.summary.failed, report.summary.total
        )
    });
    let execution_time_ms = start.elapsed().as_millis() as u64;

    if let Some(message) = &error {
        warn!("Batch finished with failures: {}", message);
    }
    info!(
        "Batch completed: {} queries submitted in {}ms",
        report.summary.queries_submitted, execution_time_ms
    );

    DispatchResponse {
        success,
        error,
        execution_time_ms,
        report,
    }
}
