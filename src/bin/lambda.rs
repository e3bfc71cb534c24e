//! AWS Lambda entry point for partition repair and query dispatch
//!
//! Deploy with `cargo lambda build --release --features lambda`
//! and subscribe the function to the data bucket's upload notifications.

use std::sync::Arc;

use lambda_runtime::{Error as LambdaError, LambdaEvent, service_fn};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use partition_dispatch::config::LambdaConfigLoader;
use partition_dispatch::engine::AthenaEngine;
use partition_dispatch::lambda::{AppContext, handler};
use partition_dispatch::models::S3Event;
use partition_dispatch::services::ObjectHousekeeping;
use partition_dispatch::storage::s3::S3Storage;

/// Main entry point for the AWS Lambda function.
#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Partition dispatch Lambda starting...");

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let storage = S3Storage::from_sdk_config(&sdk_config);
    let config = LambdaConfigLoader::new(storage.clone()).load_config().await?;

    let ctx = Arc::new(AppContext {
        engine: Arc::new(AthenaEngine::from_sdk_config(&sdk_config, &config)?),
        housekeeping: Arc::new(ObjectHousekeeping::new(config.housekeeping.clone(), config.layout.clone())),
        store: Arc::new(storage),
        config: Arc::new(config),
    });
    info!(
        "Tracking {} table(s), results in s3://{}",
        ctx.config.registry.tables.len(),
        ctx.config.results.bucket
    );

    lambda_runtime::run(service_fn(move |event: LambdaEvent<S3Event>| {
        handler(Arc::clone(&ctx), event)
    }))
    .await
}
