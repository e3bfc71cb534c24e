//! Partition dispatch CLI
//!
//! Local execution entry point. For AWS Lambda, use `partition-dispatch-lambda`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use partition_dispatch::{
    config::{apply_env_overrides, load_config},
    engine::{DryRunEngine, QueryEngine},
    error::{AppError, Result},
    models::{Config, S3Event},
    pipeline::{BatchOrchestrator, BatchReport},
    services::ObjectHousekeeping,
    storage::{LocalStorage, ObjectStore},
};

/// Partition repair and query dispatch for uploaded simulation data
#[derive(Parser, Debug)]
#[command(
    name = "partition-dispatch",
    version,
    about = "Repair catalog partitions and dispatch analytical queries"
)]
struct Cli {
    /// Path to the pipeline configuration file
    #[arg(short, long, default_value = "config/pipeline.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and query template coverage
    Validate,

    /// Run a saved S3 event through the pipeline
    Replay {
        /// Path to the S3 event JSON
        #[arg(short, long)]
        event: PathBuf,

        /// Directory standing in for object storage (one subdirectory per bucket)
        #[arg(short, long, default_value = "storage")]
        storage_dir: PathBuf,

        /// Run against S3 and Athena instead of local storage and a dry run
        #[cfg(feature = "aws")]
        #[arg(long)]
        aws: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(&cli.config)?;
    apply_env_overrides(&mut config);
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "Config OK ({} tracked tables, {} registry entries)",
                config.registry.tables.len(),
                config.registry.tags.len()
            );

            let missing = config.missing_query_templates();
            if !missing.is_empty() {
                log::error!("Queries without SQL templates: {}", missing.join(", "));
                return Err(AppError::config(format!(
                    "{} queries lack SQL templates",
                    missing.len()
                )));
            }
            log::info!("All {} query templates present", config.queries.len());

            log::info!("All validations passed!");
        }

        #[cfg(feature = "aws")]
        Command::Replay {
            event,
            storage_dir,
            aws,
        } => {
            let report = if aws {
                replay_aws(config, &event).await?
            } else {
                replay_local(config, &event, storage_dir).await?
            };
            print_report(&report)?;
        }

        #[cfg(not(feature = "aws"))]
        Command::Replay { event, storage_dir } => {
            let report = replay_local(config, &event, storage_dir).await?;
            print_report(&report)?;
        }

        Command::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Read a saved S3 event file.
fn read_event(path: &Path) -> Result<S3Event> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Replay against local storage with a dry-run engine.
async fn replay_local(config: Config, event: &Path, storage_dir: PathBuf) -> Result<BatchReport> {
    config.validate()?;
    log::info!("Replaying {} against {}", event.display(), storage_dir.display());

    let store = LocalStorage::new(storage_dir);
    let engine = DryRunEngine::new();
    let housekeeping = ObjectHousekeeping::new(config.housekeeping.clone(), config.layout.clone());
    let report = run_batch(config, event, &store, &engine, &housekeeping).await?;

    for call in engine.calls().await {
        log::debug!("Dry run: {:?}", call);
    }
    Ok(report)
}

/// Replay against S3 and Athena.
#[cfg(feature = "aws")]
async fn replay_aws(config: Config, event: &Path) -> Result<BatchReport> {
    use partition_dispatch::engine::AthenaEngine;
    use partition_dispatch::storage::s3::S3Storage;

    config.validate()?;
    log::info!("Replaying {} against S3 and Athena", event.display());

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = S3Storage::from_sdk_config(&sdk_config);
    let engine = AthenaEngine::from_sdk_config(&sdk_config, &config)?;
    let housekeeping = ObjectHousekeeping::new(config.housekeeping.clone(), config.layout.clone());
    run_batch(config, event, &store, &engine, &housekeeping).await
}

async fn run_batch(
    config: Config,
    event: &Path,
    store: &dyn ObjectStore,
    engine: &dyn QueryEngine,
    housekeeping: &ObjectHousekeeping,
) -> Result<BatchReport> {
    let notifications = read_event(event)?.into_notifications();
    let orchestrator = BatchOrchestrator::new(Arc::new(config), store, engine, housekeeping);
    Ok(orchestrator.run(notifications).await)
}

fn print_report(report: &BatchReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);

    for (key, failure) in report.failures() {
        log::warn!("{:?} failure for {}: {}", failure.stage, key, failure.message);
    }
    if report.is_clean() {
        log::info!("Replay complete!");
    } else {
        log::warn!(
            "Replay finished with {} partial and {} failed event(s)",
            report.summary.partial,
            report.summary.failed
        );
    }
    Ok(())
}
