use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use s3_undelete::config::Configuration;
use s3_undelete::pipeline::UndeletePipeline;
use s3_undelete::store::S3VersionStore;

#[derive(Parser, Debug)]
#[command(name = "s3-undelete")]
#[command(about = "Restore a versioned S3 bucket by removing delete markers")]
#[command(version)]
struct Cli {
    /// Bucket to undelete from
    #[arg(long)]
    bucket: Option<String>,

    /// Region the bucket is in
    #[arg(long)]
    region: Option<String>,

    /// Only remove markers under this key prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Marker-extraction worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Delete-request worker count
    #[arg(long)]
    request_workers: Option<usize>,

    /// Extra attempts for a failed bulk-delete call
    #[arg(long)]
    delete_retries: Option<u32>,

    /// Count delete markers without issuing any delete calls
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the effective configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// File/env configuration with CLI flags layered on top.
fn effective_config(cli: &Cli) -> Result<Configuration> {
    let mut config = match &cli.config {
        Some(path) => Configuration::load_from_path(path),
        None => Configuration::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(bucket) = &cli.bucket {
        config.bucket = bucket.clone();
    }
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.prefix = Some(prefix.clone());
    }
    if let Some(workers) = cli.workers {
        config.extraction_workers = workers;
    }
    if let Some(request_workers) = cli.request_workers {
        config.deletion_workers = request_workers;
    }
    if let Some(delete_retries) = cli.delete_retries {
        config.retry.max_retries = delete_retries;
    }
    if cli.dry_run {
        config.dry_run = true;
    }

    Ok(config)
}

fn display_config(config: &Configuration, json: bool) -> Result<()> {
    if json {
        let json = serde_json::to_string_pretty(config)
            .context("Failed to serialize configuration to JSON")?;
        println!("{json}");
    } else {
        println!("s3-undelete configuration:");
        println!("==========================");
        println!("Region: {}", config.region);
        println!("Bucket: {}", config.bucket);
        println!(
            "Prefix: {}",
            config.prefix.as_deref().unwrap_or("(entire bucket)")
        );
        println!("Extraction workers: {}", config.extraction_workers);
        println!("Deletion workers: {}", config.deletion_workers);
        println!("Delete retries: {}", config.retry.max_retries);
        println!("Retry backoff: {:?}", config.retry.backoff);
        println!("Dry run: {}", config.dry_run);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = effective_config(&cli)?;

    match &cli.command {
        Some(Commands::Config { json }) => {
            display_config(&config, *json)?;
            return Ok(());
        }
        Some(Commands::Validate) => {
            config.validate()?;
            tracing::info!("configuration is valid");
            return Ok(());
        }
        None => {}
    }

    config.validate()?;

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .load()
        .await;
    let client = aws_sdk_s3::Client::new(&sdk_config);
    let store = Arc::new(S3VersionStore::new(
        client,
        config.bucket.clone(),
        config.prefix.clone(),
    ));

    match &config.prefix {
        Some(prefix) => tracing::info!(
            "removing delete markers from bucket {} under prefix {prefix}",
            config.bucket
        ),
        None => tracing::info!("removing delete markers from bucket {}", config.bucket),
    }
    if config.dry_run {
        tracing::info!("dry-run mode: no delete calls will be issued");
    }

    let pipeline = UndeletePipeline::new(store, &config);
    let summary = pipeline
        .run()
        .await
        .context("listing object versions failed")?;

    tracing::info!(
        "done: {} pages listed, {} markers found, {} deleted in {} batches ({} failed batches, {} markers dropped)",
        summary.pages_listed,
        summary.markers_found,
        summary.markers_deleted,
        summary.batches_submitted,
        summary.batches_failed,
        summary.markers_dropped
    );

    Ok(())
}
