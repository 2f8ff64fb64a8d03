//! Rowpipe Ingest - publish CSV files and consume batches into Postgres

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rowpipe_common::logging::{init_logging, LogConfig, LogLevel};
use rowpipe_ingest::{
    config::IngestConfig,
    consumer::run_workers,
    db::ConnectionPool,
    producer::FileBatchProducer,
    queue::{BatchQueue, PgBatchQueue},
    secrets::{provider_from_config, resolve_credentials},
    signal::shutdown_signal,
    writer::BulkWriter,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rowpipe-ingest")]
#[command(author, version, about = "Rowpipe batch ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk a CSV file and publish every chunk to the queue
    Publish {
        /// CSV file whose first row is the header
        file: PathBuf,

        /// Rows per batch (overrides FILE_BATCH_SIZE)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Consume batches into the users table until interrupted
    Consume {
        /// Concurrent workers (overrides CONSUMER_WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Report queue depth and dead letters
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("rowpipe-ingest")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load()?;

    match cli.command {
        Command::Publish { file, batch_size } => {
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
                config.validate()?;
            }
            publish(&config, file).await
        },
        Command::Consume { workers } => {
            if let Some(workers) = workers {
                config.workers = workers;
                config.validate()?;
            }
            consume(&config).await
        },
        Command::Status => status(&config).await,
    }
}

async fn open_queue(config: &IngestConfig) -> Result<PgBatchQueue> {
    let queue = PgBatchQueue::connect(&config.queue)
        .await
        .context("Failed to connect to the queue backend")?;
    queue.declare().await.context("Failed to declare the queue")?;
    Ok(queue)
}

async fn publish(config: &IngestConfig, file: PathBuf) -> Result<()> {
    let queue = Arc::new(open_queue(config).await?);
    let producer = FileBatchProducer::new(Arc::clone(&queue), config.batch_size);

    let result = producer.publish_file(&file).await;
    queue.close().await;

    let summary =
        result.with_context(|| format!("File publishing error for {}", file.display()))?;
    info!(
        batches = summary.batches,
        records = summary.records,
        "Publish complete"
    );
    Ok(())
}

async fn consume(config: &IngestConfig) -> Result<()> {
    let provider = provider_from_config(&config.credentials).await;
    let resolved = resolve_credentials(provider.as_ref()).await;

    let pool = ConnectionPool::connect(
        resolved.credentials.connect_options(),
        config.database.pool_settings(),
    )
    .await
    .context("Database connection pool initialization failed")?;

    let queue = Arc::new(open_queue(config).await?);
    let writer = Arc::new(BulkWriter::new(pool.clone()));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    info!(
        workers = config.workers,
        queue = %config.queue.name,
        "Waiting for messages. Press Ctrl+C to stop."
    );

    let stats = run_workers(
        config.workers,
        Arc::clone(&queue),
        writer,
        config.queue.consumer_settings(),
        shutdown,
    )
    .await;

    pool.close().await;
    queue.close().await;

    info!(
        batches = stats.batches,
        records_written = stats.records_written,
        records_rejected = stats.records_rejected,
        malformed = stats.malformed,
        write_failures = stats.write_failures,
        "Consumer shut down gracefully"
    );
    Ok(())
}

async fn status(config: &IngestConfig) -> Result<()> {
    let queue = open_queue(config).await?;
    let depth = queue.depth().await.context("Failed to read queue depth")?;
    queue.close().await;

    info!(
        queue = %config.queue.name,
        ready = depth.ready,
        in_flight = depth.in_flight,
        dead_lettered = depth.dead_lettered,
        "Queue status"
    );
    Ok(())
}
