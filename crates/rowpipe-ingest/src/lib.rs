//! Rowpipe Ingest Library
//!
//! The write side of the pipeline: chunk CSV files onto a durable queue and
//! drain that queue into the `users` table.
//!
//! # Components
//!
//! - **producer**: reads a CSV file and publishes bounded batches
//! - **queue**: the [`queue::BatchQueue`] contract, with Postgres and in-memory backends
//! - **consumer**: validates delivered batches and applies the ack policy
//! - **writer**: one transactional multi-row INSERT per batch
//! - **db**: the bounded connection pool every store access goes through
//! - **secrets**: database credentials from AWS Secrets Manager or the environment
//!
//! # Example
//!
//! ```no_run
//! use rowpipe_ingest::{producer::FileBatchProducer, queue::MemoryQueue};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let queue = Arc::new(MemoryQueue::new("file_queue"));
//!     let summary = FileBatchProducer::new(queue, 5000)
//!         .publish_file("./data/users.csv")
//!         .await?;
//!     tracing::info!(batches = summary.batches, "Published file");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod consumer;
pub mod db;
pub mod producer;
pub mod queue;
pub mod secrets;
pub mod signal;
pub mod writer;
