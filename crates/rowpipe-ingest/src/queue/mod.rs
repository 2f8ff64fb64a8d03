//! Durable batch queue
//!
//! Producers and consumers only meet through a [`BatchQueue`]. A message body
//! is an encoded [`rowpipe_common::Batch`]; the queue never looks inside it.
//!
//! Delivery contract:
//!
//! - `receive` hands a message to exactly one consumer and hides it from the
//!   others until it is settled (or, for the Postgres backend, until the
//!   visibility timeout lapses)
//! - `ack` removes it for good
//! - `nack` makes it deliverable again
//! - `dead_letter` moves it to the dead-letter store with a reason
//!
//! `Delivery::attempt` counts deliveries, starting at 1.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PgBatchQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Delivery {0} is not in flight on this queue")]
    UnknownDelivery(i64),
}

/// A message handed to one consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub body: Vec<u8>,
    pub attempt: u32,
}

/// Message counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub ready: u64,
    pub in_flight: u64,
    pub dead_lettered: u64,
}

#[async_trait]
pub trait BatchQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Durably enqueue one message body, returning its id
    async fn publish(&self, body: &[u8]) -> Result<i64, QueueError>;

    /// Wait up to `wait` for the next message
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    async fn depth(&self) -> Result<QueueDepth, QueueError>;
}
