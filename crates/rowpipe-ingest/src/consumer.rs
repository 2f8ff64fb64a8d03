//! Batch consumer
//!
//! Pulls messages off a [`BatchQueue`], decodes each into a [`Batch`],
//! validates every record, and hands the valid ones to a [`RecordSink`].
//! Nothing that goes wrong with a single message stops the loop.
//!
//! # Acknowledgment
//!
//! With [`AckMode::AfterCommit`] (the default) a message is acked only once
//! its records are committed, or once it is known to hold nothing writable.
//! A failed write is nacked for redelivery until it has been delivered
//! `max_attempts` times, then dead-lettered. A body that does not decode is
//! dead-lettered straight away.
//!
//! With [`AckMode::OnReceipt`] the message is acked as soon as it arrives and
//! every failure simply drops the batch with a log line (at-most-once).

use rowpipe_common::{validate_record, Batch, Record};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::queue::{BatchQueue, Delivery, QueueError};
use crate::writer::RecordSink;

/// When a delivery is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    #[default]
    AfterCommit,
    OnReceipt,
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "after-commit" => Ok(AckMode::AfterCommit),
            "on-receipt" | "auto" => Ok(AckMode::OnReceipt),
            other => Err(format!(
                "unknown ack mode '{other}' (expected after-commit or on-receipt)"
            )),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckMode::AfterCommit => f.write_str("after-commit"),
            AckMode::OnReceipt => f.write_str("on-receipt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub ack_mode: AckMode,
    /// Deliveries allowed before a failing batch is dead-lettered
    pub max_attempts: u32,
    /// How long one `receive` call may block
    pub receive_wait: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::AfterCommit,
            max_attempts: 5,
            receive_wait: Duration::from_secs(1),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Valid records were committed
    Committed { written: u64, rejected: usize },
    /// Every record failed validation, or the batch was empty
    NothingToWrite { rejected: usize },
    /// The body was not a batch
    Malformed,
    /// The write failed; `requeued` tells whether it will be delivered again
    WriteFailed { requeued: bool },
}

/// Running totals for one or more workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub batches: u64,
    pub records_written: u64,
    pub records_rejected: u64,
    pub malformed: u64,
    pub write_failures: u64,
}

impl ConsumerStats {
    pub fn record(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        match outcome {
            BatchOutcome::Committed { written, rejected } => {
                self.records_written += written;
                self.records_rejected += *rejected as u64;
            },
            BatchOutcome::NothingToWrite { rejected } => {
                self.records_rejected += *rejected as u64;
            },
            BatchOutcome::Malformed => self.malformed += 1,
            BatchOutcome::WriteFailed { .. } => self.write_failures += 1,
        }
    }

    pub fn merge(&mut self, other: &ConsumerStats) {
        self.batches += other.batches;
        self.records_written += other.records_written;
        self.records_rejected += other.records_rejected;
        self.malformed += other.malformed;
        self.write_failures += other.write_failures;
    }
}

/// Validate every record of a batch, keeping the valid ones in order.
///
/// Returns the valid records and the number rejected. Each rejection is
/// logged with its position and reasons.
pub fn validate_batch(batch: &Batch) -> (Vec<Record>, usize) {
    let mut valid = Vec::with_capacity(batch.len());
    let mut rejected = 0;

    for (index, raw) in batch.records().iter().enumerate() {
        match validate_record(raw) {
            Ok(record) => valid.push(record),
            Err(errors) => {
                rejected += 1;
                warn!(index, errors = %errors, "Dropping invalid record");
            },
        }
    }

    (valid, rejected)
}

/// One worker draining a queue into a sink
pub struct BatchConsumer<Q: ?Sized, S: ?Sized> {
    queue: Arc<Q>,
    sink: Arc<S>,
    settings: ConsumerSettings,
    worker_id: Uuid,
}

impl<Q, S> BatchConsumer<Q, S>
where
    Q: BatchQueue + ?Sized,
    S: RecordSink + ?Sized,
{
    pub fn new(queue: Arc<Q>, sink: Arc<S>, settings: ConsumerSettings) -> Self {
        Self {
            queue,
            sink,
            settings,
            worker_id: Uuid::new_v4(),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Consume until `shutdown` is cancelled.
    ///
    /// Cancellation only interrupts the wait for the next message; a batch
    /// already received is processed and settled before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> ConsumerStats {
        info!(
            worker = %self.worker_id,
            queue = self.queue.name(),
            ack_mode = %self.settings.ack_mode,
            "Consumer started, waiting for messages"
        );

        let mut stats = ConsumerStats::default();
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.settings.receive_wait) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let outcome = self.process(delivery).await;
                    stats.record(&outcome);
                },
                Ok(None) => {},
                Err(e) => {
                    error!(worker = %self.worker_id, error = %e, "Queue receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.receive_wait) => {},
                    }
                },
            }
        }

        info!(
            worker = %self.worker_id,
            batches = stats.batches,
            records_written = stats.records_written,
            records_rejected = stats.records_rejected,
            "Consumer stopped"
        );
        stats
    }

    /// Handle one delivery end to end and settle it per the ack mode
    pub async fn process(&self, delivery: Delivery) -> BatchOutcome {
        let on_receipt = self.settings.ack_mode == AckMode::OnReceipt;
        if on_receipt {
            self.settle("ack", self.queue.ack(&delivery).await);
        }

        let batch = match Batch::from_bytes(&delivery.body) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(
                    worker = %self.worker_id,
                    message_id = delivery.id,
                    error = %e,
                    "Message processing error: malformed batch"
                );
                if !on_receipt {
                    let result = self.queue.dead_letter(&delivery, &e.to_string()).await;
                    self.settle("dead_letter", result);
                }
                return BatchOutcome::Malformed;
            },
        };

        let (records, rejected) = validate_batch(&batch);
        if records.is_empty() {
            debug!(message_id = delivery.id, rejected, "Nothing to write");
            if !on_receipt {
                self.settle("ack", self.queue.ack(&delivery).await);
            }
            return BatchOutcome::NothingToWrite { rejected };
        }

        match self.sink.write(&records).await {
            Ok(written) => {
                info!(
                    worker = %self.worker_id,
                    message_id = delivery.id,
                    written,
                    rejected,
                    "Stored batch"
                );
                if !on_receipt {
                    self.settle("ack", self.queue.ack(&delivery).await);
                }
                BatchOutcome::Committed { written, rejected }
            },
            Err(e) => {
                error!(
                    worker = %self.worker_id,
                    message_id = delivery.id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Database error while storing batch"
                );
                if on_receipt {
                    return BatchOutcome::WriteFailed { requeued: false };
                }
                if delivery.attempt >= self.settings.max_attempts {
                    let reason = format!("write failed after {} attempts: {e}", delivery.attempt);
                    self.settle("dead_letter", self.queue.dead_letter(&delivery, &reason).await);
                    BatchOutcome::WriteFailed { requeued: false }
                } else {
                    self.settle("nack", self.queue.nack(&delivery).await);
                    BatchOutcome::WriteFailed { requeued: true }
                }
            },
        }
    }

    fn settle(&self, action: &str, result: Result<(), QueueError>) {
        if let Err(e) = result {
            error!(worker = %self.worker_id, action, error = %e, "Failed to settle delivery");
        }
    }
}

/// Run `workers` consumers against the same queue and sink until `shutdown`
/// is cancelled, returning the combined totals.
pub async fn run_workers<Q, S>(
    workers: usize,
    queue: Arc<Q>,
    sink: Arc<S>,
    settings: ConsumerSettings,
    shutdown: CancellationToken,
) -> ConsumerStats
where
    Q: BatchQueue + ?Sized + 'static,
    S: RecordSink + ?Sized + 'static,
{
    let mut tasks = JoinSet::new();
    for _ in 0..workers.max(1) {
        let consumer = BatchConsumer::new(Arc::clone(&queue), Arc::clone(&sink), settings.clone());
        let shutdown = shutdown.clone();
        tasks.spawn(async move { consumer.run(shutdown).await });
    }

    let mut total = ConsumerStats::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(stats) => total.merge(&stats),
            Err(e) => error!(error = %e, "Consumer worker panicked"),
        }
    }
    total
}
