//! Postgres-backed durable queue
//!
//! Messages are rows in `batch_queue`. A consumer claims the oldest visible
//! row with `FOR UPDATE SKIP LOCKED`, which pushes its `visible_at` forward by
//! the visibility timeout and bumps `attempts`. A consumer that dies without
//! settling therefore only delays the message. Dead letters are moved to
//! `batch_dead_letters` together with the reason.
//!
//! The queue uses its own sqlx pool, separate from the `users` store pool.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::{BatchQueue, Delivery, QueueDepth, QueueError};
use crate::config::QueueConfig;

const DECLARE_STATEMENTS: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS batch_queue (
        id          BIGSERIAL PRIMARY KEY,
        queue_name  TEXT NOT NULL,
        body        BYTEA NOT NULL,
        attempts    INTEGER NOT NULL DEFAULT 0,
        visible_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS batch_queue_claim_idx
        ON batch_queue (queue_name, visible_at, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS batch_dead_letters (
        id               BIGINT PRIMARY KEY,
        queue_name       TEXT NOT NULL,
        body             BYTEA NOT NULL,
        attempts         INTEGER NOT NULL,
        reason           TEXT NOT NULL,
        enqueued_at      TIMESTAMPTZ NOT NULL,
        dead_lettered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Durable FIFO over two Postgres tables
#[derive(Clone, Debug)]
pub struct PgBatchQueue {
    pool: PgPool,
    name: String,
    visibility_timeout: Duration,
    poll_interval: Duration,
    retry_delay: Duration,
}

impl PgBatchQueue {
    /// Wrap an existing pool with default timings
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            visibility_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Open the queue's own pool from configuration
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        info!(
            queue = %config.name,
            max_connections = config.max_connections,
            "Queue backend connected"
        );

        Ok(Self::new(pool, config.name.clone())
            .with_visibility_timeout(config.visibility_timeout())
            .with_poll_interval(config.poll_interval()))
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Delay before a nacked message becomes visible again
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Create the queue tables if they do not exist yet
    pub async fn declare(&self) -> Result<(), QueueError> {
        for statement in DECLARE_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(queue = %self.name, "Queue declared");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        let row: Option<(i64, Vec<u8>, i32)> = sqlx::query_as(
            r#"
            UPDATE batch_queue
            SET attempts = attempts + 1,
                visible_at = NOW() + make_interval(secs => $2)
            WHERE id = (
                SELECT id
                FROM batch_queue
                WHERE queue_name = $1 AND visible_at <= NOW()
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, body, attempts
            "#,
        )
        .bind(&self.name)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, body, attempts)| Delivery {
            id,
            body,
            attempt: u32::try_from(attempts).unwrap_or(0),
        }))
    }
}

#[async_trait]
impl BatchQueue for PgBatchQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(queue = %self.name, bytes = body.len()))]
    async fn publish(&self, body: &[u8]) -> Result<i64, QueueError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO batch_queue (queue_name, body) VALUES ($1, $2) RETURNING id",
        )
        .bind(&self.name)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM batch_queue WHERE id = $1 AND queue_name = $2")
            .bind(delivery.id)
            .bind(&self.name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(delivery.id));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE batch_queue
            SET visible_at = NOW() + make_interval(secs => $3)
            WHERE id = $1 AND queue_name = $2
            "#,
        )
        .bind(delivery.id)
        .bind(&self.name)
        .bind(self.retry_delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(delivery.id));
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM batch_queue
                WHERE id = $1 AND queue_name = $2
                RETURNING id, queue_name, body, attempts, enqueued_at
            )
            INSERT INTO batch_dead_letters (id, queue_name, body, attempts, reason, enqueued_at)
            SELECT id, queue_name, body, attempts, $3, enqueued_at
            FROM moved
            "#,
        )
        .bind(delivery.id)
        .bind(&self.name)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(delivery.id));
        }
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let (ready, in_flight): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE visible_at <= NOW()),
                   COUNT(*) FILTER (WHERE visible_at > NOW())
            FROM batch_queue
            WHERE queue_name = $1
            "#,
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await?;

        let dead_lettered: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM batch_dead_letters WHERE queue_name = $1")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await?;

        Ok(QueueDepth {
            ready: ready.max(0) as u64,
            in_flight: in_flight.max(0) as u64,
            dead_lettered: dead_lettered.max(0) as u64,
        })
    }
}
