//! Bulk writer for the `users` table

use async_trait::async_trait;
use rowpipe_common::{Field, Record};
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::db::{ConnectionPool, DbError};

/// Postgres accepts at most 65535 bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Rows that fit in one INSERT statement
pub const MAX_ROWS_PER_STATEMENT: usize = MAX_BIND_PARAMS / Field::ALL.len();

#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Pool(#[from] DbError),

    #[error("Bulk insert failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Destination for validated records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist all records atomically, returning the number of rows written
    async fn write(&self, records: &[Record]) -> Result<u64, WriteError>;
}

/// Writes validated batches with one multi-row INSERT per transaction
#[derive(Clone, Debug)]
pub struct BulkWriter {
    pool: ConnectionPool,
}

impl BulkWriter {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Insert `records` in a single transaction.
    ///
    /// An empty slice returns `Ok(0)` without touching the pool. On any
    /// failure the transaction is rolled back, nothing is written, and the
    /// lease is still returned. No retries happen here.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn write_batch(&self, records: &[Record]) -> Result<u64, WriteError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut lease = self.pool.acquire().await?;
        let result = match lease.connection() {
            Ok(conn) => insert_all(conn, records).await.map_err(WriteError::from),
            Err(e) => Err(e.into()),
        };
        lease.release();

        match &result {
            Ok(written) => info!(written, "Committed batch"),
            Err(e) => error!(error = %e, "Batch insert rolled back"),
        }

        result
    }
}

#[async_trait]
impl RecordSink for BulkWriter {
    async fn write(&self, records: &[Record]) -> Result<u64, WriteError> {
        self.write_batch(records).await
    }
}

async fn insert_all(conn: &mut PgConnection, records: &[Record]) -> Result<u64, sqlx::Error> {
    let mut tx = conn.begin().await?;

    let mut written = 0;
    for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
        let mut statement = insert_statement(chunk);
        written += statement.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}

fn insert_statement(records: &[Record]) -> QueryBuilder<'_, Postgres> {
    let columns: Vec<&str> = Field::ALL.iter().map(|f| f.as_str()).collect();
    let mut builder = QueryBuilder::new(format!("INSERT INTO users ({}) ", columns.join(", ")));

    builder.push_values(records, |mut row, record| {
        row.push_bind(&record.name)
            .push_bind(&record.email)
            .push_bind(&record.mobile)
            .push_bind(record.gender.as_str())
            .push_bind(record.age)
            .push_bind(&record.designation)
            .push_bind(&record.city)
            .push_bind(&record.pin)
            .push_bind(&record.fav_food)
            .push_bind(&record.fav_movie);
    });

    builder
}
