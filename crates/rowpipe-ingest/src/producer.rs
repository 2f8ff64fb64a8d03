//! File batch producer
//!
//! Reads a CSV file (first row is the header) and publishes every run of
//! `batch_size` consecutive rows as one queue message, in file order. Only one
//! chunk is held in memory at a time: a chunk is published before the next
//! one is read.

use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use rowpipe_common::{Batch, RawRecord, RowpipeError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tracing::{info, instrument};

use crate::queue::{BatchQueue, QueueError};

/// The source file could not be opened or parsed
#[derive(Error, Debug)]
pub enum SourceReadError {
    #[error("Cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: csv_async::Error,
    },

    #[error("{} has no header row", path.display())]
    MissingHeader { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error(transparent)]
    SourceRead(#[from] SourceReadError),

    #[error("Failed to encode batch: {0}")]
    Encode(#[from] RowpipeError),

    #[error("Failed to publish batch: {0}")]
    Publish(#[from] QueueError),
}

/// Lazy sequence of batches over one CSV file.
///
/// Finite, and restartable from the start by opening the file again.
pub struct FileBatches {
    path: PathBuf,
    reader: AsyncReader<File>,
    headers: Vec<String>,
    batch_size: usize,
    row: StringRecord,
    exhausted: bool,
}

impl FileBatches {
    pub async fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self, SourceReadError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|source| SourceReadError::Open {
            path: path.clone(),
            source,
        })?;

        let mut reader = AsyncReaderBuilder::new().has_headers(true).create_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .await
            .map_err(|source| SourceReadError::Parse {
                path: path.clone(),
                source,
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.iter().all(String::is_empty) {
            return Err(SourceReadError::MissingHeader { path });
        }

        Ok(Self {
            path,
            reader,
            headers,
            batch_size: batch_size.max(1),
            row: StringRecord::new(),
            exhausted: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Read the next chunk. `None` once the file is exhausted; a returned
    /// batch is never empty.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, SourceReadError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut batch = Batch::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            let more = self
                .reader
                .read_record(&mut self.row)
                .await
                .map_err(|source| SourceReadError::Parse {
                    path: self.path.clone(),
                    source,
                })?;
            if !more {
                self.exhausted = true;
                break;
            }
            batch.push(raw_record(&self.headers, &self.row));
        }

        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// Map one CSV row onto its header names. Empty cells become `null`.
fn raw_record(headers: &[String], row: &StringRecord) -> RawRecord {
    headers
        .iter()
        .zip(row.iter())
        .map(|(header, cell)| {
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            (header.clone(), value)
        })
        .collect()
}

/// Totals for one publish run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub batches: usize,
    pub records: usize,
}

/// Chunks source files and publishes the chunks to a [`BatchQueue`]
pub struct FileBatchProducer<Q: ?Sized> {
    queue: Arc<Q>,
    batch_size: usize,
}

impl<Q: BatchQueue + ?Sized> FileBatchProducer<Q> {
    pub fn new(queue: Arc<Q>, batch_size: usize) -> Self {
        Self { queue, batch_size }
    }

    /// Publish every chunk of `path`.
    ///
    /// A read or parse error aborts the run; chunks already published stay
    /// on the queue.
    #[instrument(
        skip(self, path),
        fields(path = %path.as_ref().display(), batch_size = self.batch_size)
    )]
    pub async fn publish_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<PublishSummary, ProducerError> {
        let mut batches = FileBatches::open(path.as_ref(), self.batch_size).await?;
        let mut summary = PublishSummary::default();

        while let Some(batch) = batches.next_batch().await? {
            let body = batch.to_bytes()?;
            let message_id = self.queue.publish(&body).await?;

            summary.batches += 1;
            summary.records += batch.len();
            info!(message_id, records = batch.len(), "Published {} records", batch.len());
        }

        info!(
            batches = summary.batches,
            records = summary.records,
            queue = self.queue.name(),
            "Finished publishing file"
        );

        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const HEADER: &str = "name,email,mobile,gender,age,designation,city,pin,fav_food,fav_movie";

    fn csv_with_rows(rows: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for i in 0..rows {
            writeln!(
                file,
                "user{i},user{i}@example.com,98765{i:05},male,30,Engineer,Pune,411001,Poha,Sholay"
            )
            .unwrap();
        }
        file.flush().unwrap();
        file
    }

    async fn drain(queue: &MemoryQueue) -> Vec<Batch> {
        let mut batches = Vec::new();
        while let Some(delivery) = queue.receive(Duration::ZERO).await.unwrap() {
            batches.push(Batch::from_bytes(&delivery.body).unwrap());
            queue.ack(&delivery).await.unwrap();
        }
        batches
    }

    #[tokio::test]
    async fn test_batch_count_is_ceil_of_rows_over_limit() {
        for (rows, limit, expected) in [(3, 2, 2), (4, 2, 2), (5, 5, 1), (1, 10, 1), (7, 3, 3)] {
            let file = csv_with_rows(rows);
            let queue = Arc::new(MemoryQueue::new("test"));
            let producer = FileBatchProducer::new(Arc::clone(&queue), limit);

            let summary = producer.publish_file(file.path()).await.unwrap();
            assert_eq!(summary.batches, expected, "rows={rows} limit={limit}");
            assert_eq!(summary.records, rows);

            let batches = drain(&queue).await;
            assert_eq!(batches.len(), expected);
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= limit));
        }
    }

    #[tokio::test]
    async fn test_concatenation_preserves_row_order() {
        let file = csv_with_rows(7);
        let queue = Arc::new(MemoryQueue::new("test"));
        FileBatchProducer::new(Arc::clone(&queue), 3)
            .publish_file(file.path())
            .await
            .unwrap();

        let names: Vec<Value> = drain(&queue)
            .await
            .into_iter()
            .flat_map(Batch::into_records)
            .map(|r| r["name"].clone())
            .collect();
        let expected: Vec<Value> = (0..7).map(|i| json!(format!("user{i}"))).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_header_only_file_publishes_nothing() {
        let file = csv_with_rows(0);
        let queue = Arc::new(MemoryQueue::new("test"));

        let summary = FileBatchProducer::new(Arc::clone(&queue), 2)
            .publish_file(file.path())
            .await
            .unwrap();

        assert_eq!(summary, PublishSummary::default());
        assert_eq!(queue.depth().await.unwrap().ready, 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_source_read_error() {
        let queue = Arc::new(MemoryQueue::new("test"));
        let err = FileBatchProducer::new(queue, 2)
            .publish_file("/definitely/not/here.csv")
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::SourceRead(SourceReadError::Open { .. })));
    }

    #[tokio::test]
    async fn test_empty_file_has_no_header() {
        let file = NamedTempFile::new().unwrap();
        let err = FileBatches::open(file.path(), 2).await.err().unwrap();
        assert!(matches!(err, SourceReadError::MissingHeader { .. }));
    }

    #[tokio::test]
    async fn test_ragged_row_aborts_remaining_chunks() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name,age").unwrap();
        writeln!(file, "a,1").unwrap();
        writeln!(file, "b,2").unwrap();
        writeln!(file, "c,3,extra").unwrap();
        writeln!(file, "d,4").unwrap();
        file.flush().unwrap();

        let queue = Arc::new(MemoryQueue::new("test"));
        let err = FileBatchProducer::new(Arc::clone(&queue), 2)
            .publish_file(file.path())
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::SourceRead(SourceReadError::Parse { .. })));
        assert_eq!(queue.depth().await.unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_empty_cells_become_null_and_stream_restarts() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name,city").unwrap();
        writeln!(file, "asha,").unwrap();
        file.flush().unwrap();

        let mut batches = FileBatches::open(file.path(), 10).await.unwrap();
        let first = batches.next_batch().await.unwrap().unwrap();
        assert_eq!(first.records()[0]["city"], Value::Null);
        assert!(batches.next_batch().await.unwrap().is_none());
        assert!(batches.next_batch().await.unwrap().is_none());

        let mut again = FileBatches::open(file.path(), 10).await.unwrap();
        assert_eq!(again.next_batch().await.unwrap().unwrap(), first);
    }
}
