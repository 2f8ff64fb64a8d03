//! Bulk writer tests against a real PostgreSQL
//!
//! ```bash
//! cargo test -p rowpipe-ingest --test writer_tests -- --ignored --nocapture
//! ```

mod common;

use common::{init_test_tracing, record, settled_stats, TestPostgres};
use rowpipe_ingest::db::{DbError, PoolSettings};
use rowpipe_ingest::writer::{BulkWriter, WriteError, MAX_ROWS_PER_STATEMENT};
use std::time::Duration;

fn small_pool() -> PoolSettings {
    PoolSettings {
        min_connections: 1,
        max_connections: 2,
        acquire_timeout: Duration::from_secs(5),
        idle_timeout: None,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_write_batch_commits_rows_in_order() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let pool = pg.connection_pool(small_pool()).await.unwrap();
    let writer = BulkWriter::new(pool.clone());

    let records: Vec<_> = (0..3).map(record).collect();
    let written = writer.write_batch(&records).await.unwrap();
    assert_eq!(written, 3);

    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM users ORDER BY id")
        .fetch_all(pg.pool())
        .await
        .unwrap();
    assert_eq!(names, vec!["User 0", "User 1", "User 2"]);

    let gender: String = sqlx::query_scalar("SELECT gender FROM users LIMIT 1")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(gender, "FEMALE");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_failed_batch_rolls_back_every_row() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let pool = pg.connection_pool(small_pool()).await.unwrap();
    let writer = BulkWriter::new(pool.clone());

    // The table's CHECK rejects the last row, taking the first two with it
    let mut records: Vec<_> = (0..3).map(record).collect();
    records[2].age = 150;

    let err = writer.write_batch(&records).await.unwrap_err();
    assert!(matches!(err, WriteError::Database(_)), "got {err:?}");
    assert_eq!(pg.user_count().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_lease_returned_after_success_and_failure() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let pool = pg.connection_pool(small_pool()).await.unwrap();
    let writer = BulkWriter::new(pool.clone());

    let before = settled_stats(&pool).await;
    assert_eq!(before.idle, before.size as usize);

    writer.write_batch(&[record(1)]).await.unwrap();
    let after_success = settled_stats(&pool).await;
    assert_eq!(after_success.idle, after_success.size as usize);

    let mut bad = record(2);
    bad.age = -1;
    writer.write_batch(&[bad]).await.unwrap_err();
    let after_failure = settled_stats(&pool).await;
    assert_eq!(after_failure.idle, after_failure.size as usize);

    // More batches than the pool has sessions still go through
    for n in 0..5 {
        writer.write_batch(&[record(10 + n)]).await.unwrap();
    }
    assert_eq!(pg.user_count().await.unwrap(), 6);
    assert!(pool.stats().size <= 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_saturated_pool_reports_exhaustion() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let pool = pg
        .connection_pool(PoolSettings {
            acquire_timeout: Duration::from_millis(300),
            ..small_pool()
        })
        .await
        .unwrap();
    let writer = BulkWriter::new(pool.clone());

    let held = vec![pool.acquire().await.unwrap(), pool.acquire().await.unwrap()];
    assert_eq!(pool.stats().size, 2);
    assert_eq!(pool.stats().idle, 0);

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, DbError::PoolExhausted(_)), "got {err:?}");

    let err = writer.write_batch(&[record(1)]).await.unwrap_err();
    assert!(
        matches!(err, WriteError::Pool(DbError::PoolExhausted(_))),
        "got {err:?}"
    );

    drop(held);
    let stats = settled_stats(&pool).await;
    assert_eq!(stats.size, 2);
    assert_eq!(stats.idle, 2);
    assert_eq!(pg.user_count().await.unwrap(), 0);

    // Capacity is usable again once the leases are back
    writer.write_batch(&[record(2)]).await.unwrap();
    assert_eq!(pg.user_count().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_batch_larger_than_one_statement() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let pool = pg.connection_pool(small_pool()).await.unwrap();
    let writer = BulkWriter::new(pool);

    let total = MAX_ROWS_PER_STATEMENT + 447;
    let records: Vec<_> = (0..total).map(record).collect();

    let written = writer.write_batch(&records).await.unwrap();
    assert_eq!(written, total as u64);
    assert_eq!(pg.user_count().await.unwrap(), total as i64);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_health_check_and_close() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let pool = pg.connection_pool(small_pool()).await.unwrap();

    pool.health_check().await.unwrap();
    pool.close().await;
    assert!(pool.is_closed());
    assert!(pool.acquire().await.is_err());
}
