//! Shared helpers for rowpipe-ingest integration tests
//!
//! Every test gets its own PostgreSQL container with the workspace
//! migrations applied. These tests require Docker:
//!
//! ```bash
//! cargo test -p rowpipe-ingest -- --ignored --nocapture
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use rowpipe_common::{Gender, Record};
use rowpipe_ingest::db::{ConnectionPool, PoolSettings, PoolStats};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// PostgreSQL container with the `users` table already migrated
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    /// Raw pool for assertions and queue tables
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// A separate bounded pool of the kind the consumer writes through
    pub async fn connection_pool(&self, settings: PoolSettings) -> Result<ConnectionPool> {
        let options: PgConnectOptions = self
            .connection_string
            .parse()
            .context("Invalid connection string")?;
        ConnectionPool::connect(options, settings)
            .await
            .context("Failed to open connection pool")
    }

    pub async fn user_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// A valid record whose name and email carry `n`
pub fn record(n: usize) -> Record {
    Record {
        name: format!("User {n}"),
        email: format!("user{n}@example.com"),
        mobile: "9876543210".to_string(),
        gender: Gender::Female,
        age: 30,
        designation: "Engineer".to_string(),
        city: "Pune".to_string(),
        pin: "411001".to_string(),
        fav_food: "Dosa".to_string(),
        fav_movie: "Lagaan".to_string(),
    }
}

/// Poll until every open session is back in the idle set.
///
/// Leases return to the pool on a background task, so the count lags the
/// release by a moment.
pub async fn settled_stats(pool: &ConnectionPool) -> PoolStats {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = pool.stats();
        if stats.idle == stats.size as usize || tokio::time::Instant::now() >= deadline {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,rowpipe_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
