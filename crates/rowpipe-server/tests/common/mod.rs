//! Shared helpers for rowpipe-server integration tests
//!
//! These tests require Docker:
//!
//! ```bash
//! cargo test -p rowpipe-server -- --ignored --nocapture
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use rowpipe_ingest::db::{ConnectionPool, PoolSettings};
use sqlx::postgres::PgConnectOptions;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

/// PostgreSQL container with migrations applied, exposed as a [`ConnectionPool`]
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: ConnectionPool,
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

        let options: PgConnectOptions =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port)
                .parse()
                .context("Invalid connection string")?;

        let pool = ConnectionPool::connect(options, PoolSettings::default())
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(pool.pg_pool())
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,rowpipe_server=debug,rowpipe_ingest=debug,sqlx=warn")
        }))
        .with_test_writer()
        .try_init();
}
