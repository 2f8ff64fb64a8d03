//! Connection pool manager
//!
//! [`ConnectionPool`] is the only handle to the `users` store. It is created
//! once per process, cloned into the bulk writer and the read API, and hands
//! out [`PooledConnection`] leases that go back to the idle set exactly once,
//! whether released explicitly or dropped on an error path.

use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Smallest allowed pool capacity
pub const MIN_POOL_SIZE: u32 = 1;

/// Largest allowed pool capacity
pub const MAX_POOL_SIZE: u32 = 20;

/// Database operation errors with contextual information
#[derive(Error, Debug)]
pub enum DbError {
    /// Every session stayed leased for the whole acquire timeout
    #[error("Connection pool exhausted: no session became available within {0:?}")]
    PoolExhausted(Duration),

    /// The lease was already returned to the pool
    #[error("Connection lease has already been released")]
    Released,

    /// SQL query or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Pool settings are out of bounds
    #[error("Database configuration error: {0}. Check DB_MIN_CONNECTIONS and DB_MAX_CONNECTIONS.")]
    Config(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Pool sizing and timeouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: MIN_POOL_SIZE,
            max_connections: MAX_POOL_SIZE,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl PoolSettings {
    pub fn validate(&self) -> DbResult<()> {
        let bounds = MIN_POOL_SIZE..=MAX_POOL_SIZE;
        if !bounds.contains(&self.min_connections) {
            return Err(DbError::Config(format!(
                "min_connections must be between {MIN_POOL_SIZE} and {MAX_POOL_SIZE} (got {})",
                self.min_connections
            )));
        }
        if !bounds.contains(&self.max_connections) {
            return Err(DbError::Config(format!(
                "max_connections must be between {MIN_POOL_SIZE} and {MAX_POOL_SIZE} (got {})",
                self.max_connections
            )));
        }
        if self.min_connections > self.max_connections {
            return Err(DbError::Config(format!(
                "min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(DbError::Config("acquire timeout must be greater than 0".to_string()));
        }
        Ok(())
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
    }
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open sessions, leased or idle
    pub size: u32,
    /// Sessions sitting in the idle set
    pub idle: usize,
    /// Configured capacity
    pub max: u32,
}

/// Bounded pool of store sessions
#[derive(Clone, Debug)]
pub struct ConnectionPool {
    pool: PgPool,
    settings: PoolSettings,
}

impl ConnectionPool {
    /// Open the pool and establish `min_connections` sessions up front.
    ///
    /// A failure here is fatal to the caller: the process cannot do anything
    /// useful without its store.
    pub async fn connect(options: PgConnectOptions, settings: PoolSettings) -> DbResult<Self> {
        settings.validate()?;

        let pool = settings.pool_options().connect_with(options).await?;

        info!(
            min_connections = settings.min_connections,
            max_connections = settings.max_connections,
            acquire_timeout = ?settings.acquire_timeout,
            "Database connection pool created"
        );

        Ok(Self { pool, settings })
    }

    /// Build the pool without opening any session yet
    pub fn connect_lazy(options: PgConnectOptions, settings: PoolSettings) -> DbResult<Self> {
        settings.validate()?;
        let pool = settings.pool_options().connect_lazy_with(options);
        Ok(Self { pool, settings })
    }

    /// Wrap an existing sqlx pool, reading its bounds back from its options
    pub fn from_pool(pool: PgPool) -> Self {
        let options = pool.options();
        let settings = PoolSettings {
            min_connections: options.get_min_connections(),
            max_connections: options.get_max_connections(),
            acquire_timeout: options.get_acquire_timeout(),
            idle_timeout: options.get_idle_timeout(),
        };
        Self { pool, settings }
    }

    /// Lease one session, waiting at most the acquire timeout
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        match self.pool.acquire().await {
            Ok(conn) => {
                debug!(size = self.pool.size(), idle = self.pool.num_idle(), "Leased connection");
                Ok(PooledConnection { conn: Some(conn) })
            },
            Err(sqlx::Error::PoolTimedOut) => {
                warn!(
                    max_connections = self.settings.max_connections,
                    acquire_timeout = ?self.settings.acquire_timeout,
                    "Connection pool exhausted"
                );
                Err(DbError::PoolExhausted(self.settings.acquire_timeout))
            },
            Err(e) => Err(DbError::Sqlx(e)),
        }
    }

    /// Return a lease to the idle set. Releasing twice is a no-op.
    pub fn release(&self, conn: &mut PooledConnection) {
        conn.release();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.settings.max_connections,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Run `SELECT 1` through a lease
    pub async fn health_check(&self) -> DbResult<()> {
        let mut lease = self.acquire().await?;
        let result = sqlx::query("SELECT 1").execute(lease.connection()?).await;
        lease.release();
        result.map(|_| ()).map_err(DbError::from)
    }

    /// Close every session and reject further acquires
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Underlying sqlx pool, for migrations and test fixtures
    pub fn pg_pool(&self) -> &PgPool {
        &self.pool
    }
}

/// A leased store session
///
/// Dropping the lease returns the session to the pool, so early returns and
/// `?` never leak a connection.
pub struct PooledConnection {
    conn: Option<PoolConnection<Postgres>>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("released", &self.is_released())
            .finish()
    }
}

impl PooledConnection {
    /// Borrow the underlying session
    pub fn connection(&mut self) -> DbResult<&mut PgConnection> {
        self.conn.as_deref_mut().ok_or(DbError::Released)
    }

    /// Give the session back. Only the first call has any effect.
    pub fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn);
            debug!("Released connection");
        }
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release();
    }
}
