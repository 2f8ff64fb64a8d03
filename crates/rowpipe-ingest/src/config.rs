//! Configuration management
//!
//! Everything is read from the environment (after loading `.env`), falling
//! back to the constants below, and validated before any connection is made.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::consumer::{AckMode, ConsumerSettings};
use crate::db::PoolSettings;
use crate::secrets::CredentialBackend;
use crate::writer::MAX_ROWS_PER_STATEMENT;

// ============================================================================
// Queue Configuration Constants
// ============================================================================

/// Default queue backend URL for local development.
pub const DEFAULT_QUEUE_URL: &str = "postgresql://localhost/rowpipe";

/// Default queue name.
pub const DEFAULT_QUEUE_NAME: &str = "file_queue";

/// Default size of the queue backend's own connection pool.
pub const DEFAULT_QUEUE_MAX_CONNECTIONS: u32 = 4;

/// Default number of deliveries before a failing batch is dead-lettered.
pub const DEFAULT_QUEUE_MAX_ATTEMPTS: u32 = 5;

/// Default visibility timeout in seconds (5 minutes).
pub const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 300;

/// Default interval between empty polls in milliseconds.
pub const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 500;

// ============================================================================
// Producer / Consumer Constants
// ============================================================================

/// Default number of CSV rows per published batch.
pub const DEFAULT_FILE_BATCH_SIZE: usize = 5000;

/// Default number of consumer workers per process.
pub const DEFAULT_CONSUMER_WORKERS: usize = 1;

/// Upper bound on consumer workers per process.
pub const MAX_CONSUMER_WORKERS: usize = 64;

// ============================================================================
// Credential / Database Constants
// ============================================================================

/// Default AWS Secrets Manager secret holding the database credentials.
pub const DEFAULT_AWS_SECRET_NAME: &str = "my_database_secret";

/// Default AWS region.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Default minimum pooled database sessions.
pub const DEFAULT_DB_MIN_CONNECTIONS: u32 = 1;

/// Default maximum pooled database sessions.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;

/// Default acquire timeout in seconds.
pub const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Default idle timeout in seconds (10 minutes).
pub const DEFAULT_DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub queue: QueueConfig,
    pub batch_size: usize,
    pub workers: usize,
    pub credentials: CredentialConfig,
    pub database: DatabaseConfig,
}

/// Queue backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub url: String,
    pub name: String,
    pub max_connections: u32,
    pub ack_mode: AckMode,
    pub max_attempts: u32,
    pub visibility_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

/// Where database credentials come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub backend: CredentialBackend,
    pub secret_name: String,
    pub region: String,
    pub endpoint_url: Option<String>,
}

/// Connection pool bounds for the `users` store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = IngestConfig {
            queue: QueueConfig::from_env()?,
            batch_size: env_or("FILE_BATCH_SIZE", DEFAULT_FILE_BATCH_SIZE)?,
            workers: env_or("CONSUMER_WORKERS", DEFAULT_CONSUMER_WORKERS)?,
            credentials: CredentialConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_ROWS_PER_STATEMENT {
            anyhow::bail!(
                "FILE_BATCH_SIZE must be between 1 and {} (got {})",
                MAX_ROWS_PER_STATEMENT,
                self.batch_size
            );
        }

        if self.workers == 0 || self.workers > MAX_CONSUMER_WORKERS {
            anyhow::bail!(
                "CONSUMER_WORKERS must be between 1 and {} (got {})",
                MAX_CONSUMER_WORKERS,
                self.workers
            );
        }

        self.queue.validate()?;
        self.database.validate()?;

        Ok(())
    }
}

impl QueueConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let ack_mode = match std::env::var("QUEUE_ACK_MODE") {
            Ok(mode) => mode
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid QUEUE_ACK_MODE: {e}"))?,
            Err(_) => AckMode::default(),
        };

        Ok(Self {
            url: std::env::var("QUEUE_URL").unwrap_or_else(|_| DEFAULT_QUEUE_URL.to_string()),
            name: std::env::var("QUEUE_NAME").unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string()),
            max_connections: env_or("QUEUE_MAX_CONNECTIONS", DEFAULT_QUEUE_MAX_CONNECTIONS)?,
            ack_mode,
            max_attempts: env_or("QUEUE_MAX_ATTEMPTS", DEFAULT_QUEUE_MAX_ATTEMPTS)?,
            visibility_timeout_secs: env_or(
                "QUEUE_VISIBILITY_TIMEOUT",
                DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS,
            )?,
            poll_interval_ms: env_or("QUEUE_POLL_INTERVAL_MS", DEFAULT_QUEUE_POLL_INTERVAL_MS)?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("QUEUE_URL cannot be empty");
        }
        if self.name.is_empty() {
            anyhow::bail!("QUEUE_NAME cannot be empty");
        }
        if self.max_connections == 0 {
            anyhow::bail!("QUEUE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("QUEUE_MAX_ATTEMPTS must be greater than 0");
        }
        if self.visibility_timeout_secs == 0 {
            anyhow::bail!("QUEUE_VISIBILITY_TIMEOUT must be greater than 0");
        }
        Ok(())
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Consumer behaviour derived from the queue settings
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            ack_mode: self.ack_mode,
            max_attempts: self.max_attempts,
            ..ConsumerSettings::default()
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_QUEUE_URL.to_string(),
            name: DEFAULT_QUEUE_NAME.to_string(),
            max_connections: DEFAULT_QUEUE_MAX_CONNECTIONS,
            ack_mode: AckMode::default(),
            max_attempts: DEFAULT_QUEUE_MAX_ATTEMPTS,
            visibility_timeout_secs: DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_QUEUE_POLL_INTERVAL_MS,
        }
    }
}

impl CredentialConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match std::env::var("CREDENTIAL_SOURCE") {
            Ok(source) => source
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid CREDENTIAL_SOURCE: {e}"))?,
            Err(_) => CredentialBackend::default(),
        };

        Ok(Self {
            backend,
            secret_name: std::env::var("AWS_SECRET_NAME")
                .unwrap_or_else(|_| DEFAULT_AWS_SECRET_NAME.to_string()),
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_AWS_REGION.to_string()),
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            backend: CredentialBackend::default(),
            secret_name: DEFAULT_AWS_SECRET_NAME.to_string(),
            region: DEFAULT_AWS_REGION.to_string(),
            endpoint_url: None,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            min_connections: env_or("DB_MIN_CONNECTIONS", DEFAULT_DB_MIN_CONNECTIONS)?,
            max_connections: env_or("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT", DEFAULT_DB_ACQUIRE_TIMEOUT_SECS)?,
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT", DEFAULT_DB_IDLE_TIMEOUT_SECS)?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.pool_settings().validate()?;
        Ok(())
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_DB_ACQUIRE_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DB_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            batch_size: DEFAULT_FILE_BATCH_SIZE,
            workers: DEFAULT_CONSUMER_WORKERS,
            credentials: CredentialConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Parse `name` from the environment, or `default` when it is unset.
///
/// A value that is set but does not parse is an error naming the variable.
pub fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {name} '{value}': {e}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => anyhow::bail!("Invalid {name}: {e}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "QUEUE_URL",
        "QUEUE_NAME",
        "QUEUE_ACK_MODE",
        "QUEUE_MAX_ATTEMPTS",
        "FILE_BATCH_SIZE",
        "CONSUMER_WORKERS",
        "CREDENTIAL_SOURCE",
        "AWS_REGION",
        "DB_MAX_CONNECTIONS",
        "DB_MIN_CONNECTIONS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 5000);
        assert_eq!(config.queue.name, "file_queue");
        assert_eq!(config.queue.ack_mode, AckMode::AfterCommit);
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.credentials.secret_name, "my_database_secret");
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut config = IngestConfig::default();

        config.batch_size = 0;
        assert!(config.validate().is_err());

        config.batch_size = MAX_ROWS_PER_STATEMENT;
        assert!(config.validate().is_ok());

        config.batch_size = MAX_ROWS_PER_STATEMENT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_are_enforced() {
        let mut config = IngestConfig::default();

        config.database.max_connections = 21;
        assert!(config.validate().is_err());

        config.database.max_connections = 5;
        config.database.min_connections = 6;
        assert!(config.validate().is_err());

        config.database.min_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_idle_timeout_disables_it() {
        let database = DatabaseConfig {
            idle_timeout_secs: 0,
            ..DatabaseConfig::default()
        };
        assert_eq!(database.pool_settings().idle_timeout, None);
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        clear_env();
        std::env::set_var("QUEUE_NAME", "uploads");
        std::env::set_var("QUEUE_ACK_MODE", "on-receipt");
        std::env::set_var("FILE_BATCH_SIZE", "250");
        std::env::set_var("CREDENTIAL_SOURCE", "env");
        std::env::set_var("DB_MAX_CONNECTIONS", "8");

        let config = IngestConfig::load().unwrap();
        assert_eq!(config.queue.name, "uploads");
        assert_eq!(config.queue.ack_mode, AckMode::OnReceipt);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.credentials.backend, CredentialBackend::Env);
        assert_eq!(config.database.max_connections, 8);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_ack_mode_is_rejected() {
        clear_env();
        std::env::set_var("QUEUE_ACK_MODE", "sometimes");

        assert!(IngestConfig::load().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_unparseable_number_names_the_variable() {
        clear_env();
        std::env::set_var("FILE_BATCH_SIZE", "abc");

        let err = IngestConfig::load().unwrap_err().to_string();
        assert!(err.contains("FILE_BATCH_SIZE"), "{err}");
        assert!(err.contains("abc"), "{err}");

        clear_env();
        std::env::set_var("DB_MAX_CONNECTIONS", "-4");
        let err = IngestConfig::load().unwrap_err().to_string();
        assert!(err.contains("DB_MAX_CONNECTIONS"), "{err}");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_oversized_batch_from_env_is_rejected() {
        clear_env();
        std::env::set_var("FILE_BATCH_SIZE", "10000");

        assert!(IngestConfig::load().is_err());

        clear_env();
    }
}
