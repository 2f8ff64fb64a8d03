//! Database credential resolution
//!
//! Credentials are looked up once at startup through a [`CredentialProvider`].
//! Any key the provider does not supply is replaced by a built-in default,
//! and that substitution is logged at WARN and reported in
//! [`CredentialSource`] so operators can see it.

use async_trait::async_trait;
use aws_sdk_secretsmanager::{config::Region, error::DisplayErrorContext, Client};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::CredentialConfig;

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "your_db";
pub const DEFAULT_DB_USER: &str = "your_user";
pub const DEFAULT_DB_PASSWORD: &str = "your_password";

/// Raw key/value pairs returned by a provider
pub type SecretFields = Map<String, Value>;

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Failed to retrieve secret '{secret_id}': {message}")]
    Retrieve { secret_id: String, message: String },

    #[error("Secret '{0}' has no string value")]
    NoSecretString(String),

    #[error("Secret '{secret_id}' is not a JSON object: {source}")]
    Malformed {
        secret_id: String,
        source: serde_json::Error,
    },
}

/// Which provider to consult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    Aws,
    Env,
}

impl FromStr for CredentialBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" | "secretsmanager" | "secrets-manager" => Ok(Self::Aws),
            "env" | "environment" => Ok(Self::Env),
            other => Err(format!("unknown credential source '{other}' (expected aws or env)")),
        }
    }
}

/// Connection parameters for the `users` store
#[derive(Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for DbCredentials {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            username: DEFAULT_DB_USER.to_string(),
            password: DEFAULT_DB_PASSWORD.to_string(),
        }
    }
}

impl DbCredentials {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname)
            .username(&self.username)
            .password(&self.password)
    }
}

/// How the credentials were obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Every key came from the provider
    Provider,
    /// The provider answered but left these keys out
    Partial { defaulted: Vec<&'static str> },
    /// The provider failed; everything is a built-in default
    Fallback { reason: String },
}

impl CredentialSource {
    pub fn uses_defaults(&self) -> bool {
        !matches!(self, CredentialSource::Provider)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub credentials: DbCredentials,
    pub source: CredentialSource,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Short label for logs, e.g. the secret id
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<SecretFields, SecretsError>;
}

/// AWS Secrets Manager, secret string holding a JSON object
pub struct SecretsManagerProvider {
    client: Client,
    secret_id: String,
}

impl SecretsManagerProvider {
    pub fn new(client: Client, secret_id: impl Into<String>) -> Self {
        Self {
            client,
            secret_id: secret_id.into(),
        }
    }

    /// Build a client from the ambient AWS configuration for `region`
    pub async fn from_config(
        secret_id: impl Into<String>,
        region: impl Into<String>,
        endpoint_url: Option<&str>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.into()));
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;

        Self::new(Client::new(&sdk_config), secret_id)
    }
}

#[async_trait]
impl CredentialProvider for SecretsManagerProvider {
    fn describe(&self) -> String {
        format!("secretsmanager:{}", self.secret_id)
    }

    async fn fetch(&self) -> Result<SecretFields, SecretsError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .map_err(|e| SecretsError::Retrieve {
                secret_id: self.secret_id.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let secret = output
            .secret_string()
            .ok_or_else(|| SecretsError::NoSecretString(self.secret_id.clone()))?;

        serde_json::from_str(secret).map_err(|source| SecretsError::Malformed {
            secret_id: self.secret_id.clone(),
            source,
        })
    }
}

/// `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`
#[derive(Debug, Default)]
pub struct EnvCredentialProvider;

const ENV_KEYS: [(&str, &str); 5] = [
    ("DB_HOST", "host"),
    ("DB_PORT", "port"),
    ("DB_NAME", "dbname"),
    ("DB_USER", "username"),
    ("DB_PASSWORD", "password"),
];

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    fn describe(&self) -> String {
        "environment".to_string()
    }

    async fn fetch(&self) -> Result<SecretFields, SecretsError> {
        let mut fields = SecretFields::new();
        for (var, key) in ENV_KEYS {
            if let Ok(value) = std::env::var(var) {
                fields.insert(key.to_string(), Value::String(value));
            }
        }
        Ok(fields)
    }
}

/// Provider selected by configuration
pub async fn provider_from_config(config: &CredentialConfig) -> Box<dyn CredentialProvider> {
    match config.backend {
        CredentialBackend::Aws => Box::new(
            SecretsManagerProvider::from_config(
                config.secret_name.clone(),
                config.region.clone(),
                config.endpoint_url.as_deref(),
            )
            .await,
        ),
        CredentialBackend::Env => Box::new(EnvCredentialProvider),
    }
}

/// Query the provider once and fill any gaps with defaults.
///
/// Never fails: a broken provider yields the defaults with
/// [`CredentialSource::Fallback`].
pub async fn resolve_credentials(provider: &dyn CredentialProvider) -> ResolvedCredentials {
    let resolved = match provider.fetch().await {
        Ok(fields) => from_fields(&fields),
        Err(e) => {
            warn!(
                provider = %provider.describe(),
                error = %e,
                "Credential provider failed; connecting with built-in default credentials"
            );
            ResolvedCredentials {
                credentials: DbCredentials::default(),
                source: CredentialSource::Fallback {
                    reason: e.to_string(),
                },
            }
        },
    };

    if let CredentialSource::Partial { ref defaulted } = resolved.source {
        warn!(
            provider = %provider.describe(),
            defaulted = ?defaulted,
            "Credential provider omitted keys; using built-in defaults for them"
        );
    }

    info!(
        provider = %provider.describe(),
        host = %resolved.credentials.host,
        port = resolved.credentials.port,
        dbname = %resolved.credentials.dbname,
        uses_defaults = resolved.source.uses_defaults(),
        "Resolved database credentials"
    );

    resolved
}

fn from_fields(fields: &SecretFields) -> ResolvedCredentials {
    let mut defaulted = Vec::new();
    let mut text = |key: &'static str, default: &str| -> String {
        match fields.get(key).and_then(Value::as_str).filter(|v| !v.is_empty()) {
            Some(value) => value.to_string(),
            None => {
                defaulted.push(key);
                default.to_string()
            },
        }
    };

    let host = text("host", DEFAULT_DB_HOST);
    let dbname = text("dbname", DEFAULT_DB_NAME);
    let username = text("username", DEFAULT_DB_USER);
    let password = text("password", DEFAULT_DB_PASSWORD);

    // Port is optional and may arrive as a number or a string.
    let port = match fields.get("port") {
        None | Some(Value::Null) => DEFAULT_DB_PORT,
        Some(value) => match port_value(value) {
            Some(port) => port,
            None => {
                defaulted.push("port");
                DEFAULT_DB_PORT
            },
        },
    };

    let source = if defaulted.is_empty() {
        CredentialSource::Provider
    } else {
        CredentialSource::Partial { defaulted }
    };

    ResolvedCredentials {
        credentials: DbCredentials {
            host,
            port,
            dbname,
            username,
            password,
        },
        source,
    }
}

fn port_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
