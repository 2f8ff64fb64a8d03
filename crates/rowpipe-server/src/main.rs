//! Rowpipe Server - Main entry point

use anyhow::{Context, Result};
use rowpipe_common::logging::{init_logging, LogConfig};
use rowpipe_ingest::{
    db::ConnectionPool,
    secrets::{provider_from_config, resolve_credentials},
    signal::shutdown_signal,
};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use rowpipe_server::{config::Config, create_router, features::FeatureState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("rowpipe-server")
        .filter_directives("rowpipe_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Rowpipe Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}",
        config.server.bind_address()
    );

    let provider = provider_from_config(&config.credentials).await;
    let resolved = resolve_credentials(provider.as_ref()).await;

    let pool = ConnectionPool::connect(
        resolved.credentials.connect_options(),
        config.database.pool_settings(),
    )
    .await
    .context("Database connection pool initialization failed")?;

    let app = create_router(FeatureState { pool: pool.clone() }, &config.cors);

    let listener = tokio::net::TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address()))?;
    info!("Server listening on {}", config.server.bind_address());

    let signalled = Arc::new(Notify::new());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let signalled = Arc::clone(&signalled);
            async move {
                shutdown_signal().await;
                signalled.notify_one();
            }
        })
        .into_future();

    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    tokio::select! {
        result = server => result.context("Server error")?,
        _ = async {
            signalled.notified().await;
            info!("Waiting up to {:?} for in-flight requests", drain_timeout);
            tokio::time::sleep(drain_timeout).await;
        } => {
            warn!("Shutdown timeout elapsed, dropping open connections");
        },
    }

    pool.close().await;
    info!("Server shut down gracefully");

    Ok(())
}
