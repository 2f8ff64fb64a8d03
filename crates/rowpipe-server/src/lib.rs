//! Rowpipe Server Library
//!
//! Read-only HTTP API over the `users` table filled by `rowpipe-ingest`.
//!
//! # Endpoints
//!
//! - `GET /data?page_no&pagesize&name` - `{"data": [row, ...]}`, ordered by id
//! - `GET /health` - store reachability and pool statistics
//!
//! Handlers lease sessions from the same bounded
//! [`ConnectionPool`](rowpipe_ingest::db::ConnectionPool) the ingest side uses,
//! so the pool's capacity and acquire timeout apply to reads too.
//!
//! # Example
//!
//! ```no_run
//! use rowpipe_ingest::db::{ConnectionPool, PoolSettings};
//! use rowpipe_server::{config::Config, create_router, features::FeatureState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let options: sqlx::postgres::PgConnectOptions = "postgresql://localhost/rowpipe".parse()?;
//!     let pool = ConnectionPool::connect(options, PoolSettings::default()).await?;
//!
//!     let app = create_router(FeatureState { pool }, &config.cors);
//!     let listener = tokio::net::TcpListener::bind(config.server.bind_address()).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod features;
pub mod middleware;

use axum::Router;
use tower_http::compression::CompressionLayer;

use crate::config::CorsConfig;
use crate::features::FeatureState;

/// Create the application router with all routes and middleware
pub fn create_router(state: FeatureState, cors: &CorsConfig) -> Router {
    features::router(state)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}
