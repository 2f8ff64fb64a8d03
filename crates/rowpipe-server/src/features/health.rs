//! `GET /health`: store reachability and pool occupancy

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use rowpipe_ingest::db::ConnectionPool;
use serde_json::json;

pub fn health_routes() -> Router<ConnectionPool> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(pool): State<ConnectionPool>) -> impl IntoResponse {
    match pool.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected",
                "pool": pool.stats(),
            })),
        ),
        Err(e) => {
            tracing::error!("Database health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "unreachable",
                    "pool": pool.stats(),
                })),
            )
        },
    }
}
