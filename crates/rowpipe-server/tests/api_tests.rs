//! Router tests that never reach a live store
//!
//! Parameter validation happens before a session is leased, so these run
//! against a lazy pool pointed at a closed port.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use rowpipe_ingest::db::{ConnectionPool, PoolSettings};
use rowpipe_server::{config::CorsConfig, create_router, features::FeatureState};
use serde_json::Value;
use sqlx::postgres::PgConnectOptions;
use std::time::Duration;
use tower::ServiceExt;

fn dead_pool() -> ConnectionPool {
    let options = PgConnectOptions::new()
        .host("127.0.0.1")
        .port(1)
        .username("nobody")
        .database("nowhere");
    let settings = PoolSettings {
        min_connections: 1,
        max_connections: 1,
        acquire_timeout: Duration::from_millis(200),
        idle_timeout: None,
    };
    ConnectionPool::connect_lazy(options, settings).unwrap()
}

fn app() -> Router {
    let cors = CorsConfig {
        allowed_origins: vec!["http://localhost:3000".to_string()],
        allow_credentials: true,
    };
    create_router(FeatureState { pool: dead_pool() }, &cors)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_page_no_zero_rejected() {
    let (status, body) = get(app(), "/data?page_no=0").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(body["error"]["message"], "page_no must be greater than 0");
}

#[tokio::test]
async fn test_pagesize_out_of_range_rejected() {
    for uri in ["/data?pagesize=0", "/data?pagesize=-3", "/data?pagesize=1001"] {
        let (status, body) = get(app(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "BAD_REQUEST", "{uri}");
    }
}

#[tokio::test]
async fn test_unparseable_parameters_rejected() {
    for uri in ["/data?page_no=abc", "/data?pagesize=1.5", "/data?page_no="] {
        let (status, body) = get(app(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["success"], false, "{uri}");
    }
}

#[tokio::test]
async fn test_huge_page_no_rejected() {
    let uri = format!("/data?page_no={}&pagesize=1000", i64::MAX);
    let (status, _) = get(app(), &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_store_failure_is_json_server_error() {
    let (status, body) = get(app(), "/data").await;

    assert!(status.is_server_error(), "got {status}");
    assert_eq!(body["success"], false);
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_health_reports_unreachable_store() {
    let (status, body) = get(app(), "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["pool"]["max"], 1);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (status, _) = get(app(), "/users").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cors_headers_for_allowed_origin() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/data?page_no=0")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:3000"
    );
}
