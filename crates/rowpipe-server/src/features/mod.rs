//! Feature modules implementing the read API
//!
//! - **users**: paginated reads of the `users` table (`GET /data`)
//! - **health**: store reachability and pool statistics (`GET /health`)
//!
//! Each feature keeps its queries next to its routes; handlers receive the
//! shared [`ConnectionPool`] as router state.

pub mod health;
pub mod users;

use axum::Router;
use rowpipe_ingest::db::ConnectionPool;

/// Shared state for all feature routes
#[derive(Clone, Debug)]
pub struct FeatureState {
    /// Bounded pool every handler leases its session from
    pub pool: ConnectionPool,
}

/// All feature routes, with state applied
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .merge(users::users_routes())
        .merge(health::health_routes())
        .with_state(state.pool)
}
