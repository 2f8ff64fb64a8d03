//! User read routes
//!
//! - `GET /data?page_no=1&pagesize=10&name=asha` - one page of stored rows,
//!   ordered by id, optionally filtered by a case-insensitive name substring

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Router,
};
use rowpipe_ingest::db::ConnectionPool;

use super::queries::{list, ListUsersError, ListUsersQuery, UserRow};
use crate::api::{ApiResult, AppError, DataResponse};

pub fn users_routes() -> Router<ConnectionPool> {
    Router::new().route("/data", get(list_users))
}

/// List users
///
/// # Response
///
/// - `200 OK` - `{"data": [{"id": 1, "name": "...", ...}]}`
/// - `400 Bad Request` - unparseable or out-of-range parameters
/// - `503 Service Unavailable` - no pooled session within the acquire timeout
/// - `500 Internal Server Error` - the query failed
async fn list_users(
    State(pool): State<ConnectionPool>,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> ApiResult<DataResponse<Vec<UserRow>>> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let rows = list::handle(&pool, query).await?;
    tracing::debug!(count = rows.len(), "Users listed via API");

    Ok(DataResponse::new(rows))
}

impl From<ListUsersError> for AppError {
    fn from(err: ListUsersError) -> Self {
        match err {
            ListUsersError::InvalidPageNo
            | ListUsersError::InvalidPageSize
            | ListUsersError::OffsetOverflow => AppError::BadRequest(err.to_string()),
            ListUsersError::Pool(err) => err.into(),
            ListUsersError::Database(err) => err.into(),
        }
    }
}
