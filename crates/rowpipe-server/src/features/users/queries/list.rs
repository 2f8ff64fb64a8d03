use rowpipe_ingest::db::{ConnectionPool, DbError};
use serde::{Deserialize, Serialize};

/// Page number used when `page_no` is absent
pub const DEFAULT_PAGE_NO: i64 = 1;

/// Page size used when `pagesize` is absent
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Largest page a single request may ask for
pub const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListUsersQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_no: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagesize: Option<i64>,
    /// Case-insensitive substring of the user's name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One stored row, as returned by `GET /data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub gender: String,
    pub age: i32,
    pub designation: String,
    pub city: String,
    pub pin: String,
    pub fav_food: String,
    pub fav_movie: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ListUsersError {
    #[error("page_no must be greater than 0")]
    InvalidPageNo,
    #[error("pagesize must be between 1 and 1000")]
    InvalidPageSize,
    #[error("page_no is too large for pagesize")]
    OffsetOverflow,
    #[error(transparent)]
    Pool(#[from] DbError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ListUsersQuery {
    pub fn validate(&self) -> Result<(), ListUsersError> {
        if self.page_no() < 1 {
            return Err(ListUsersError::InvalidPageNo);
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.pagesize()) {
            return Err(ListUsersError::InvalidPageSize);
        }
        self.offset().map(|_| ())
    }

    pub fn page_no(&self) -> i64 {
        self.page_no.unwrap_or(DEFAULT_PAGE_NO)
    }

    pub fn pagesize(&self) -> i64 {
        self.pagesize.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// `(page_no - 1) * pagesize`
    pub fn offset(&self) -> Result<i64, ListUsersError> {
        self.page_no()
            .checked_sub(1)
            .and_then(|page| page.checked_mul(self.pagesize()))
            .ok_or(ListUsersError::OffsetOverflow)
    }

    /// ILIKE pattern for the name filter, with wildcards in the input escaped
    fn name_pattern(&self) -> Option<String> {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| format!("%{}%", escape_like(name)))
    }
}

/// Escape `\`, `%` and `_` so they match themselves under `ESCAPE '\'`
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: &ConnectionPool,
    query: ListUsersQuery,
) -> Result<Vec<UserRow>, ListUsersError> {
    query.validate()?;

    let offset = query.offset()?;
    let mut lease = pool.acquire().await?;

    let rows = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, name, email, mobile, gender, age, designation, city, pin,
               fav_food, fav_movie
        FROM users
        WHERE ($1::TEXT IS NULL OR name ILIKE $1 ESCAPE '\')
        ORDER BY id
        LIMIT $2
        OFFSET $3
        "#,
    )
    .bind(query.name_pattern())
    .bind(query.pagesize())
    .bind(offset)
    .fetch_all(lease.connection()?)
    .await;

    lease.release();
    Ok(rows?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn query(page_no: Option<i64>, pagesize: Option<i64>) -> ListUsersQuery {
        ListUsersQuery {
            page_no,
            pagesize,
            name: None,
        }
    }

    #[test]
    fn test_defaults() {
        let q = ListUsersQuery::default();
        assert!(q.validate().is_ok());
        assert_eq!(q.page_no(), 1);
        assert_eq!(q.pagesize(), 10);
        assert_eq!(q.offset().unwrap(), 0);
    }

    #[test]
    fn test_offset() {
        assert_eq!(query(Some(3), Some(25)).offset().unwrap(), 50);
        assert_eq!(query(Some(1), Some(1000)).offset().unwrap(), 0);
    }

    #[test]
    fn test_validation_invalid_page_no() {
        for page_no in [0, -1] {
            assert!(matches!(
                query(Some(page_no), None).validate(),
                Err(ListUsersError::InvalidPageNo)
            ));
        }
    }

    #[test]
    fn test_validation_invalid_pagesize() {
        for pagesize in [0, -5, MAX_PAGE_SIZE + 1] {
            assert!(matches!(
                query(None, Some(pagesize)).validate(),
                Err(ListUsersError::InvalidPageSize)
            ));
        }
        assert!(query(None, Some(MAX_PAGE_SIZE)).validate().is_ok());
    }

    #[test]
    fn test_validation_offset_overflow() {
        assert!(matches!(
            query(Some(i64::MAX), Some(MAX_PAGE_SIZE)).validate(),
            Err(ListUsersError::OffsetOverflow)
        ));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("asha"), "asha");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("c:\\x"), "c:\\\\x");
    }

    #[test]
    fn test_name_pattern() {
        let mut q = ListUsersQuery::default();
        assert_eq!(q.name_pattern(), None);

        q.name = Some(String::new());
        assert_eq!(q.name_pattern(), None);

        q.name = Some("an_a".to_string());
        assert_eq!(q.name_pattern().as_deref(), Some("%an\\_a%"));
    }
}
