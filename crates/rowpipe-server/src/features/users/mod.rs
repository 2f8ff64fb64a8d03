pub mod queries;
pub mod routes;

pub use queries::{ListUsersError, ListUsersQuery, UserRow};
pub use routes::users_routes;
