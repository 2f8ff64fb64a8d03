//! HTTP response and error types shared by every feature

pub mod response;

pub use response::{ApiResult, AppError, DataResponse, ErrorResponse};
