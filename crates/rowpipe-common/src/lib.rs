//! Rowpipe Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Domain types, validation and shared plumbing for the rowpipe workspace.
//!
//! # Overview
//!
//! - **Records**: the `users` row model and its field constraints
//! - **Validation**: turning a raw field mapping into a normalized [`Record`]
//! - **Batches**: the queue message body and its JSON codec
//! - **Logging**: subscriber setup shared by every binary
//! - **Error Handling**: the common error and result types
//!
//! # Example
//!
//! ```no_run
//! use rowpipe_common::{validate_record, Batch};
//!
//! fn accepted(body: &[u8]) -> rowpipe_common::Result<usize> {
//!     let batch = Batch::from_bytes(body)?;
//!     Ok(batch.records().iter().filter(|raw| validate_record(raw).is_ok()).count())
//! }
//! ```

pub mod batch;
pub mod error;
pub mod logging;
pub mod record;
pub mod validation;

// Re-export commonly used types
pub use batch::{Batch, RawRecord};
pub use error::{Result, RowpipeError};
pub use record::{Field, Gender, Record};
pub use validation::{validate_record, ValidationError, ValidationErrorKind, ValidationErrors};
