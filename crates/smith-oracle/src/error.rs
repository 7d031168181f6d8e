use std::time::Duration;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum OracleError {
    #[error("oracle backend error: {0}")]
    Backend(String),
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),
    #[error("reply does not satisfy schema `{schema}`: {message}")]
    Schema { schema: String, message: String },
    #[error("oracle returned an empty reply")]
    Empty,
}
