//! Error types for the Ferry engine.

use thiserror::Error;

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed revision: {0:?}")]
    MalformedRevision(String),

    #[error("invalid field map: {0}")]
    InvalidFieldMap(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
