//! Unified error handling for the sync crate.

use crate::config::ConfigError;
use crate::store::{RemoteError, StoreError};
use thiserror::Error;

/// Errors surfaced by the replication pipelines and coordinator.
///
/// `Clone` so the coordinator can fan errors out on its broadcast stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("local store error: {0}")]
    Local(#[from] StoreError),

    #[error("push batch of {got} rows exceeds the per-call limit of {limit}")]
    ProtocolViolation { got: usize, limit: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Whether the condition is expected to clear on its own, making the
    /// operation worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Remote(err) if err.is_transient())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
