//! Replication configuration.
//!
//! Built programmatically and handed to the coordinator at construction -
//! there is no environment-variable loading and no global instance.

use std::time::Duration;

/// Configuration for one replication instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifies this replication pairing; part of the checkpoint key so
    /// several replications of the same collection stay independent.
    pub replication_id: String,
    /// The replicated collection.
    pub collection: String,
    /// Node identity used to salt revision digests.
    pub node_id: String,
    /// Maximum documents fetched per pull request.
    pub pull_batch_size: usize,
    /// Maximum rows per push call; larger batches are a protocol violation.
    pub push_batch_size: usize,
    /// Interval of the safety-net pull poll. Change feed notifications
    /// trigger pulls immediately; this only covers missed notifications.
    pub pull_interval: Duration,
    /// First retry delay after a transient failure.
    pub initial_backoff: Duration,
    /// Retry delay cap; backoff doubles up to this.
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            replication_id: "default".into(),
            collection: "documents".into(),
            node_id: "local".into(),
            pull_batch_size: 10,
            push_batch_size: 1,
            pull_interval: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication_id.is_empty() {
            return Err(ConfigError::EmptyReplicationId);
        }
        if self.collection.is_empty() {
            return Err(ConfigError::EmptyCollection);
        }
        if self.pull_batch_size == 0 {
            return Err(ConfigError::ZeroPullBatch);
        }
        if self.push_batch_size == 0 {
            return Err(ConfigError::ZeroPushBatch);
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::BackoffOrder);
        }
        Ok(())
    }

    /// Key under which the local store persists the checkpoint for this
    /// (collection, replication identifier) pair.
    pub fn checkpoint_key(&self) -> String {
        format!("{}::{}", self.collection, self.replication_id)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("replication id must not be empty")]
    EmptyReplicationId,

    #[error("collection must not be empty")]
    EmptyCollection,

    #[error("pull batch size must be at least 1")]
    ZeroPullBatch,

    #[error("push batch size must be at least 1")]
    ZeroPushBatch,

    #[error("initial backoff exceeds max backoff")]
    BackoffOrder,
}
