//! # Ferry Sync
//!
//! Async replication plumbing for the Ferry engine: the pipelines and the
//! coordinator that keep a local, always-writable document store and a
//! remote authoritative store eventually consistent.
//!
//! The deterministic pieces (revisions, conflict resolution, hooks,
//! checkpoints, field mapping) live in `ferry-engine`; this crate moves
//! documents between the two stores:
//!
//! - [`LocalStore`] / [`RemoteStore`]: the ports the two endpoints must
//!   implement. [`MemoryLocal`] and [`MemoryRemote`] are in-memory
//!   reference implementations, also used as the test harness.
//! - [`PullPipeline`]: checkpointed, batch-draining pull of remote changes,
//!   with conflict handoff for documents that collide with pending local
//!   writes.
//! - [`PushPipeline`]: optimistic push of pending local changes, detecting
//!   write conflicts through a compare-and-swap on the revision marker.
//! - [`ChangeFeedListener`]: turns remote change notifications into pull
//!   triggers, with a full resync on every (re)connection.
//! - [`ReplicationCoordinator`]: owns the lifecycle. Constructed with its
//!   dependencies, explicit `start`/`stop`, observable state and error
//!   stream; no global instance.
//!
//! Replication never crashes the host: transient network failures are
//! retried with backoff, conflicts are normal control flow, and corrupt
//! revision markers restart numbering instead of wedging a pipeline.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod pull;
pub mod push;
pub mod store;
pub mod stream;

// Re-export main types at crate root
pub use config::{ConfigError, SyncConfig};
pub use coordinator::{ReplicationCoordinator, ReplicationState};
pub use error::SyncError;
pub use memory::{MemoryLocal, MemoryRemote};
pub use pull::{PullPipeline, PullReport};
pub use push::{PushPipeline, PushReport, RowOutcome};
pub use store::{
    LocalStore, PullApply, RemoteError, RemoteEvent, RemoteStore, ReplicationRow, StoreError,
};
pub use stream::{ChangeFeedListener, PullTrigger};

#[cfg(test)]
pub(crate) mod testutil {
    use ferry_engine::{Replicated, Timestamp};
    use serde::{Deserialize, Serialize};

    /// The document type the unit tests replicate.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TestDoc {
        pub id: String,
        pub title: String,
        pub created_at: Timestamp,
        pub updated_at: Timestamp,
        pub replication_revision: String,
        #[serde(rename = "_deleted")]
        pub deleted: bool,
    }

    impl Replicated for TestDoc {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> Timestamp {
            self.updated_at
        }
        fn set_updated_at(&mut self, updated_at: Timestamp) {
            self.updated_at = updated_at;
        }
        fn revision(&self) -> &str {
            &self.replication_revision
        }
        fn set_revision(&mut self, revision: String) {
            self.replication_revision = revision;
        }
        fn is_deleted(&self) -> bool {
            self.deleted
        }
        fn set_deleted(&mut self, deleted: bool) {
            self.deleted = deleted;
        }
    }

    pub fn doc(id: &str, title: &str, updated_at: Timestamp) -> TestDoc {
        TestDoc {
            id: id.into(),
            title: title.into(),
            created_at: updated_at,
            updated_at,
            replication_revision: String::new(),
            deleted: false,
        }
    }

    pub fn stamped(id: &str, title: &str, updated_at: Timestamp, revision: &str) -> TestDoc {
        let mut d = doc(id, title, updated_at);
        d.replication_revision = revision.into();
        d
    }
}
