//! Ports to the two replication endpoints.
//!
//! The replication engine never owns document storage. It talks to the
//! always-writable local store and the authoritative remote store through
//! these traits, and only proposes writes - the local store exclusively
//! owns mutation application.

use async_trait::async_trait;
use ferry_engine::{Checkpoint, DocumentId, Replicated, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};

/// One push unit: a changed document together with the local actor's belief
/// about what the remote currently holds.
///
/// `assumed_master_state == None` means the row is believed to be an
/// insert. A push succeeds at the remote only if its current revision for
/// the id equals the assumed revision (or the row is a genuine insert and
/// no remote row exists) - the optimistic-concurrency contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRow<D> {
    pub assumed_master_state: Option<D>,
    pub new_document_state: D,
}

impl<D: Replicated> ReplicationRow<D> {
    /// Row for a document believed not to exist remotely.
    pub fn insert(doc: D) -> Self {
        Self {
            assumed_master_state: None,
            new_document_state: doc,
        }
    }

    /// Row for an update or delete against a known remote version.
    pub fn update(assumed: D, doc: D) -> Self {
        Self {
            assumed_master_state: Some(assumed),
            new_document_state: doc,
        }
    }

    /// Whether this row is believed to be an insert.
    pub fn is_insert(&self) -> bool {
        self.assumed_master_state.is_none()
    }

    /// Id of the document being pushed.
    pub fn id(&self) -> &str {
        self.new_document_state.id()
    }
}

/// Everything a fully-drained pull batch changes at the local store,
/// committed as one unit.
///
/// The batch either fully applies or not at all; the checkpoint is part of
/// the same commit so a crash can only lose whole batches, which an
/// idempotent re-pull then redelivers.
#[derive(Debug, Clone, PartialEq)]
pub struct PullApply<D> {
    /// Remote documents (or resolved winners) to write locally. Each also
    /// becomes the new assumed master state for its id.
    pub writes: Vec<D>,
    /// Pending rows that lost conflict resolution and must be discarded.
    pub drop_pending: Vec<DocumentId>,
    /// Pending rows that won against a pulled document: the local document
    /// advances to the row's new state and the row is queued for the next
    /// push cycle, now assuming the freshly pulled remote version.
    pub requeue: Vec<ReplicationRow<D>>,
    /// Checkpoint derived from the batch, persisted with the same commit.
    pub checkpoint: Checkpoint,
}

/// A change notification from the remote store's realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// The notification channel (re)connected. Anything may have been
    /// missed while disconnected; subscribers must resync from scratch.
    Connected,
    /// A row of the replicated collection changed.
    Change {
        id: DocumentId,
        updated_at: Timestamp,
    },
}

/// Errors from the local store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),

    #[error("storage failure: {0}")]
    Backend(String),
}

/// Errors from the remote store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transient network failure: retried with backoff, never fatal.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote answered but the exchange could not be completed.
    #[error("remote backend error: {0}")]
    Backend(String),
}

impl RemoteError {
    /// Transient errors are retried; backend errors are surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// The always-writable local document store, as the replication engine
/// sees it.
///
/// The store runs the revision-stamping hooks on its own mutation paths
/// and maintains the pending-row queue; the engine only consumes that
/// queue and proposes writes for pulled or resolved documents.
#[async_trait]
pub trait LocalStore<D: Replicated>: Send + Sync + 'static {
    /// Current local version of a document, tombstones included.
    async fn get(&self, id: &str) -> Result<Option<D>, StoreError>;

    /// Write a pulled or conflict-resolved document as-is, without
    /// re-stamping. The document also becomes the assumed master state
    /// for its id.
    async fn apply_remote(&self, doc: D) -> Result<(), StoreError>;

    /// The pending (not yet pushed) row for a document, if any.
    async fn pending_for(&self, id: &str) -> Result<Option<ReplicationRow<D>>, StoreError>;

    /// Remove and return up to `limit` pending rows, in local mutation
    /// order.
    async fn take_pending(&self, limit: usize) -> Result<Vec<ReplicationRow<D>>, StoreError>;

    /// Put a row back on the queue for the next push cycle. The row's new
    /// document state becomes the current local document, and its assumed
    /// master state (when present) the assumed master copy.
    async fn requeue(&self, row: ReplicationRow<D>) -> Result<(), StoreError>;

    /// Record that the remote accepted a pushed row: its new document
    /// state is now the master copy.
    async fn ack_push(&self, row: &ReplicationRow<D>) -> Result<(), StoreError>;

    /// Atomically apply one fully-staged pull batch and persist its
    /// checkpoint.
    async fn commit_pull(
        &self,
        checkpoint_key: &str,
        batch: PullApply<D>,
    ) -> Result<(), StoreError>;

    /// Load the persisted checkpoint for a (collection, replication id)
    /// key, `None` before the first sync.
    async fn load_checkpoint(&self, checkpoint_key: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Signal fired whenever a local mutation leaves pending work behind.
    /// The push side of the coordinator waits on this.
    fn change_signal(&self) -> Arc<Notify>;
}

/// The remote authoritative store.
#[async_trait]
pub trait RemoteStore<D: Replicated>: Send + Sync + 'static {
    /// Documents strictly after the checkpoint's `(updated_at, id)`
    /// position, ascending in that order, at most `limit`. The checkpoint
    /// is a compound cursor: rows sharing `last_updated_at` but with an id
    /// greater than `last_id` are still due.
    async fn pull_since(
        &self,
        checkpoint: Option<&Checkpoint>,
        limit: usize,
    ) -> Result<Vec<D>, RemoteError>;

    /// Insert a document unless a row with its id already exists.
    /// Returns `Ok(None)` on success, or the current remote document when
    /// the insert collides.
    async fn insert_if_absent(&self, doc: &D) -> Result<Option<D>, RemoteError>;

    /// Conditional write: replaces the remote row only while its revision
    /// still equals `expected_revision`. Returns `Ok(None)` on success, or
    /// the current remote document when the compare-and-swap fails.
    async fn update_if_current(
        &self,
        doc: &D,
        expected_revision: &str,
    ) -> Result<Option<D>, RemoteError>;

    /// Subscribe to the row-level change notification channel.
    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent>;
}
