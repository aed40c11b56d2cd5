//! In-memory reference implementations of the two store ports.
//!
//! [`MemoryLocal`] behaves like an embedded local document store: mutations
//! go through the revision-stamping hooks, deletes become tombstones, and
//! every mutation leaves a pending replication row behind. [`MemoryRemote`]
//! behaves like the authoritative backend: rows are kept in remote column
//! names through the field map, writes are conditional on the stored
//! revision, and every committed write is announced on a change channel.
//!
//! Both back the integration tests, and `MemoryRemote` can simulate a
//! network outage so retry behavior is testable.

use crate::store::{
    LocalStore, PullApply, RemoteError, RemoteEvent, RemoteStore, ReplicationRow, StoreError,
};
use async_trait::async_trait;
use ferry_engine::{Checkpoint, DocumentId, FieldMap, Replicated, RevisionHooks, Timestamp};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

const ID_COLUMN: &str = "id";
const UPDATED_AT_COLUMN: &str = "updated_at";
const REVISION_COLUMN: &str = "replication_revision";

/// Capacity of the remote change broadcast channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LocalState<D> {
    /// Current documents, tombstones included.
    documents: HashMap<DocumentId, D>,
    /// What the remote is believed to hold, per id.
    master_copies: HashMap<DocumentId, D>,
    /// Rows awaiting push, in local mutation order.
    pending: Vec<ReplicationRow<D>>,
    /// Persisted pull checkpoints, by checkpoint key.
    checkpoints: HashMap<String, Checkpoint>,
}

impl<D> Default for LocalState<D> {
    fn default() -> Self {
        Self {
            documents: HashMap::new(),
            master_copies: HashMap::new(),
            pending: Vec::new(),
            checkpoints: HashMap::new(),
        }
    }
}

/// In-memory local store with revision hooks and a pending-row queue.
#[derive(Debug)]
pub struct MemoryLocal<D: Replicated> {
    hooks: RevisionHooks,
    state: Mutex<LocalState<D>>,
    changed: Arc<Notify>,
}

impl<D: Replicated> MemoryLocal<D> {
    /// Create an empty store stamping with the given node identity.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            hooks: RevisionHooks::new(node_id),
            state: Mutex::new(LocalState::default()),
            changed: Arc::new(Notify::new()),
        }
    }

    /// The hooks this store stamps with.
    pub fn hooks(&self) -> &RevisionHooks {
        &self.hooks
    }

    /// Insert a document. The pre-insert hook stamps its first revision.
    pub fn insert(&self, mut doc: D) {
        self.hooks.pre_insert(&mut doc);
        self.commit_local(doc);
    }

    /// Update a document. The pre-save hook bumps its revision height.
    pub fn update(&self, mut doc: D) {
        self.hooks.pre_save(&mut doc);
        self.commit_local(doc);
    }

    /// Delete a document: tombstoned and queued for push, never physically
    /// removed. The caller supplies the deletion time; checkpointed pulls
    /// on other nodes only see the tombstone when it moves forward.
    pub fn remove(&self, id: &str, deleted_at: Timestamp) -> Result<(), StoreError> {
        let doc = {
            let state = self.lock();
            state.documents.get(id).cloned()
        };
        let mut doc = doc.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        doc.set_updated_at(deleted_at);
        self.hooks.pre_remove(&mut doc);
        self.commit_local(doc);
        Ok(())
    }

    /// Number of pending rows (test observability).
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// All current documents, tombstones included (test observability).
    pub fn documents(&self) -> Vec<D> {
        self.lock().documents.values().cloned().collect()
    }

    fn commit_local(&self, doc: D) {
        {
            let mut state = self.lock();
            Self::queue_pending(&mut state, doc.clone());
            state.documents.insert(doc.id().to_string(), doc);
        }
        self.changed.notify_one();
    }

    /// Upsert a pending row for a freshly mutated document. A second local
    /// mutation before the push replaces the row's new state but keeps the
    /// original assumed master state - the remote has not moved in between.
    fn queue_pending(state: &mut LocalState<D>, doc: D) {
        if let Some(row) = state
            .pending
            .iter_mut()
            .find(|row| row.new_document_state.id() == doc.id())
        {
            row.new_document_state = doc;
        } else {
            let assumed = state.master_copies.get(doc.id()).cloned();
            state.pending.push(ReplicationRow {
                assumed_master_state: assumed,
                new_document_state: doc,
            });
        }
    }

    /// Replace any pending row for the id and advance the local document
    /// and master copy to the row's states.
    fn restore_row(state: &mut LocalState<D>, row: ReplicationRow<D>) {
        let id = row.new_document_state.id().to_string();
        state
            .documents
            .insert(id.clone(), row.new_document_state.clone());
        if let Some(assumed) = &row.assumed_master_state {
            state.master_copies.insert(id.clone(), assumed.clone());
        }
        state
            .pending
            .retain(|existing| existing.new_document_state.id() != id);
        state.pending.push(row);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState<D>> {
        // Lock poisoning only happens after a panic in another accessor;
        // the store's state is a plain map, safe to keep using.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<D: Replicated> LocalStore<D> for MemoryLocal<D> {
    async fn get(&self, id: &str) -> Result<Option<D>, StoreError> {
        Ok(self.lock().documents.get(id).cloned())
    }

    async fn apply_remote(&self, doc: D) -> Result<(), StoreError> {
        let mut state = self.lock();
        let id = doc.id().to_string();
        state.master_copies.insert(id.clone(), doc.clone());
        state.documents.insert(id, doc);
        Ok(())
    }

    async fn pending_for(&self, id: &str) -> Result<Option<ReplicationRow<D>>, StoreError> {
        Ok(self
            .lock()
            .pending
            .iter()
            .find(|row| row.new_document_state.id() == id)
            .cloned())
    }

    async fn take_pending(&self, limit: usize) -> Result<Vec<ReplicationRow<D>>, StoreError> {
        let mut state = self.lock();
        let take = state.pending.len().min(limit);
        Ok(state.pending.drain(..take).collect())
    }

    async fn requeue(&self, row: ReplicationRow<D>) -> Result<(), StoreError> {
        {
            let mut state = self.lock();
            Self::restore_row(&mut state, row);
        }
        self.changed.notify_one();
        Ok(())
    }

    async fn ack_push(&self, row: &ReplicationRow<D>) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.master_copies.insert(
            row.new_document_state.id().to_string(),
            row.new_document_state.clone(),
        );
        Ok(())
    }

    async fn commit_pull(
        &self,
        checkpoint_key: &str,
        batch: PullApply<D>,
    ) -> Result<(), StoreError> {
        let requeued = !batch.requeue.is_empty();
        {
            // One lock scope: the batch applies wholesale or not at all.
            let mut state = self.lock();
            for doc in batch.writes {
                let id = doc.id().to_string();
                state.master_copies.insert(id.clone(), doc.clone());
                state.documents.insert(id, doc);
            }
            for id in &batch.drop_pending {
                state
                    .pending
                    .retain(|row| row.new_document_state.id() != id);
            }
            for row in batch.requeue {
                Self::restore_row(&mut state, row);
            }
            state
                .checkpoints
                .insert(checkpoint_key.to_string(), batch.checkpoint);
        }
        if requeued {
            self.changed.notify_one();
        }
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        checkpoint_key: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.lock().checkpoints.get(checkpoint_key).cloned())
    }

    fn change_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }
}

// ---------------------------------------------------------------------------
// Remote store
// ---------------------------------------------------------------------------

/// In-memory authoritative store.
///
/// Rows are stored remote-shaped (snake_case columns) through the field
/// map, so both directions of the mapping are exercised on every exchange.
#[derive(Debug)]
pub struct MemoryRemote {
    mapping: FieldMap,
    rows: Mutex<BTreeMap<DocumentId, Value>>,
    events: broadcast::Sender<RemoteEvent>,
    unavailable: AtomicBool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Create an empty remote store with the default replication field map.
    pub fn new() -> Self {
        Self::with_mapping(FieldMap::replication_default())
    }

    /// Create an empty remote store with a custom field map.
    pub fn with_mapping(mapping: FieldMap) -> Self {
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            mapping,
            rows: Mutex::new(BTreeMap::new()),
            events,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate a network outage: while set, every call fails with a
    /// transient [`RemoteError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored rows, tombstones included (test observability).
    pub fn row_count(&self) -> usize {
        self.lock().len()
    }

    /// Raw remote-shaped row (test observability).
    pub fn raw_row(&self, id: &str) -> Option<Value> {
        self.lock().get(id).cloned()
    }

    fn ensure_available(&self) -> Result<(), RemoteError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("simulated outage".into()))
        } else {
            Ok(())
        }
    }

    fn to_row<D: Replicated>(&self, doc: &D) -> Result<Value, RemoteError> {
        let value = serde_json::to_value(doc)
            .map_err(|err| RemoteError::Backend(format!("unencodable document: {err}")))?;
        Ok(self.mapping.to_remote(value))
    }

    fn from_row<D: Replicated>(&self, row: Value) -> Result<D, RemoteError> {
        serde_json::from_value(self.mapping.to_local(row))
            .map_err(|err| RemoteError::Backend(format!("undecodable row: {err}")))
    }

    fn row_updated_at(row: &Value) -> u64 {
        row.get(UPDATED_AT_COLUMN)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    fn row_revision(row: &Value) -> &str {
        row.get(REVISION_COLUMN)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    fn announce(&self, row: &Value) {
        let id = row
            .get(ID_COLUMN)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        // Nobody listening is fine.
        let _ = self.events.send(RemoteEvent::Change {
            id,
            updated_at: Self::row_updated_at(row),
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<DocumentId, Value>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<D: Replicated> RemoteStore<D> for MemoryRemote {
    async fn pull_since(
        &self,
        checkpoint: Option<&Checkpoint>,
        limit: usize,
    ) -> Result<Vec<D>, RemoteError> {
        self.ensure_available()?;

        // The checkpoint is a compound (updated_at, id) cursor. Filtering
        // by timestamp alone would skip rows that share the checkpoint's
        // timestamp but sort after its id across a batch boundary.
        let after_checkpoint = |updated_at: u64, id: &str| match checkpoint {
            Some(cp) => {
                updated_at > cp.last_updated_at
                    || (updated_at == cp.last_updated_at && id > cp.last_id.as_str())
            }
            None => true,
        };

        let mut matching: Vec<(u64, DocumentId, Value)> = {
            let rows = self.lock();
            rows.iter()
                .map(|(id, row)| (Self::row_updated_at(row), id.clone(), row.clone()))
                .filter(|(updated_at, id, _)| after_checkpoint(*updated_at, id))
                .collect()
        };
        matching.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        matching
            .into_iter()
            .take(limit)
            .map(|(_, _, row)| self.from_row(row))
            .collect()
    }

    async fn insert_if_absent(&self, doc: &D) -> Result<Option<D>, RemoteError> {
        self.ensure_available()?;
        let row = self.to_row(doc)?;
        let existing = {
            let mut rows = self.lock();
            match rows.get(doc.id()) {
                Some(current) => Some(current.clone()),
                None => {
                    rows.insert(doc.id().to_string(), row.clone());
                    None
                }
            }
        };
        match existing {
            Some(current) => Ok(Some(self.from_row(current)?)),
            None => {
                self.announce(&row);
                Ok(None)
            }
        }
    }

    async fn update_if_current(
        &self,
        doc: &D,
        expected_revision: &str,
    ) -> Result<Option<D>, RemoteError> {
        self.ensure_available()?;
        let row = self.to_row(doc)?;
        let outcome = {
            let mut rows = self.lock();
            match rows.get(doc.id()) {
                Some(current) if Self::row_revision(current) == expected_revision => {
                    rows.insert(doc.id().to_string(), row.clone());
                    None
                }
                Some(current) => Some(current.clone()),
                None => {
                    // The assumed master never existed. There is no
                    // conflicting row to return; committing the write is
                    // the converging outcome.
                    tracing::warn!(doc_id = %doc.id(), "conditional update against missing row");
                    rows.insert(doc.id().to_string(), row.clone());
                    None
                }
            }
        };
        match outcome {
            Some(current) => Ok(Some(self.from_row(current)?)),
            None => {
                self.announce(&row);
                Ok(None)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{doc, stamped, TestDoc};
    use ferry_engine::Revision;

    #[tokio::test]
    async fn local_insert_stamps_and_queues() {
        let local: MemoryLocal<TestDoc> = MemoryLocal::new("node-1");
        local.insert(doc("t1", "buy milk", 1000));

        let stored = local.get("t1").await.unwrap().unwrap();
        assert_eq!(Revision::parse(stored.revision()).unwrap().height, 1);

        let pending = local.pending_for("t1").await.unwrap().unwrap();
        assert!(pending.is_insert());
        assert_eq!(pending.new_document_state, stored);
    }

    #[tokio::test]
    async fn second_edit_keeps_assumed_master() {
        let local: MemoryLocal<TestDoc> = MemoryLocal::new("node-1");

        // Simulate an already-synced document.
        let synced = stamped("t1", "buy milk", 1000, "1-abc");
        local.apply_remote(synced.clone()).await.unwrap();

        let mut edit = synced.clone();
        edit.title = "buy milk and eggs".into();
        edit.updated_at = 2000;
        local.update(edit);

        let mut second = local.get("t1").await.unwrap().unwrap();
        second.title = "buy everything".into();
        second.updated_at = 3000;
        local.update(second);

        let pending = local.pending_for("t1").await.unwrap().unwrap();
        assert_eq!(pending.assumed_master_state, Some(synced));
        assert_eq!(pending.new_document_state.title, "buy everything");
        assert_eq!(local.pending_count(), 1);
    }

    #[tokio::test]
    async fn remove_tombstones_instead_of_deleting() {
        let local: MemoryLocal<TestDoc> = MemoryLocal::new("node-1");
        local.insert(doc("t1", "buy milk", 1000));
        local.remove("t1", 2000).unwrap();

        let stored = local.get("t1").await.unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.updated_at, 2000);
        assert_eq!(Revision::parse(stored.revision()).unwrap().height, 2);
    }

    #[tokio::test]
    async fn remove_of_unknown_document_is_not_found() {
        let local: MemoryLocal<TestDoc> = MemoryLocal::new("node-1");
        assert_eq!(
            local.remove("ghost", 1000),
            Err(StoreError::NotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn take_pending_respects_limit_and_order() {
        let local: MemoryLocal<TestDoc> = MemoryLocal::new("node-1");
        local.insert(doc("a", "first", 1000));
        local.insert(doc("b", "second", 2000));
        local.insert(doc("c", "third", 3000));

        let rows = local.take_pending(2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id(), "a");
        assert_eq!(rows[1].id(), "b");
        assert_eq!(local.pending_count(), 1);
    }

    #[tokio::test]
    async fn remote_rows_are_snake_case() {
        let remote = MemoryRemote::new();
        let doc = stamped("t1", "buy milk", 1000, "1-abc");
        let conflict = remote.insert_if_absent(&doc).await.unwrap();
        assert!(conflict.is_none());

        let row = remote.raw_row("t1").unwrap();
        assert_eq!(row["updated_at"], 1000);
        assert_eq!(row["replication_revision"], "1-abc");
        assert_eq!(row["deleted"], false);
        assert!(row.get("updatedAt").is_none());
    }

    #[tokio::test]
    async fn insert_collision_returns_current_row() {
        let remote = MemoryRemote::new();
        let first = stamped("t1", "mine", 1000, "1-abc");
        remote.insert_if_absent(&first).await.unwrap();

        let second = stamped("t1", "theirs", 2000, "1-def");
        let conflict = remote.insert_if_absent(&second).await.unwrap();
        assert_eq!(conflict, Some(first));
    }

    #[tokio::test]
    async fn cas_succeeds_only_on_matching_revision() {
        let remote = MemoryRemote::new();
        let v1 = stamped("t1", "v1", 1000, "1-abc");
        remote.insert_if_absent(&v1).await.unwrap();

        let v2 = stamped("t1", "v2", 2000, "2-def");
        let conflict = remote.update_if_current(&v2, "1-abc").await.unwrap();
        assert!(conflict.is_none());

        // Stale expectation: zero rows affected, current version returned.
        let stale = stamped("t1", "stale", 3000, "2-zzz");
        let conflict: Option<TestDoc> = remote.update_if_current(&stale, "1-abc").await.unwrap();
        assert_eq!(conflict, Some(v2));
    }

    #[tokio::test]
    async fn pull_since_is_strictly_newer_sorted_and_limited() {
        let remote = MemoryRemote::new();
        for (id, at) in [("b", 200u64), ("a", 100), ("c", 300)] {
            remote
                .insert_if_absent(&stamped(id, id, at, "1-abc"))
                .await
                .unwrap();
        }

        let all: Vec<TestDoc> = remote.pull_since(None, 10).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        let cp = Checkpoint {
            last_id: "a".into(),
            last_updated_at: 100,
        };
        let newer: Vec<TestDoc> = remote.pull_since(Some(&cp), 1).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].id, "b");
    }

    #[tokio::test]
    async fn equal_timestamps_resume_after_a_batch_boundary() {
        let remote = MemoryRemote::new();
        for id in ["a", "b", "c"] {
            remote
                .insert_if_absent(&stamped(id, id, 100, "1-abc"))
                .await
                .unwrap();
        }

        let first: Vec<TestDoc> = remote.pull_since(None, 2).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);

        // The checkpoint shares its timestamp with the remaining row; the
        // id component of the cursor must carry the scan past it.
        let cp = Checkpoint::from_batch(&first).unwrap();
        let rest: Vec<TestDoc> = remote.pull_since(Some(&cp), 2).await.unwrap();
        let ids: Vec<&str> = rest.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["c"]);
    }

    #[tokio::test]
    async fn outage_is_transient() {
        let remote = MemoryRemote::new();
        remote.set_unavailable(true);

        let result: Result<Vec<TestDoc>, _> = remote.pull_since(None, 10).await;
        let err = result.unwrap_err();
        assert!(err.is_transient());

        remote.set_unavailable(false);
        let result: Result<Vec<TestDoc>, _> = remote.pull_since(None, 10).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn committed_writes_are_announced() {
        let remote = MemoryRemote::new();
        let mut events = RemoteStore::<TestDoc>::subscribe(&remote);

        remote
            .insert_if_absent(&stamped("t1", "title", 1000, "1-abc"))
            .await
            .unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            RemoteEvent::Change {
                id: "t1".into(),
                updated_at: 1000
            }
        );
    }
}
