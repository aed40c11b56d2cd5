//! The push pipeline: optimistic replication of pending local changes to
//! the remote store.
//!
//! A row believed to be an insert goes through insert-if-absent; anything
//! else through a conditional write that only succeeds while the remote
//! still holds the row's assumed master revision. Either way a conflict
//! comes back as the current remote document, is resolved, and ends in one
//! of exactly three outcomes: acknowledged, resolved in the remote's favor
//! (written locally), or re-queued because the local version won. No row is
//! ever silently dropped.
//!
//! Pushes for the same document id are strictly serialized; rows for
//! different ids may push concurrently.

use crate::error::{Result, SyncError};
use crate::store::{LocalStore, RemoteStore, ReplicationRow};
use dashmap::DashMap;
use ferry_engine::{resolve, DocumentId, Replicated, RevisionHooks, Winner};
use futures::future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What happened to one pushed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// The remote accepted the write.
    Acknowledged,
    /// The remote version won the conflict and was written locally.
    ResolvedRemote,
    /// The local version won; the row went back on the queue against the
    /// remote's current version.
    Requeued,
}

/// Counters for one push call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub acknowledged: usize,
    pub resolved_remote: usize,
    pub requeued: usize,
}

impl PushReport {
    /// Total rows that reached an outcome.
    pub fn total(&self) -> usize {
        self.acknowledged + self.resolved_remote + self.requeued
    }

    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Acknowledged => self.acknowledged += 1,
            RowOutcome::ResolvedRemote => self.resolved_remote += 1,
            RowOutcome::Requeued => self.requeued += 1,
        }
    }
}

/// Pushes pending local rows to the remote store.
pub struct PushPipeline<D, L, R> {
    local: Arc<L>,
    remote: Arc<R>,
    hooks: RevisionHooks,
    /// Per-call row limit; larger batches are rejected wholesale.
    max_rows: usize,
    /// Per-id locks serializing in-flight pushes.
    in_flight: DashMap<DocumentId, Arc<Mutex<()>>>,
    _doc: PhantomData<D>,
}

impl<D, L, R> PushPipeline<D, L, R>
where
    D: Replicated,
    L: LocalStore<D>,
    R: RemoteStore<D>,
{
    pub fn new(local: Arc<L>, remote: Arc<R>, hooks: RevisionHooks, max_rows: usize) -> Self {
        Self {
            local,
            remote,
            hooks,
            max_rows,
            in_flight: DashMap::new(),
            _doc: PhantomData,
        }
    }

    /// Push a batch of rows, concurrently across document ids.
    ///
    /// Fails with [`SyncError::ProtocolViolation`] when the batch exceeds
    /// the per-call limit; the batch is rejected wholesale, no coordinator
    /// state is touched, and the caller still owns the rows for a
    /// resubmission. Rows whose push fails go back on the queue before the
    /// first error surfaces, so nothing is lost across a retry.
    pub async fn push(&self, rows: &[ReplicationRow<D>]) -> Result<PushReport> {
        if rows.len() > self.max_rows {
            return Err(SyncError::ProtocolViolation {
                got: rows.len(),
                limit: self.max_rows,
            });
        }

        let attempts = future::join_all(rows.iter().map(|row| async move {
            let result = self.push_row(row).await;
            (row, result)
        }))
        .await;

        let mut report = PushReport::default();
        let mut first_error = None;
        for (row, result) in attempts {
            match result {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    if let Err(requeue_err) = self.local.requeue(row.clone()).await {
                        tracing::error!(
                            error = %requeue_err,
                            "failed to requeue row after push failure"
                        );
                    }
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        tracing::debug!(
            acknowledged = report.acknowledged,
            resolved_remote = report.resolved_remote,
            requeued = report.requeued,
            "push batch finished"
        );
        Ok(report)
    }

    async fn push_row(&self, row: &ReplicationRow<D>) -> Result<RowOutcome> {
        let id = row.id().to_string();
        let lock = {
            let entry = self
                .in_flight
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let outcome = {
            let _guard = lock.lock().await;
            self.exchange(row).await
        };

        // Two holders left means the map entry and our clone: nobody else
        // waits on this id, so the entry can go. A waiter that raced the
        // removal just re-creates the entry on a free mutex.
        self.in_flight
            .remove_if(&id, |_, holders| Arc::strong_count(holders) == 2);

        outcome
    }

    /// The remote exchange for one row. Caller holds the row's id lock.
    async fn exchange(&self, row: &ReplicationRow<D>) -> Result<RowOutcome> {
        let conflict = match &row.assumed_master_state {
            None => self.remote.insert_if_absent(&row.new_document_state).await?,
            Some(assumed) => {
                self.remote
                    .update_if_current(&row.new_document_state, assumed.revision())
                    .await?
            }
        };

        let Some(current) = conflict else {
            self.local.ack_push(row).await?;
            return Ok(RowOutcome::Acknowledged);
        };

        tracing::debug!(doc_id = %row.id(), "push conflict detected");
        let resolution = resolve(&row.new_document_state, &current);
        match resolution.winner {
            Winner::Remote => {
                self.local.apply_remote(current).await?;
                Ok(RowOutcome::ResolvedRemote)
            }
            Winner::Local => {
                // Bump the winner above the remote's height and try again
                // next cycle, now against the version just fetched.
                let mut winner = row.new_document_state.clone();
                self.hooks.pre_save(&mut winner);
                self.local
                    .requeue(ReplicationRow {
                        assumed_master_state: Some(current),
                        new_document_state: winner,
                    })
                    .await?;
                Ok(RowOutcome::Requeued)
            }
        }
    }
}
