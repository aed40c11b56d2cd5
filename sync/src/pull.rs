//! The pull pipeline: checkpointed, batch-draining replication of remote
//! changes into the local store.
//!
//! One cycle repeats `pull_since(checkpoint, batch_size)` until the remote
//! returns an empty batch. Every non-empty batch is staged in full - pulled
//! documents that collide with pending local writes go through the conflict
//! resolver first - and committed to the local store as one unit together
//! with the batch's checkpoint. An empty batch never advances the
//! checkpoint.

use crate::error::Result;
use crate::store::{LocalStore, PullApply, RemoteStore, ReplicationRow};
use ferry_engine::{resolve, Checkpoint, Replicated, RevisionHooks, Winner};
use std::marker::PhantomData;
use std::sync::Arc;

/// Counters for one pull cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Non-empty batches drained.
    pub batches: usize,
    /// Remote documents applied locally without conflict.
    pub applied: usize,
    /// Pulled documents that collided with a pending local write.
    pub conflicts: usize,
    /// Pending rows re-queued for push because the local version won.
    pub requeued: usize,
}

/// Pulls remote changes since a checkpoint and applies them locally.
pub struct PullPipeline<D, L, R> {
    local: Arc<L>,
    remote: Arc<R>,
    hooks: RevisionHooks,
    checkpoint_key: String,
    batch_size: usize,
    _doc: PhantomData<D>,
}

impl<D, L, R> PullPipeline<D, L, R>
where
    D: Replicated,
    L: LocalStore<D>,
    R: RemoteStore<D>,
{
    pub fn new(
        local: Arc<L>,
        remote: Arc<R>,
        hooks: RevisionHooks,
        checkpoint_key: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            local,
            remote,
            hooks,
            checkpoint_key: checkpoint_key.into(),
            batch_size,
            _doc: PhantomData,
        }
    }

    /// Drain the remote backlog from the persisted checkpoint.
    pub async fn drain(&self) -> Result<PullReport> {
        let checkpoint = self.local.load_checkpoint(&self.checkpoint_key).await?;
        self.drain_from(checkpoint).await
    }

    /// Drain from scratch, ignoring the persisted checkpoint. Used for the
    /// full resync a change feed (re)connection forces. Re-applying already
    /// known documents is a no-op, so this is safe at any time.
    pub async fn resync(&self) -> Result<PullReport> {
        self.drain_from(None).await
    }

    async fn drain_from(&self, mut checkpoint: Option<Checkpoint>) -> Result<PullReport> {
        let mut report = PullReport::default();

        loop {
            let batch = self
                .remote
                .pull_since(checkpoint.as_ref(), self.batch_size)
                .await?;

            let Some(next) = Checkpoint::from_batch(&batch) else {
                // Empty batch: backlog drained, checkpoint stays put.
                break;
            };

            let apply = self.stage(batch, next.clone(), &mut report).await?;
            self.local.commit_pull(&self.checkpoint_key, apply).await?;

            report.batches += 1;
            checkpoint = Some(next);
        }

        tracing::debug!(
            batches = report.batches,
            applied = report.applied,
            conflicts = report.conflicts,
            requeued = report.requeued,
            "pull cycle drained"
        );
        Ok(report)
    }

    /// Decide, per pulled document, what the batch commit must do. Reads
    /// only; all writes happen in `commit_pull`.
    async fn stage(
        &self,
        batch: Vec<D>,
        checkpoint: Checkpoint,
        report: &mut PullReport,
    ) -> Result<PullApply<D>> {
        let mut apply = PullApply {
            writes: Vec::new(),
            drop_pending: Vec::new(),
            requeue: Vec::new(),
            checkpoint,
        };

        for remote_doc in batch {
            let Some(pending) = self.local.pending_for(remote_doc.id()).await? else {
                report.applied += 1;
                apply.writes.push(remote_doc);
                continue;
            };

            report.conflicts += 1;
            let resolution = resolve(&pending.new_document_state, &remote_doc);
            match resolution.winner {
                Winner::Remote => {
                    tracing::debug!(doc_id = %remote_doc.id(), "pulled document wins over pending local write");
                    apply.drop_pending.push(remote_doc.id().to_string());
                    apply.writes.push(remote_doc);
                }
                Winner::Local => {
                    // The remote is stale from this actor's perspective.
                    // Bump the local winner above the pulled height and
                    // queue it for push against the version just pulled.
                    tracing::debug!(doc_id = %remote_doc.id(), "pending local write wins over pulled document");
                    let mut winner = pending.new_document_state;
                    self.hooks.pre_save(&mut winner);
                    report.requeued += 1;
                    apply.requeue.push(ReplicationRow {
                        assumed_master_state: Some(remote_doc),
                        new_document_state: winner,
                    });
                }
            }
        }

        Ok(apply)
    }
}
