//! The replication coordinator: owns the pipelines, the change feed
//! listener, and the retry policy.
//!
//! A coordinator is constructed with its stores and configuration and
//! started explicitly; there is no global instance. Its worker task reacts
//! to three inputs: pull triggers from the change feed, the local store's
//! change signal, and a periodic safety-net poll. Transient failures are
//! retried with doubling backoff; every failure is published on the error
//! stream and reflected in the observable state. `stop` is terminal.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::pull::PullPipeline;
use crate::push::PushPipeline;
use crate::store::{LocalStore, RemoteStore};
use crate::stream::{ChangeFeedListener, PullTrigger};
use ferry_engine::{Replicated, RevisionHooks};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Capacity of the error broadcast channel.
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Observable lifecycle of a replication instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    Stopped,
    Starting,
    Active,
    Pulling,
    Pushing,
    /// In backoff after a failure; the engine keeps retrying.
    Error,
}

/// A running replication instance.
///
/// [`stop`](Self::stop) shuts replication down and waits for the worker;
/// dropping the coordinator also stops the worker, but without waiting.
pub struct ReplicationCoordinator {
    state: watch::Receiver<ReplicationState>,
    errors: broadcast::Sender<SyncError>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl ReplicationCoordinator {
    /// Validate the configuration and start replicating between the two
    /// stores.
    pub fn start<D, L, R>(local: Arc<L>, remote: Arc<R>, config: SyncConfig) -> Result<Self>
    where
        D: Replicated,
        L: LocalStore<D>,
        R: RemoteStore<D>,
    {
        config.validate()?;

        let hooks = RevisionHooks::new(config.node_id.clone());
        let pull = PullPipeline::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            hooks.clone(),
            config.checkpoint_key(),
            config.pull_batch_size,
        );
        let push = PushPipeline::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            hooks,
            config.push_batch_size,
        );

        let (state_tx, state_rx) = watch::channel(ReplicationState::Starting);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        let listener = ChangeFeedListener::spawn(remote.subscribe(), trigger_tx);

        tracing::info!(
            replication_id = %config.replication_id,
            collection = %config.collection,
            "replication starting"
        );

        let worker = Worker {
            local,
            pull,
            push,
            config,
            state: state_tx,
            errors: errors.clone(),
            shutdown: shutdown_rx,
            triggers: trigger_rx,
        };
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            state: state_rx,
            errors,
            shutdown: shutdown_tx,
            worker,
            listener,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReplicationState {
        *self.state.borrow()
    }

    /// A watch on the lifecycle state, for callers that want to await
    /// transitions.
    pub fn watch_state(&self) -> watch::Receiver<ReplicationState> {
        self.state.clone()
    }

    /// Subscribe to replication errors. Both transient and fatal failures
    /// are published here; transient ones are also retried internally.
    pub fn errors(&self) -> broadcast::Receiver<SyncError> {
        self.errors.subscribe()
    }

    /// Stop replicating. Terminal: a stopped coordinator cannot be
    /// restarted, start a new one instead. Returns once the worker has
    /// exited; an in-flight remote call is abandoned, not awaited.
    pub async fn stop(self) {
        // Worker may already be gone; nothing to signal then.
        let _ = self.shutdown.send(true);
        self.listener.abort();
        let _ = self.worker.await;
        tracing::info!("replication stopped");
    }
}

/// What the event loop should react to next.
enum Event {
    Shutdown,
    Trigger(PullTrigger),
    LocalChange,
    Poll,
}

struct Worker<D, L, R>
where
    D: Replicated,
    L: LocalStore<D>,
    R: RemoteStore<D>,
{
    local: Arc<L>,
    pull: PullPipeline<D, L, R>,
    push: PushPipeline<D, L, R>,
    config: SyncConfig,
    state: watch::Sender<ReplicationState>,
    errors: broadcast::Sender<SyncError>,
    shutdown: watch::Receiver<bool>,
    triggers: mpsc::UnboundedReceiver<PullTrigger>,
}

impl<D, L, R> Worker<D, L, R>
where
    D: Replicated,
    L: LocalStore<D>,
    R: RemoteStore<D>,
{
    async fn run(mut self) {
        let local_changes = self.local.change_signal();
        // First poll only after a full interval; the listener's initial
        // resync covers startup.
        let start = tokio::time::Instant::now() + self.config.pull_interval;
        let mut poll = tokio::time::interval_at(start, self.config.pull_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        Event::Shutdown
                    } else {
                        continue;
                    }
                }
                trigger = self.triggers.recv() => match trigger {
                    Some(trigger) => Event::Trigger(trigger),
                    // Listener gone; the poll keeps replication converging.
                    None => continue,
                },
                _ = local_changes.notified() => Event::LocalChange,
                _ = poll.tick() => Event::Poll,
            };

            match event {
                Event::Shutdown => break,
                Event::Trigger(PullTrigger::Resync) => {
                    if !self.run_pull(true).await || !self.run_push().await {
                        break;
                    }
                }
                Event::Trigger(PullTrigger::Hint { id, updated_at }) => {
                    tracing::debug!(doc_id = %id, updated_at, "remote change hint");
                    if !self.run_pull(false).await {
                        break;
                    }
                }
                Event::LocalChange => {
                    if !self.run_push().await {
                        break;
                    }
                }
                Event::Poll => {
                    if !self.run_pull(false).await || !self.run_push().await {
                        break;
                    }
                }
            }
        }

        self.set_state(ReplicationState::Stopped);
    }

    /// Run one pull cycle, retrying transient failures with backoff.
    /// Returns `false` when shutdown interrupted the cycle.
    async fn run_pull(&mut self, resync: bool) -> bool {
        let mut backoff = self.config.initial_backoff;
        loop {
            self.set_state(ReplicationState::Pulling);
            let pull = &self.pull;
            let cycle = tokio::select! {
                result = async move {
                    if resync {
                        pull.resync().await
                    } else {
                        pull.drain().await
                    }
                } => Some(result),
                // Batch commits are atomic, so abandoning an in-flight
                // cycle leaves the store and checkpoint consistent.
                _ = self.shutdown.changed() => None,
            };
            let Some(result) = cycle else {
                return false;
            };
            match result {
                Ok(report) => {
                    if report.applied > 0 || report.requeued > 0 {
                        tracing::debug!(
                            applied = report.applied,
                            conflicts = report.conflicts,
                            requeued = report.requeued,
                            "pull cycle finished"
                        );
                    }
                    self.set_state(ReplicationState::Active);
                    return true;
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(error = %err, backoff = ?backoff, "pull failed, retrying");
                    self.publish(err);
                    self.set_state(ReplicationState::Error);
                    if !self.sleep_or_shutdown(backoff).await {
                        return false;
                    }
                    backoff = Self::next_backoff(backoff, self.config.max_backoff);
                }
                Err(err) => {
                    tracing::error!(error = %err, "pull failed");
                    self.publish(err);
                    self.set_state(ReplicationState::Error);
                    return true;
                }
            }
        }
    }

    /// Drain the pending queue, retrying transient failures with backoff.
    /// Returns `false` when shutdown interrupted the cycle.
    async fn run_push(&mut self) -> bool {
        let mut backoff = self.config.initial_backoff;
        loop {
            let rows = match self.local.take_pending(self.config.push_batch_size).await {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::error!(error = %err, "reading pending rows failed");
                    self.publish(err.into());
                    self.set_state(ReplicationState::Error);
                    return true;
                }
            };
            if rows.is_empty() {
                self.set_state(ReplicationState::Active);
                return true;
            }

            self.set_state(ReplicationState::Pushing);
            let push = &self.push;
            let cycle = tokio::select! {
                result = push.push(&rows) => Some(result),
                _ = self.shutdown.changed() => None,
            };
            let Some(result) = cycle else {
                // Interrupted mid-flight: put the batch back so a later
                // instance can resume. Re-pushing a row that already went
                // through only re-runs its conditional write.
                for row in rows {
                    if let Err(err) = self.local.requeue(row).await {
                        tracing::error!(error = %err, "failed to requeue row during shutdown");
                    }
                }
                return false;
            };
            match result {
                Ok(_) => {
                    backoff = self.config.initial_backoff;
                }
                Err(err) if err.is_transient() => {
                    // The pipeline put the rows back; retry the whole cycle.
                    tracing::warn!(error = %err, backoff = ?backoff, "push failed, retrying");
                    self.publish(err);
                    self.set_state(ReplicationState::Error);
                    if !self.sleep_or_shutdown(backoff).await {
                        return false;
                    }
                    backoff = Self::next_backoff(backoff, self.config.max_backoff);
                }
                Err(err) => {
                    tracing::error!(error = %err, "push failed");
                    self.publish(err);
                    self.set_state(ReplicationState::Error);
                    return true;
                }
            }
        }
    }

    /// Sleep through a backoff window unless shutdown arrives first.
    async fn sleep_or_shutdown(&mut self, backoff: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(backoff) => true,
            changed = self.shutdown.changed() => {
                changed.is_ok() && !*self.shutdown.borrow()
            }
        }
    }

    fn next_backoff(current: Duration, max: Duration) -> Duration {
        (current * 2).min(max)
    }

    fn set_state(&self, state: ReplicationState) {
        self.state.send_replace(state);
    }

    fn publish(&self, err: SyncError) {
        // Nobody subscribed is fine.
        let _ = self.errors.send(err);
    }
}
