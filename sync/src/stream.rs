//! Bridges the remote change feed to pull triggers.
//!
//! The listener turns raw remote events into a small trigger vocabulary
//! the coordinator acts on: a full checkpointed drain on (re)connection,
//! a cheap hint when a single document changed. A lagged feed means
//! events were lost, so it degrades to a full drain rather than miss
//! changes.

use crate::store::RemoteEvent;
use ferry_engine::{DocumentId, Timestamp};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// What the coordinator should do about remote activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullTrigger {
    /// Drain everything newer than the checkpoint.
    Resync,
    /// A single document changed; a regular drain will pick it up.
    Hint {
        id: DocumentId,
        updated_at: Timestamp,
    },
}

/// Forwards remote events to the coordinator as pull triggers.
pub struct ChangeFeedListener;

impl ChangeFeedListener {
    /// Spawn the forwarding task.
    ///
    /// A fresh subscription means a fresh connection, so the first trigger
    /// is always a resync: anything that happened before the feed was
    /// attached is caught up through the checkpoint. The task ends when
    /// either side of the channel closes.
    pub fn spawn(
        mut events: broadcast::Receiver<RemoteEvent>,
        triggers: mpsc::UnboundedSender<PullTrigger>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if triggers.send(PullTrigger::Resync).is_err() {
                return;
            }
            loop {
                let trigger = match events.recv().await {
                    Ok(RemoteEvent::Connected) => PullTrigger::Resync,
                    Ok(RemoteEvent::Change { id, updated_at }) => {
                        PullTrigger::Hint { id, updated_at }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "change feed lagged, falling back to resync");
                        PullTrigger::Resync
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if triggers.send(trigger).is_err() {
                    break;
                }
            }
            tracing::debug!("change feed listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscription_starts_with_a_resync() {
        let (events, _keep) = broadcast::channel(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ChangeFeedListener::spawn(events.subscribe(), tx);

        assert_eq!(rx.recv().await, Some(PullTrigger::Resync));
        handle.abort();
    }

    #[tokio::test]
    async fn changes_become_hints() {
        let (events, _keep) = broadcast::channel(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ChangeFeedListener::spawn(events.subscribe(), tx);
        assert_eq!(rx.recv().await, Some(PullTrigger::Resync));

        events
            .send(RemoteEvent::Change {
                id: "t1".into(),
                updated_at: 1000,
            })
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(PullTrigger::Hint {
                id: "t1".into(),
                updated_at: 1000
            })
        );
        handle.abort();
    }

    #[tokio::test]
    async fn reconnection_becomes_a_resync() {
        let (events, _keep) = broadcast::channel(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ChangeFeedListener::spawn(events.subscribe(), tx);
        assert_eq!(rx.recv().await, Some(PullTrigger::Resync));

        events.send(RemoteEvent::Connected).unwrap();
        assert_eq!(rx.recv().await, Some(PullTrigger::Resync));
        handle.abort();
    }

    #[tokio::test]
    async fn lagged_feed_degrades_to_resync() {
        // Capacity 1 so the second unconsumed send evicts the first.
        let (events, _keep) = broadcast::channel(1);
        let lagging = events.subscribe();

        events.send(RemoteEvent::Connected).unwrap();
        events
            .send(RemoteEvent::Change {
                id: "t1".into(),
                updated_at: 1000,
            })
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ChangeFeedListener::spawn(lagging, tx);

        assert_eq!(rx.recv().await, Some(PullTrigger::Resync));
        // The evicted event surfaces as lag, which turns into a resync
        // rather than a silently missed change.
        assert_eq!(rx.recv().await, Some(PullTrigger::Resync));
        assert_eq!(
            rx.recv().await,
            Some(PullTrigger::Hint {
                id: "t1".into(),
                updated_at: 1000
            })
        );
        handle.abort();
    }

    #[tokio::test]
    async fn closed_feed_stops_the_task() {
        let (events, _) = broadcast::channel::<RemoteEvent>(8);
        let receiver = events.subscribe();
        drop(events);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ChangeFeedListener::spawn(receiver, tx);

        assert_eq!(rx.recv().await, Some(PullTrigger::Resync));
        handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
