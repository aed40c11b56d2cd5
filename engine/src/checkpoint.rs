//! Pull checkpoints.
//!
//! A checkpoint is an opaque cursor into the remote store's change
//! ordering, monotonic in `last_updated_at`. One checkpoint exists per
//! (collection, replication identifier) pair; it starts empty at first
//! sync, is persisted after every fully-applied pull batch, and is only
//! ever reset by an explicit resync.

use crate::{DocumentId, Replicated, Timestamp};
use serde::{Deserialize, Serialize};

/// Cursor marking how far a pull has progressed through the remote change
/// ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Id of the last document of the last fully-applied batch.
    pub last_id: DocumentId,
    /// `updated_at` of that document, milliseconds since epoch.
    pub last_updated_at: Timestamp,
}

impl Checkpoint {
    /// Derive the checkpoint from the last document of a pulled batch.
    ///
    /// Returns `None` for an empty batch - an empty batch never advances
    /// the checkpoint.
    pub fn from_batch<D: Replicated>(batch: &[D]) -> Option<Self> {
        batch.last().map(|doc| Self {
            last_id: doc.id().to_string(),
            last_updated_at: doc.updated_at(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Doc {
        id: String,
        updated_at: Timestamp,
        replication_revision: String,
        #[serde(rename = "_deleted")]
        deleted: bool,
    }

    impl Replicated for Doc {
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

    fn doc(id: &str, updated_at: Timestamp) -> Doc {
        Doc {
            id: id.into(),
            updated_at,
            replication_revision: "1-abc".into(),
            deleted: false,
        }
    }

    #[test]
    fn from_batch_takes_last_document() {
        let batch = vec![doc("a", 100), doc("b", 200), doc("c", 300)];
        let checkpoint = Checkpoint::from_batch(&batch).unwrap();
        assert_eq!(checkpoint.last_id, "c");
        assert_eq!(checkpoint.last_updated_at, 300);
    }

    #[test]
    fn empty_batch_yields_no_checkpoint() {
        let batch: Vec<Doc> = Vec::new();
        assert_eq!(Checkpoint::from_batch(&batch), None);
    }

    #[test]
    fn serialization_is_camel_case() {
        let checkpoint = Checkpoint {
            last_id: "c".into(),
            last_updated_at: 300,
        };
        let json = serde_json::to_string(&checkpoint).unwrap();
        assert_eq!(json, r#"{"lastId":"c","lastUpdatedAt":300}"#);

        let parsed: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, checkpoint);
    }
}
