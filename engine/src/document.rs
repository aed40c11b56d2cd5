//! The contract replicated documents must satisfy.

use crate::Timestamp;
use serde::{de::DeserializeOwned, Serialize};

/// A document type that can be replicated.
///
/// Each replicated collection defines one concrete document type and
/// implements this trait for it. The engine never looks inside business
/// fields; it only needs the identity, the ordering timestamp, the revision
/// marker, and the tombstone flag.
///
/// An empty revision string means "not yet stamped" - the pre-insert hook
/// assigns the first revision in that case.
pub trait Replicated:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Unique identifier within the collection.
    fn id(&self) -> &str;

    /// Last-modified timestamp in milliseconds since epoch. Drives the
    /// remote change ordering and the conflict resolver's tiebreak.
    fn updated_at(&self) -> Timestamp;

    /// Set the last-modified timestamp. The application owns the clock;
    /// stores call this when a mutation (a delete, typically) needs the
    /// document to move forward in change order.
    fn set_updated_at(&mut self, updated_at: Timestamp);

    /// Encoded revision marker (`"<height>-<digest>"`), empty if unstamped.
    fn revision(&self) -> &str;

    /// Replace the revision marker.
    fn set_revision(&mut self, revision: String);

    /// Tombstone flag. Deleted documents are retained so the deletion
    /// itself can replicate.
    fn is_deleted(&self) -> bool;

    /// Set the tombstone flag.
    fn set_deleted(&mut self, deleted: bool);

    /// Bytes fed to the revision digest.
    ///
    /// The default JSON encoding is deterministic for struct types (fields
    /// serialize in declaration order), which is all stamping needs.
    fn content_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Note {
        id: String,
        body: String,
        updated_at: Timestamp,
        replication_revision: String,
        #[serde(rename = "_deleted")]
        deleted: bool,
    }

    impl Replicated for Note {
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

    #[test]
    fn content_bytes_is_deterministic() {
        let note = Note {
            id: "n1".into(),
            body: "hello".into(),
            updated_at: 1000,
            replication_revision: "1-abc".into(),
            deleted: false,
        };
        assert_eq!(note.content_bytes(), note.clone().content_bytes());
        assert!(!note.content_bytes().is_empty());
    }

    #[test]
    fn content_bytes_changes_with_content() {
        let a = Note {
            id: "n1".into(),
            body: "hello".into(),
            updated_at: 1000,
            replication_revision: "1-abc".into(),
            deleted: false,
        };
        let mut b = a.clone();
        b.body = "goodbye".into();
        assert_ne!(a.content_bytes(), b.content_bytes());
    }
}
