//! Pre-commit mutation hooks.
//!
//! The local store installs these at its three interception points so that
//! every local mutation carries a fresh revision marker before it is
//! committed, and deletions become tombstones that can replicate. Hooks are
//! infallible by contract: a corrupt previous revision restarts height
//! numbering instead of blocking the write.

use crate::{NodeId, Replicated, Revision};

/// Stamps revision markers onto documents before the local store commits
/// them.
#[derive(Debug, Clone)]
pub struct RevisionHooks {
    node_id: NodeId,
}

impl RevisionHooks {
    /// Create hooks for the given node identity. The identity salts every
    /// digest this instance produces.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }

    /// The node identity these hooks stamp with.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Pre-insert: stamp an initial revision at height 1 unless the document
    /// already carries one (a pulled remote document keeps its marker).
    pub fn pre_insert<D: Replicated>(&self, doc: &mut D) {
        if doc.revision().is_empty() {
            let rev = Revision::stamp(None, &doc.content_bytes(), &self.node_id);
            doc.set_revision(rev.to_string());
        }
    }

    /// Pre-save: always bump the revision height, regardless of which fields
    /// changed.
    pub fn pre_save<D: Replicated>(&self, doc: &mut D) {
        self.restamp(doc);
    }

    /// Pre-remove: mark the tombstone and bump the revision, so the deletion
    /// propagates through pull/push like any other change.
    pub fn pre_remove<D: Replicated>(&self, doc: &mut D) {
        doc.set_deleted(true);
        self.restamp(doc);
    }

    fn restamp<D: Replicated>(&self, doc: &mut D) {
        let previous = match doc.revision() {
            "" => None,
            rev => Some(rev.to_string()),
        };
        let rev = Revision::stamp(previous.as_deref(), &doc.content_bytes(), &self.node_id);
        doc.set_revision(rev.to_string());
    }
}
