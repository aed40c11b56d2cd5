//! Bidirectional local/remote field mapping.
//!
//! Local documents use camelCase field names while the remote store uses
//! snake_case columns. The mapping between them is one fixed rename table,
//! total and invertible: every mapped local field has exactly one remote
//! counterpart and vice versa, validated at construction. Fields absent
//! from the table pass through unchanged in both directions.

use crate::{error::Result, Error};
use serde_json::Value;

/// An invertible rename table applied to JSON document objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    /// (local name, remote name) pairs.
    pairs: Vec<(String, String)>,
}

impl FieldMap {
    /// Build a map from (local, remote) pairs.
    ///
    /// Fails with [`Error::InvalidFieldMap`] when any local or remote name
    /// appears twice - a duplicate on either side would make the table
    /// non-invertible.
    pub fn new<L, R>(pairs: impl IntoIterator<Item = (L, R)>) -> Result<Self>
    where
        L: Into<String>,
        R: Into<String>,
    {
        let pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(l, r)| (l.into(), r.into()))
            .collect();

        for (i, (local, remote)) in pairs.iter().enumerate() {
            for (other_local, other_remote) in &pairs[i + 1..] {
                if local == other_local {
                    return Err(Error::InvalidFieldMap(format!(
                        "duplicate local field: {local}"
                    )));
                }
                if remote == other_remote {
                    return Err(Error::InvalidFieldMap(format!(
                        "duplicate remote field: {remote}"
                    )));
                }
            }
        }

        Ok(Self { pairs })
    }

    /// The rename table used for replicated documents: camelCase locally,
    /// snake_case on the remote, and the local `_deleted` tombstone flag
    /// stored as a plain `deleted` column.
    pub fn replication_default() -> Self {
        // The literals are distinct, so the duplicate check cannot fire.
        Self::new([
            ("updatedAt", "updated_at"),
            ("createdAt", "created_at"),
            ("replicationRevision", "replication_revision"),
            ("_deleted", "deleted"),
        ])
        .unwrap_or(Self { pairs: Vec::new() })
    }

    /// Rename local field names to remote column names.
    pub fn to_remote(&self, doc: Value) -> Value {
        self.rename(doc, |pair| (&pair.0, &pair.1))
    }

    /// Rename remote column names back to local field names.
    pub fn to_local(&self, doc: Value) -> Value {
        self.rename(doc, |pair| (&pair.1, &pair.0))
    }

    fn rename<'a>(
        &'a self,
        doc: Value,
        direction: impl Fn(&'a (String, String)) -> (&'a String, &'a String),
    ) -> Value {
        let Value::Object(fields) = doc else {
            return doc;
        };

        let renamed = fields
            .into_iter()
            .map(|(key, value)| {
                let mapped = self
                    .pairs
                    .iter()
                    .map(&direction)
                    .find(|(from, _)| **from == key)
                    .map(|(_, to)| to.clone())
                    .unwrap_or(key);
                (mapped, value)
            })
            .collect();

        Value::Object(renamed)
    }
}
