//! Conflict resolution between a local and a remote document version.
//!
//! This is the only place a replication conflict is decided, and it is the
//! core of convergence: both endpoints of a replication pair run the same
//! pure function over the same pair of documents and must reach the same
//! verdict, no matter which side they call "local".
//!
//! # Algorithm
//!
//! 1. Parse both revisions; unparsable markers count as height 0.
//! 2. The higher revision height wins outright.
//! 3. Equal heights: the later `updated_at` wins.
//! 4. Exact tie: the lexicographically greater revision digest wins. The
//!    digest is node-salted, so concurrent writers differ here; equal
//!    digests mean the two sides hold the same stamp, and the remote copy
//!    is kept.
//!
//! The winner is always one whole document - versions are never merged
//! field by field.

use crate::{Replicated, Revision};
use serde::{Deserialize, Serialize};

/// Which side of a conflict won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Winner {
    Local,
    Remote,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<D> {
    /// Which side won.
    pub winner: Winner,
    /// The winning document, whole.
    pub document: D,
}

/// Resolve a conflict between a local and a remote version of one document.
///
/// Pure and deterministic: no side effects, no wall clocks, and symmetric -
/// swapping the argument roles on the other endpoint selects the same
/// logical winner.
pub fn resolve<D: Replicated>(local: &D, remote: &D) -> Resolution<D> {
    let winner = decide(local, remote);
    let document = match winner {
        Winner::Local => local.clone(),
        Winner::Remote => remote.clone(),
    };
    Resolution { winner, document }
}

fn decide<D: Replicated>(local: &D, remote: &D) -> Winner {
    let local_height = Revision::height_or_restart(Some(local.revision()));
    let remote_height = Revision::height_or_restart(Some(remote.revision()));

    if local_height != remote_height {
        return if local_height > remote_height {
            Winner::Local
        } else {
            Winner::Remote
        };
    }

    if local.updated_at() != remote.updated_at() {
        return if local.updated_at() > remote.updated_at() {
            Winner::Local
        } else {
            Winner::Remote
        };
    }

    // Exact tie: digests keep the verdict identical on both endpoints.
    let local_digest = Revision::digest_or_empty(local.revision());
    let remote_digest = Revision::digest_or_empty(remote.revision());
    if local_digest > remote_digest {
        Winner::Local
    } else {
        Winner::Remote
    }
}
