//! Revision markers for optimistic concurrency.
//!
//! A revision is encoded as `"<height>-<digest>"`. The height is a
//! non-negative integer that strictly increases with each stamped mutation
//! of a document; the digest is a content hash salted with the writing
//! node's identity. Heights order causally-later writes; equal heights mean
//! two actors mutated from the same base concurrently, and the digest is
//! what keeps the eventual tiebreak deterministic on both endpoints.

use crate::{error::Result, Error, Height};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the content digest.
const DIGEST_LEN: usize = 16;

/// A parsed revision marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Monotonic mutation counter, starting at 1 for the first stamp.
    pub height: Height,
    /// Node-salted content digest, used as a deterministic tiebreak.
    pub digest: String,
}

/// Outcome of comparing two revisions by height alone.
///
/// Equal heights are not resolved here - that is the conflict resolver's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightOrder {
    ANewer,
    BNewer,
    EqualHeight,
}

impl Revision {
    /// Parse a `"<height>-<digest>"` string.
    ///
    /// Fails with [`Error::MalformedRevision`] when the string does not have
    /// a decimal height, a separating dash, and a non-empty digest.
    pub fn parse(encoded: &str) -> Result<Self> {
        let malformed = || Error::MalformedRevision(encoded.to_string());

        let (height_str, digest) = encoded.split_once('-').ok_or_else(malformed)?;
        if height_str.is_empty()
            || digest.is_empty()
            || !height_str.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }
        let height = height_str.parse::<Height>().map_err(|_| malformed())?;

        Ok(Self {
            height,
            digest: digest.to_string(),
        })
    }

    /// Height of an optional encoded revision, restarting at 0 when the
    /// revision is absent or unparsable.
    ///
    /// Pipelines must never abort on a corrupt revision marker; the caller
    /// logs the restart and the next stamp begins numbering again from 1.
    pub fn height_or_restart(encoded: Option<&str>) -> Height {
        match encoded {
            None | Some("") => 0,
            Some(s) => Self::parse(s).map(|rev| rev.height).unwrap_or(0),
        }
    }

    /// Digest of an encoded revision, empty when unparsable.
    pub fn digest_or_empty(encoded: &str) -> String {
        Self::parse(encoded)
            .map(|rev| rev.digest)
            .unwrap_or_default()
    }

    /// Stamp the next revision after `previous` for the given document
    /// content, written by `node_id`.
    ///
    /// The digest covers content and node identity, so two nodes writing
    /// identical content from the same base produce distinct revisions,
    /// while the same node double-stamping the same content reproduces the
    /// same marker.
    pub fn stamp(previous: Option<&str>, content: &[u8], node_id: &str) -> Self {
        let height = Self::height_or_restart(previous) + 1;

        let mut hasher = Sha256::new();
        hasher.update(content);
        hasher.update(node_id.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(DIGEST_LEN);

        Self { height, digest }
    }

    /// Compare two encoded revisions by height only.
    ///
    /// Unparsable input counts as height 0.
    pub fn compare_heights(a: &str, b: &str) -> HeightOrder {
        let ha = Self::height_or_restart(Some(a));
        let hb = Self::height_or_restart(Some(b));
        match ha.cmp(&hb) {
            std::cmp::Ordering::Greater => HeightOrder::ANewer,
            std::cmp::Ordering::Less => HeightOrder::BNewer,
            std::cmp::Ordering::Equal => HeightOrder::EqualHeight,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.height, self.digest)
    }
}
