//! # Ferry Engine
//!
//! The deterministic core of the Ferry replication engine.
//!
//! This crate holds the pure logic of offline-first replication between a
//! local, always-writable document store and a remote authoritative store:
//! revision markers, conflict resolution, checkpoints, mutation hooks, and
//! the local/remote field mapping. The async pipelines that move documents
//! over the wire live in the `ferry-sync` crate.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Revisions
//!
//! Every replicated document carries a revision marker of the form
//! `"<height>-<digest>"`. The height increases with each local mutation and
//! is the primary ordering signal between conflicting writes; the digest is
//! a content hash salted with the writing node's identity, used as a
//! deterministic tiebreak. See [`Revision`].
//!
//! ### Conflict Resolution
//!
//! [`resolve`] picks exactly one winner between a local and a remote version
//! of the same document. Higher revision height wins; equal heights fall back
//! to the later `updated_at`; exact ties are broken by comparing digests, so
//! both endpoints of a replication pair reach the same verdict no matter
//! which side they call "local".
//!
//! ### Mutation Hooks
//!
//! [`RevisionHooks`] stamps revisions onto documents before the local store
//! commits them: inserts start at height 1, updates and deletes bump the
//! height, deletes additionally set the tombstone flag so the deletion can
//! replicate like any other change. Hooks never fail - a corrupt revision
//! restarts numbering instead of blocking the write.
//!
//! ### Checkpoints
//!
//! A [`Checkpoint`] is a cursor into the remote change ordering, derived
//! from the last document of a pulled batch and persisted after the batch
//! has been applied locally.
//!
//! ### Field Mapping
//!
//! [`FieldMap`] is the explicit, invertible rename table between local field
//! names (camelCase) and remote column names (snake_case).

pub mod checkpoint;
pub mod conflict;
pub mod document;
pub mod error;
pub mod hooks;
pub mod mapping;
pub mod revision;

// Re-export main types at crate root
pub use checkpoint::Checkpoint;
pub use conflict::{resolve, Resolution, Winner};
pub use document::Replicated;
pub use error::Error;
pub use hooks::RevisionHooks;
pub use mapping::FieldMap;
pub use revision::{HeightOrder, Revision};

/// Type aliases for clarity
pub type DocumentId = String;
pub type NodeId = String;
pub type Height = u64;
pub type Timestamp = u64;
