//! Node storage for the Arbor content store.
//!
//! A workspace is a tree of identity-bearing nodes. This crate defines the
//! contract every storage engine implements ([`WorkspaceStore`] per
//! workspace, [`Backend`] per engine) and two adapters:
//!
//! - [`InMemoryWorkspace`] -- an arena map per workspace, kept in process
//! - [`TreeCacheWorkspace`] -- a layer over a tree-structured key/value
//!   cache ([`TreeCache`]) that does not preserve child order by itself
//!
//! # Design Rules
//!
//! 1. A node's child list is authoritative; the parent link is for navigation.
//! 2. Same-name siblings carry dense indices `1..=n`; a sole sibling has none.
//! 3. The identifier index holds exactly the nodes reachable from the root.
//! 4. Every operation is synchronous and returns a typed error on failure.
//! 5. Multi-node operations (branch insertion, moves) are not transactional.

pub mod error;
pub mod memory;
pub mod sns;
pub mod traits;
pub mod tree_cache;
pub mod tree_store;

#[cfg(test)]
mod conformance;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryBackend, InMemoryWorkspace};
pub use sns::SiblingLocks;
pub use traits::{
    Backend, Branch, BranchInserted, Child, IdPolicy, Inserted, Relocated, Removed, Renamed,
    WorkspaceStore,
};
pub use tree_cache::{Attribute, SegmentKey, TreeCache};
pub use tree_store::{TreeCacheBackend, TreeCacheWorkspace, CHILD_SEGMENTS};
