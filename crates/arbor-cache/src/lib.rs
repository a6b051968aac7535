//! Location cache for the Arbor content store.
//!
//! An optional read-through layer in front of a workspace store. It keeps
//! resolved path-to-identifier facts and ordered child lists, and applies
//! the same renumbering the store applies so that a cached answer never
//! differs from a fresh read.
//!
//! # Key Types
//!
//! - [`LocationCache`] -- The path and child-list cache
//! - [`CachePolicy`] -- How long callers may cache read results

pub mod cache;
pub mod error;
pub mod policy;

pub use cache::LocationCache;
pub use error::{CacheError, CacheResult};
pub use policy::CachePolicy;
