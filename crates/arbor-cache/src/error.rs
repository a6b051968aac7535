//! Error types for the location cache.

use arbor_types::Path;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A location without a path cannot be cached.
    #[error("location has no path")]
    Unaddressed,

    /// A cached child list disagrees with the position being written.
    #[error("cached children of {parent} have {len} entries, cannot insert at {position}")]
    PositionOutOfRange {
        parent: Path,
        position: usize,
        len: usize,
    },

    /// The cache lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;
