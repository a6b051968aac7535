use arbor_types::{NodeId, Path, TypeError};

/// Errors from node store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A path does not resolve. Carries the closest ancestor that does.
    #[error("no node at {path} (lowest existing ancestor: {lowest_existing})")]
    PathNotFound { path: Path, lowest_existing: Path },

    /// No node with this identifier exists in the workspace.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A node with this identifier already exists in the workspace.
    #[error("duplicate node identifier: {0}")]
    DuplicateId(NodeId),

    /// The requested "before" node is not a child of the given parent.
    #[error("node {sibling} is not a child of {parent}")]
    SiblingNotFound { parent: NodeId, sibling: NodeId },

    /// The move would detach the root or create a cycle.
    #[error("cannot move node {id}: {reason}")]
    InvalidMove { id: NodeId, reason: String },

    /// A branch cannot be inserted as given.
    #[error("invalid branch: {0}")]
    InvalidBranch(String),

    /// The property name is reserved by the backend.
    #[error("property name is reserved: {0}")]
    ReservedProperty(String),

    /// A name or value failed validation.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Internal bookkeeping disagrees with the tree.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// A lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    pub(crate) fn poisoned(e: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
