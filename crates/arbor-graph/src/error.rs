use arbor_store::StoreError;
use arbor_types::{Location, NodeId, Path, TypeError};

/// Errors attached to requests by the processor.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The addressed node does not exist.
    ///
    /// `lowest_existing` is the deepest ancestor of the requested path that
    /// does exist; for identifier-only lookups it is the root.
    #[error("node does not exist: {location} (lowest existing: {lowest_existing})")]
    NotFound {
        location: Location,
        lowest_existing: Path,
    },

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidArgument(String),

    /// A clone would reuse an identifier already present in the target
    /// workspace.
    #[error("node {id} already exists at {path} in workspace {workspace}")]
    IdentifierExists {
        id: NodeId,
        path: Path,
        workspace: String,
    },

    #[error("workspace already exists: {0}")]
    WorkspaceAlreadyExists(String),

    #[error("workspace does not exist: {0}")]
    WorkspaceDoesNotExist(String),

    /// The source does not accept updates.
    #[error("source {0} is read-only")]
    ReadOnly(String),

    /// The store found its own bookkeeping inconsistent.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Some requests of a batch failed; each carries its own error.
    #[error("{failed} of {total} batched requests failed")]
    BatchFailed { failed: usize, total: usize },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RequestError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PathNotFound {
                path,
                lowest_existing,
            } => Self::NotFound {
                location: Location::at_path(path),
                lowest_existing,
            },
            StoreError::NodeNotFound(id) => Self::NotFound {
                location: Location::with_id(id),
                lowest_existing: Path::root(),
            },
            StoreError::Consistency(msg) => Self::ConsistencyViolation(msg),
            StoreError::Type(e) => Self::InvalidArgument(e.to_string()),
            rejected @ (StoreError::InvalidMove { .. }
            | StoreError::SiblingNotFound { .. }
            | StoreError::ReservedProperty(_)
            | StoreError::DuplicateId(_)) => Self::InvalidArgument(rejected.to_string()),
            other => Self::Store(other),
        }
    }
}

impl From<TypeError> for RequestError {
    fn from(e: TypeError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

/// Result alias for request handling.
pub type RequestResult<T> = Result<T, RequestError>;

/// Errors loading a [`RepositoryConfig`](crate::RepositoryConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::NodeId;

    #[test]
    fn path_not_found_keeps_lowest_ancestor() {
        let err: RequestError = StoreError::PathNotFound {
            path: "/a/x/y".parse().unwrap(),
            lowest_existing: "/a".parse().unwrap(),
        }
        .into();
        match err {
            RequestError::NotFound {
                location,
                lowest_existing,
            } => {
                assert_eq!(location.path().unwrap().to_string(), "/a/x/y");
                assert_eq!(lowest_existing.to_string(), "/a");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_id_reports_root() {
        let id = NodeId::new();
        let err: RequestError = StoreError::NodeNotFound(id).into();
        match err {
            RequestError::NotFound {
                location,
                lowest_existing,
            } => {
                assert_eq!(location.id(), Some(id));
                assert!(lowest_existing.is_root());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn consistency_and_lock_errors() {
        let err: RequestError = StoreError::Consistency("dangling child".into()).into();
        assert!(matches!(err, RequestError::ConsistencyViolation(_)));
        let err: RequestError = StoreError::LockPoisoned("nodes".into()).into();
        assert!(matches!(err, RequestError::Store(StoreError::LockPoisoned(_))));
    }

    #[test]
    fn display() {
        let err = RequestError::ReadOnly("source-a".into());
        assert_eq!(err.to_string(), "source source-a is read-only");
    }
}
