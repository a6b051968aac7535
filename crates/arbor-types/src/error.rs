use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid segment {input:?}: {reason}")]
    InvalidSegment { input: String, reason: String },

    #[error("invalid path {input:?}: {reason}")]
    InvalidPath { input: String, reason: String },

    #[error("invalid node identifier: {0}")]
    InvalidNodeId(String),

    #[error("cannot convert {input:?} to {expected}")]
    InvalidValue { input: String, expected: String },
}
