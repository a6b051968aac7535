//! Request processing for the Arbor content store.
//!
//! Clients build typed requests ([`CreateNode`], [`ReadNode`],
//! [`MoveBranch`], ...) and hand them to a [`Repository`], usually through
//! a [`SourceRegistry`]. The [`RequestProcessor`] runs each request against
//! the workspace's store, keeps the workspace's location cache in step and
//! records either the actual locations or an error on the request.
//!
//! ```text
//! SourceRegistry ──► Repository<B: Backend> ──► RequestProcessor
//!                          │                          │
//!                          ▼                          ▼
//!                   Workspace { store, cache } ◄── resolve / mutate
//! ```

pub mod config;
pub mod error;
pub mod processor;
pub mod registry;
pub mod repository;
pub mod request;

pub use config::RepositoryConfig;
pub use error::{ConfigError, RequestError, RequestResult};
pub use processor::RequestProcessor;
pub use registry::{RepositorySource, SourceRegistry};
pub use repository::{Repository, Workspace};
pub use request::{
    CloneBranch, CloneConflictBehavior, CloneWorkspace, Composite, CopyBranch,
    CreateConflictBehavior, CreateNode, CreateWorkspace, DeleteBranch, DestroyWorkspace,
    GetWorkspaces, MoveBranch, NodeConflictBehavior, Outcome, ReadAllChildren, ReadAllProperties,
    ReadNode, Request, RequestState, UpdateProperties, VerifyWorkspace,
};

// Re-export the types requests are built from.
pub use arbor_cache::CachePolicy;
pub use arbor_store::{Backend, InMemoryBackend, TreeCacheBackend, WorkspaceStore};
pub use arbor_types::{Location, NodeId, Path, Property, PropertyValue, Segment};
