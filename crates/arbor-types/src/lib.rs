//! Foundation types for the Arbor hierarchical content store.
//!
//! Every other Arbor crate depends on `arbor-types`.
//!
//! # Key Types
//!
//! - [`Segment`] -- A name plus an optional same-name-sibling index
//! - [`Path`] -- Absolute path from the workspace root
//! - [`NodeId`] -- Stable random identifier of a node
//! - [`Location`] -- Address of a node by path, identifier, or both
//! - [`Property`] / [`PropertyValue`] -- Named, typed node data
//! - [`ValueFactory`] -- Builds typed values from text
//! - [`IdentityResolver`] -- Decides which property names carry identity

pub mod error;
pub mod identity;
pub mod location;
pub mod path;
pub mod property;

pub use error::TypeError;
pub use identity::{
    IdentityResolver, NodeId, StandardIdentity, IDENTITY_PROPERTY, JCR_IDENTITY_PROPERTY,
};
pub use location::Location;
pub use path::{Path, Segment};
pub use property::{Property, PropertyType, PropertyValue, ValueFactory};
