use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;
use crate::property::PropertyValue;

/// Identity of a node within a workspace.
///
/// Node identifiers are random (v4) UUIDs. They stay with a node for its
/// whole life, across renames, same-name-sibling renumbering and moves;
/// copies receive fresh ones.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }

    /// Interpret a property value as a node identifier.
    ///
    /// Accepts UUID and reference values directly, and strings holding a
    /// UUID in any of its textual forms.
    pub fn from_value(value: &PropertyValue) -> Result<Self, TypeError> {
        match value {
            PropertyValue::Uuid(uuid) => Ok(Self(*uuid)),
            PropertyValue::Reference(id) => Ok(*id),
            PropertyValue::String(s) | PropertyValue::Name(s) => s.parse(),
            other => Err(TypeError::InvalidValue {
                input: other.to_string(),
                expected: "node identifier".into(),
            }),
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for NodeId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| TypeError::InvalidNodeId(format!("{s:?}: {e}")))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short_id())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the property that carries a node's identifier.
pub const IDENTITY_PROPERTY: &str = "arbor:uuid";

/// Alias accepted on input for content imported from JCR-style sources.
pub const JCR_IDENTITY_PROPERTY: &str = "jcr:uuid";

/// Decides which property names hold a node's identity.
///
/// Request processing never stores identity properties as ordinary
/// properties: a supplied identity value becomes the node's [`NodeId`], and
/// reads report the identifier under [`identity_property`].
///
/// [`identity_property`]: IdentityResolver::identity_property
pub trait IdentityResolver: Send + Sync {
    /// The canonical name under which identifiers are reported.
    fn identity_property(&self) -> &str;

    /// Whether `name` designates the identity of a node.
    fn is_identity(&self, name: &str) -> bool {
        name == self.identity_property()
    }
}

/// The default resolver: `arbor:uuid`, with `jcr:uuid` accepted as an alias.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardIdentity;

impl IdentityResolver for StandardIdentity {
    fn identity_property(&self) -> &str {
        IDENTITY_PROPERTY
    }

    fn is_identity(&self, name: &str) -> bool {
        name == IDENTITY_PROPERTY || name == JCR_IDENTITY_PROPERTY
    }
}
