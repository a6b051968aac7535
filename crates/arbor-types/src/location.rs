use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::NodeId;
use crate::path::Path;

/// The address of a node: a path, an identifier, or both.
///
/// Requests may address nodes either way. Every location reported back by
/// request processing is *resolved*, carrying both the actual path and the
/// identifier of the node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: Option<Path>,
    pub id: Option<NodeId>,
}

impl Location {
    /// A fully resolved location.
    pub fn new(path: Path, id: NodeId) -> Self {
        Self {
            path: Some(path),
            id: Some(id),
        }
    }

    pub fn at_path(path: Path) -> Self {
        Self {
            path: Some(path),
            id: None,
        }
    }

    pub fn with_id(id: NodeId) -> Self {
        Self {
            path: None,
            id: Some(id),
        }
    }

    /// The root location (no identifier attached).
    pub fn root() -> Self {
        Self::at_path(Path::root())
    }

    /// A copy of this location addressing `path` instead.
    pub fn with_path(&self, path: Path) -> Self {
        Self {
            path: Some(path),
            id: self.id,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn is_resolved(&self) -> bool {
        self.path.is_some() && self.id.is_some()
    }

    pub fn has_path(&self) -> bool {
        self.path.is_some()
    }
}

impl From<Path> for Location {
    fn from(path: Path) -> Self {
        Self::at_path(path)
    }
}

impl From<NodeId> for Location {
    fn from(id: NodeId) -> Self {
        Self::with_id(id)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, &self.id) {
            (Some(path), Some(id)) => write!(f, "{path} ({})", id.short_id()),
            (Some(path), None) => write!(f, "{path}"),
            (None, Some(id)) => write!(f, "<{id}>"),
            (None, None) => f.write_str("<unaddressed>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors() {
        let id = NodeId::new();
        let path: Path = "/a/b".parse().unwrap();

        let loc = Location::new(path.clone(), id);
        assert!(loc.is_resolved());
        assert_eq!(loc.path(), Some(&path));
        assert_eq!(loc.id(), Some(id));

        assert!(!Location::at_path(path.clone()).is_resolved());
        assert!(!Location::with_id(id).has_path());
    }

    #[test]
    fn with_path_keeps_id() {
        let id = NodeId::new();
        let loc = Location::new("/a".parse().unwrap(), id);
        let moved = loc.with_path("/b".parse().unwrap());
        assert_eq!(moved.id, Some(id));
        assert_eq!(moved.path.unwrap().to_string(), "/b");
    }

    #[test]
    fn display_forms() {
        let path: Path = "/a".parse().unwrap();
        assert_eq!(Location::at_path(path).to_string(), "/a");
        assert_eq!(Location::default().to_string(), "<unaddressed>");
    }
}
