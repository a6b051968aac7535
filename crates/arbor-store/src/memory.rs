//! In-process workspace store: one arena map per workspace.
//!
//! [`InMemoryWorkspace`] keeps every node in a `HashMap` keyed by
//! [`NodeId`]. Each node stores its ordered child identifiers, which are the
//! authoritative tree structure; the stored parent identifier is used only to
//! walk upwards. All state sits behind one `RwLock`, so writers to a
//! workspace are serialized.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use arbor_types::{NodeId, Path, Property, Segment};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::sns::{self, SegmentRename};
use crate::traits::{
    check_relocation, next_sibling, unchanged, Backend, Child, Inserted, Relocated, Removed,
    Renamed, WorkspaceStore,
};

#[derive(Debug, Clone)]
struct MapNode {
    /// `None` only for the root.
    segment: Option<Segment>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    properties: BTreeMap<String, Property>,
}

impl MapNode {
    fn new(segment: Option<Segment>, parent: Option<NodeId>) -> Self {
        Self {
            segment,
            parent,
            children: Vec::new(),
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct MapState {
    nodes: HashMap<NodeId, MapNode>,
    root: NodeId,
}

impl MapState {
    fn new(root: NodeId) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root, MapNode::new(None, None));
        Self { nodes, root }
    }

    fn node(&self, id: NodeId) -> StoreResult<&MapNode> {
        self.nodes.get(&id).ok_or(StoreError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> StoreResult<&mut MapNode> {
        self.nodes.get_mut(&id).ok_or(StoreError::NodeNotFound(id))
    }

    fn segment_of(&self, id: NodeId) -> StoreResult<Segment> {
        self.node(id)?
            .segment
            .clone()
            .ok_or_else(|| StoreError::Consistency(format!("non-root node {id} has no segment")))
    }

    fn child_segments(&self, parent: NodeId) -> StoreResult<Vec<Segment>> {
        self.node(parent)?
            .children
            .iter()
            .map(|c| self.segment_of(*c))
            .collect()
    }

    fn find_child(
        &self,
        parent: NodeId,
        segment: &Segment,
    ) -> StoreResult<Option<(usize, NodeId)>> {
        let segments = self.child_segments(parent)?;
        let children = &self.node(parent)?.children;
        Ok(sns::find(&segments, segment).map(|pos| (pos, children[pos])))
    }

    /// Walk `path` from the root; returns the matched depth and node.
    fn walk(&self, path: &Path) -> StoreResult<(usize, NodeId)> {
        let mut current = self.root;
        for (depth, segment) in path.iter().enumerate() {
            match self.find_child(current, segment)? {
                Some((_, child)) => current = child,
                None => return Ok((depth, current)),
            }
        }
        Ok((path.depth(), current))
    }

    fn path(&self, id: NodeId) -> StoreResult<Option<Path>> {
        let Some(mut node) = self.nodes.get(&id) else {
            return Ok(None);
        };
        let mut segments = Vec::new();
        while let Some(parent) = node.parent {
            let segment = node.segment.clone().ok_or_else(|| {
                StoreError::Consistency(format!("unnamed node under {parent}"))
            })?;
            segments.push(segment);
            node = self.node(parent)?;
        }
        segments.reverse();
        Ok(Some(Path::from_segments(segments)))
    }

    fn before_position(
        &self,
        parent: NodeId,
        before: Option<NodeId>,
    ) -> StoreResult<Option<usize>> {
        let Some(sibling) = before else {
            return Ok(None);
        };
        self.node(parent)?
            .children
            .iter()
            .position(|c| *c == sibling)
            .map(Some)
            .ok_or(StoreError::SiblingNotFound { parent, sibling })
    }

    fn apply_renames(
        &mut self,
        parent: NodeId,
        renames: Vec<SegmentRename>,
    ) -> StoreResult<Vec<Renamed>> {
        let children = self.node(parent)?.children.clone();
        renames
            .into_iter()
            .map(|r| {
                let id = children[r.position];
                self.node_mut(id)?.segment = Some(r.to.clone());
                Ok(Renamed {
                    id,
                    from: r.from,
                    to: r.to,
                })
            })
            .collect()
    }

    /// Link an arena node into `parent`'s child list under `name`.
    fn attach(
        &mut self,
        parent: NodeId,
        child: NodeId,
        name: &str,
        at: Option<usize>,
    ) -> StoreResult<Inserted> {
        let mut segments = self.child_segments(parent)?;
        let (position, renames) = sns::insert(&mut segments, name, at);
        let segment = segments[position].clone();

        self.node_mut(parent)?.children.insert(position, child);
        let node = self.node_mut(child)?;
        node.segment = Some(segment.clone());
        node.parent = Some(parent);

        let renamed = self.apply_renames(parent, renames)?;
        Ok(Inserted {
            id: child,
            segment,
            position,
            renamed,
        })
    }

    /// Unlink `child` from its parent's child list, leaving it in the arena.
    fn detach(&mut self, parent: NodeId, position: usize) -> StoreResult<(Segment, Vec<Renamed>)> {
        let mut segments = self.child_segments(parent)?;
        let (segment, renames) = sns::remove(&mut segments, position).ok_or_else(|| {
            StoreError::Consistency(format!(
                "child position {position} out of range under {parent}"
            ))
        })?;
        self.node_mut(parent)?.children.remove(position);
        let renamed = self.apply_renames(parent, renames)?;
        Ok((segment, renamed))
    }

    /// Drop a node and all its descendants from the arena.
    fn purge(&mut self, id: NodeId) -> usize {
        let mut stack = vec![id];
        let mut count = 0;
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                count += 1;
                stack.extend(node.children);
            }
        }
        count
    }
}

/// A workspace held entirely in process memory.
pub struct InMemoryWorkspace {
    name: String,
    root: NodeId,
    state: RwLock<MapState>,
}

impl InMemoryWorkspace {
    /// Create an empty workspace whose root has the given identifier.
    pub fn new(name: impl Into<String>, root: NodeId) -> Self {
        Self {
            name: name.into(),
            root,
            state: RwLock::new(MapState::new(root)),
        }
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.nodes.len()).unwrap_or(0)
    }

    /// A workspace always has its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, MapState>> {
        self.state.read().map_err(StoreError::poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, MapState>> {
        self.state.write().map_err(StoreError::poisoned)
    }
}

impl WorkspaceStore for InMemoryWorkspace {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> NodeId {
        self.root
    }

    fn find(&self, path: &Path) -> StoreResult<Option<NodeId>> {
        let state = self.read()?;
        let (depth, id) = state.walk(path)?;
        Ok((depth == path.depth()).then_some(id))
    }

    fn lowest_existing(&self, path: &Path) -> StoreResult<Path> {
        let state = self.read()?;
        let (depth, _) = state.walk(path)?;
        Ok(path.subpath(depth))
    }

    fn contains(&self, id: NodeId) -> StoreResult<bool> {
        Ok(self.read()?.nodes.contains_key(&id))
    }

    fn path_of(&self, id: NodeId) -> StoreResult<Option<Path>> {
        self.read()?.path(id)
    }

    fn parent_of(&self, id: NodeId) -> StoreResult<Option<NodeId>> {
        Ok(self.read()?.node(id)?.parent)
    }

    fn children(&self, id: NodeId) -> StoreResult<Vec<Child>> {
        let state = self.read()?;
        state
            .node(id)?
            .children
            .iter()
            .map(|c| {
                Ok(Child {
                    segment: state.segment_of(*c)?,
                    id: *c,
                })
            })
            .collect()
    }

    fn properties(&self, id: NodeId) -> StoreResult<BTreeMap<String, Property>> {
        Ok(self.read()?.node(id)?.properties.clone())
    }

    fn set_property(&self, id: NodeId, property: Property) -> StoreResult<()> {
        let mut state = self.write()?;
        let node = state.node_mut(id)?;
        node.properties.insert(property.name.clone(), property);
        Ok(())
    }

    fn remove_property(&self, id: NodeId, name: &str) -> StoreResult<bool> {
        let mut state = self.write()?;
        Ok(state.node_mut(id)?.properties.remove(name).is_some())
    }

    fn insert_child(
        &self,
        parent: NodeId,
        name: &str,
        id: Option<NodeId>,
        properties: Vec<Property>,
        before: Option<NodeId>,
    ) -> StoreResult<Inserted> {
        Segment::validate_name(name)?;
        let mut state = self.write()?;
        state.node(parent)?;
        let at = state.before_position(parent, before)?;
        let id = id.unwrap_or_default();
        if state.nodes.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }

        let mut node = MapNode::new(None, Some(parent));
        node.properties = properties.into_iter().map(|p| (p.name.clone(), p)).collect();
        state.nodes.insert(id, node);
        let inserted = state.attach(parent, id, name, at)?;

        debug!(
            workspace = %self.name,
            parent = %parent,
            segment = %inserted.segment,
            id = %id,
            renamed = inserted.renamed.len(),
            "created node"
        );
        Ok(inserted)
    }

    fn remove_child(&self, parent: NodeId, segment: &Segment) -> StoreResult<Removed> {
        let mut state = self.write()?;
        let (position, id) = state.find_child(parent, segment)?.ok_or_else(|| {
            StoreError::Consistency(format!("no child {segment} under {parent}"))
        })?;
        let (segment, renamed) = state.detach(parent, position)?;
        let count = state.purge(id);

        debug!(
            workspace = %self.name,
            parent = %parent,
            segment = %segment,
            removed = count,
            renamed = renamed.len(),
            "removed branch"
        );
        Ok(Removed {
            id,
            segment,
            count,
            renamed,
        })
    }

    fn clear(&self) -> StoreResult<()> {
        let mut state = self.write()?;
        let root = state.root;
        let children = std::mem::take(&mut state.node_mut(root)?.children);
        let removed: usize = children.into_iter().map(|c| state.purge(c)).sum();
        state.node_mut(root)?.properties.clear();
        debug!(workspace = %self.name, removed, "cleared workspace");
        Ok(())
    }

    /// Re-parents the node in place; descendants are not touched.
    fn relocate(
        &self,
        id: NodeId,
        new_parent: NodeId,
        new_name: Option<&str>,
        before: Option<NodeId>,
    ) -> StoreResult<Relocated> {
        if let Some(name) = new_name {
            Segment::validate_name(name)?;
        }
        let old_path = self.resolve_id(id)?;
        let parent = check_relocation(self, id, new_parent, before)?;
        if before == Some(id) && new_name.is_none() {
            return unchanged(self, id, parent, old_path);
        }
        let before = if before == Some(id) {
            next_sibling(self, parent, id)?
        } else {
            before
        };

        let mut state = self.write()?;
        let position = state
            .node(parent)?
            .children
            .iter()
            .position(|c| *c == id)
            .ok_or(StoreError::NodeNotFound(id))?;
        let (segment, source_renamed) = state.detach(parent, position)?;
        let name = new_name.unwrap_or(segment.name()).to_string();
        let at = state.before_position(new_parent, before)?;
        let inserted = state.attach(new_parent, id, &name, at)?;
        let new_path = state.path(id)?.ok_or(StoreError::NodeNotFound(id))?;

        debug!(
            workspace = %self.name,
            from = %old_path,
            to = %new_path,
            "moved branch"
        );
        Ok(Relocated {
            id,
            old_path,
            new_path,
            position: inserted.position,
            source_renamed,
            target_renamed: inserted.renamed,
            unchanged: false,
        })
    }
}

impl std::fmt::Debug for InMemoryWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryWorkspace")
            .field("name", &self.name)
            .field("node_count", &self.len())
            .finish()
    }
}

/// Backend that keeps every workspace in process memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryBackend;

impl InMemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for InMemoryBackend {
    type Store = InMemoryWorkspace;

    fn kind(&self) -> &str {
        "in-memory"
    }

    fn open_workspace(&self, name: &str, root: NodeId) -> StoreResult<InMemoryWorkspace> {
        debug!(workspace = name, root = %root, "opened in-memory workspace");
        Ok(InMemoryWorkspace::new(name, root))
    }

    fn destroy_workspace(&self, name: &str) -> StoreResult<()> {
        debug!(workspace = name, "dropped in-memory workspace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    fn workspace() -> InMemoryWorkspace {
        InMemoryWorkspace::new("default", NodeId::new())
    }

    // -----------------------------------------------------------------------
    // Shared tree semantics
    // -----------------------------------------------------------------------

    conformance::suite!(workspace);

    // -----------------------------------------------------------------------
    // Adapter specifics
    // -----------------------------------------------------------------------

    #[test]
    fn len_counts_root() {
        let ws = workspace();
        assert_eq!(ws.len(), 1);
        let root = ws.root();
        let a = ws.insert_child(root, "a", None, vec![], None).unwrap();
        ws.insert_child(a.id, "b", None, vec![], None).unwrap();
        assert_eq!(ws.len(), 3);

        ws.remove_child(root, &Segment::new("a")).unwrap();
        assert_eq!(ws.len(), 1);
    }

    #[test]
    fn native_move_keeps_descendants_in_place() {
        let ws = workspace();
        let root = ws.root();
        let a = ws.insert_child(root, "a", None, vec![], None).unwrap();
        let b = ws.insert_child(a.id, "b", None, vec![], None).unwrap();
        let c = ws.insert_child(b.id, "c", None, vec![], None).unwrap();
        let d = ws.insert_child(root, "d", None, vec![], None).unwrap();

        let before = ws.len();
        let moved = ws.relocate(b.id, d.id, None, None).unwrap();
        assert_eq!(moved.new_path.to_string(), "/d/b");
        assert_eq!(ws.len(), before);
        assert_eq!(ws.resolve_id(c.id).unwrap().to_string(), "/d/b/c");
    }

    #[test]
    fn backend_opens_independent_workspaces() {
        let backend = InMemoryBackend::new();
        let one = backend.open_workspace("one", NodeId::new()).unwrap();
        let two = backend.open_workspace("two", NodeId::new()).unwrap();
        one.insert_child(one.root(), "a", None, vec![], None).unwrap();
        assert_eq!(one.children(one.root()).unwrap().len(), 1);
        assert!(two.children(two.root()).unwrap().is_empty());
        assert_eq!(backend.kind(), "in-memory");
        backend.destroy_workspace("one").unwrap();
    }

    #[test]
    fn concurrent_inserts_keep_indices_dense() {
        use std::sync::Arc;
        use std::thread;

        let ws = Arc::new(workspace());
        let root = ws.root();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ws = Arc::clone(&ws);
                thread::spawn(move || {
                    for _ in 0..10 {
                        ws.insert_child(root, "b", None, vec![], None).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let segments: Vec<_> = ws.children(root).unwrap().into_iter().map(|c| c.segment).collect();
        assert_eq!(segments.len(), 80);
        assert!(sns::is_dense(&segments, "b"));
    }
}
