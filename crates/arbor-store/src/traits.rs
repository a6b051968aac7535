use std::collections::{BTreeMap, HashMap};

use arbor_types::{Location, NodeId, Path, Property, Segment};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// A child entry: its segment under the parent and its identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Child {
    pub segment: Segment,
    pub id: NodeId,
}

/// A sibling whose segment was rewritten by same-name-sibling maintenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Renamed {
    pub id: NodeId,
    pub from: Segment,
    pub to: Segment,
}

/// Outcome of inserting a child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inserted {
    pub id: NodeId,
    /// The segment the new child ended up with.
    pub segment: Segment,
    /// Position among all of the parent's children.
    pub position: usize,
    /// Pre-existing siblings renamed by the insertion.
    pub renamed: Vec<Renamed>,
}

/// Outcome of removing a child branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Removed {
    pub id: NodeId,
    pub segment: Segment,
    /// Number of nodes removed, including the branch root.
    pub count: usize,
    /// Remaining siblings renamed by the removal.
    pub renamed: Vec<Renamed>,
}

/// Outcome of moving a branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relocated {
    pub id: NodeId,
    pub old_path: Path,
    pub new_path: Path,
    /// Position among the new parent's children.
    pub position: usize,
    /// Siblings renamed at the old parent.
    pub source_renamed: Vec<Renamed>,
    /// Siblings renamed at the new parent.
    pub target_renamed: Vec<Renamed>,
    /// The node was asked to move before itself; nothing changed.
    pub unchanged: bool,
}

/// Outcome of inserting a whole branch.
#[derive(Clone, Debug)]
pub struct BranchInserted {
    pub inserted: Inserted,
    /// Source identifier to inserted identifier, for every node in the branch.
    pub id_map: HashMap<NodeId, NodeId>,
}

impl BranchInserted {
    /// Number of nodes inserted.
    pub fn count(&self) -> usize {
        self.id_map.len()
    }
}

/// A detached, in-memory copy of a node and its descendants.
#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    /// `None` for a workspace root.
    pub segment: Option<Segment>,
    pub id: NodeId,
    pub properties: Vec<Property>,
    pub children: Vec<Branch>,
}

impl Branch {
    /// Number of nodes in the branch.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(Branch::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every identifier in the branch, each node before its descendants.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.len());
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, out: &mut Vec<NodeId>) {
        out.push(self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

/// How identifiers are assigned when a branch is inserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdPolicy {
    /// Keep the branch's identifiers. Used for moves and workspace clones.
    Preserve,
    /// Assign fresh identifiers and remap references inside the branch.
    Regenerate,
}

/// Authoritative tree storage for one workspace.
///
/// Every operation is synchronous and either completes or returns a typed
/// error. Implementations must keep these invariants after every call:
/// - exactly one root, every other node has exactly one parent;
/// - siblings sharing a name carry dense indices `1..=n`, and no index
///   when `n == 1`;
/// - the identifier index holds exactly the nodes reachable from the root.
///
/// Identity and backend-reserved attributes are never part of
/// [`properties`](WorkspaceStore::properties).
pub trait WorkspaceStore: Send + Sync {
    /// Workspace name.
    fn name(&self) -> &str;

    /// Identifier of the root node.
    fn root(&self) -> NodeId;

    /// Resolve a path, honouring the `name[1]` addressing rule.
    fn find(&self, path: &Path) -> StoreResult<Option<NodeId>>;

    /// The deepest existing prefix of `path` (the path itself if it exists).
    fn lowest_existing(&self, path: &Path) -> StoreResult<Path>;

    fn contains(&self, id: NodeId) -> StoreResult<bool>;

    /// Current path of a node, or `None` if it does not exist.
    fn path_of(&self, id: NodeId) -> StoreResult<Option<Path>>;

    /// Parent of a node; `None` for the root.
    fn parent_of(&self, id: NodeId) -> StoreResult<Option<NodeId>>;

    /// Children in stored order.
    fn children(&self, id: NodeId) -> StoreResult<Vec<Child>>;

    fn properties(&self, id: NodeId) -> StoreResult<BTreeMap<String, Property>>;

    /// Set (replace) one property.
    fn set_property(&self, id: NodeId, property: Property) -> StoreResult<()>;

    /// Remove one property. Returns whether it existed.
    fn remove_property(&self, id: NodeId, name: &str) -> StoreResult<bool>;

    /// Create a child named `name` under `parent`.
    ///
    /// The child gets `id` if given (which must not exist yet) or a fresh
    /// identifier. It is placed before `before` if given, otherwise last.
    /// Same-name-sibling indices are recomputed for `name`.
    fn insert_child(
        &self,
        parent: NodeId,
        name: &str,
        id: Option<NodeId>,
        properties: Vec<Property>,
        before: Option<NodeId>,
    ) -> StoreResult<Inserted>;

    /// Remove the child addressed by `segment` and all of its descendants.
    fn remove_child(&self, parent: NodeId, segment: &Segment) -> StoreResult<Removed>;

    /// Remove all children and properties of the root.
    fn clear(&self) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Provided operations
    // ------------------------------------------------------------------

    /// Resolve a path or report the lowest existing ancestor.
    fn resolve(&self, path: &Path) -> StoreResult<NodeId> {
        match self.find(path)? {
            Some(id) => Ok(id),
            None => Err(StoreError::PathNotFound {
                path: path.clone(),
                lowest_existing: self.lowest_existing(path)?,
            }),
        }
    }

    /// Current path of an existing node.
    fn resolve_id(&self, id: NodeId) -> StoreResult<Path> {
        self.path_of(id)?.ok_or(StoreError::NodeNotFound(id))
    }

    fn location_of(&self, id: NodeId) -> StoreResult<Location> {
        Ok(Location::new(self.resolve_id(id)?, id))
    }

    /// Copy a node and its descendants out of the store.
    fn snapshot(&self, id: NodeId) -> StoreResult<Branch> {
        let path = self.resolve_id(id)?;
        let properties = self.properties(id)?.into_values().collect();
        let children = self
            .children(id)?
            .into_iter()
            .map(|child| self.snapshot(child.id))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Branch {
            segment: path.last_segment().cloned(),
            id,
            properties,
            children,
        })
    }

    /// Insert a branch under `parent`, named `name` or after the branch root.
    ///
    /// With [`IdPolicy::Regenerate`] every node gets a fresh identifier and
    /// reference values pointing inside the branch are rewritten to the new
    /// identifiers. Insertion is not transactional: a failure part way
    /// through leaves the nodes inserted so far in place.
    fn insert_branch(
        &self,
        parent: NodeId,
        branch: &Branch,
        name: Option<&str>,
        policy: IdPolicy,
        before: Option<NodeId>,
    ) -> StoreResult<BranchInserted> {
        let name = match (name, &branch.segment) {
            (Some(name), _) => name.to_string(),
            (None, Some(segment)) => segment.name().to_string(),
            (None, None) => {
                return Err(StoreError::InvalidBranch(
                    "a workspace root needs a name to be inserted".into(),
                ))
            }
        };

        let id_map: HashMap<NodeId, NodeId> = branch
            .ids()
            .into_iter()
            .map(|old| match policy {
                IdPolicy::Preserve => (old, old),
                IdPolicy::Regenerate => (old, NodeId::new()),
            })
            .collect();

        let inserted = insert_mapped(self, parent, branch, &name, &id_map, policy, before)?;
        debug!(
            workspace = self.name(),
            parent = %parent,
            name = %name,
            nodes = id_map.len(),
            ?policy,
            "inserted branch"
        );
        Ok(BranchInserted { inserted, id_map })
    }

    /// Move a branch under `new_parent`, keeping every identifier.
    ///
    /// The branch is removed from its old parent and re-inserted at the
    /// destination. Adapters with native re-parenting override this.
    fn relocate(
        &self,
        id: NodeId,
        new_parent: NodeId,
        new_name: Option<&str>,
        before: Option<NodeId>,
    ) -> StoreResult<Relocated> {
        let old_path = self.resolve_id(id)?;
        let parent = check_relocation(self, id, new_parent, before)?;
        if before == Some(id) && new_name.is_none() {
            return unchanged(self, id, parent, old_path);
        }

        let branch = self.snapshot(id)?;
        let segment = old_path
            .last_segment()
            .cloned()
            .ok_or_else(|| StoreError::Consistency(format!("non-root node {id} has no segment")))?;
        let name = new_name.map(str::to_string).unwrap_or_else(|| segment.name().to_string());
        // Renaming in place keeps the node's position.
        let before = if before == Some(id) {
            next_sibling(self, parent, id)?
        } else {
            before
        };

        let removed = self.remove_child(parent, &segment)?;
        let placed =
            self.insert_branch(new_parent, &branch, Some(&name), IdPolicy::Preserve, before)?;
        let new_path = self.resolve_id(id)?;
        debug!(
            workspace = self.name(),
            from = %old_path,
            to = %new_path,
            "relocated branch"
        );
        Ok(Relocated {
            id,
            old_path,
            new_path,
            position: placed.inserted.position,
            source_renamed: removed.renamed,
            target_renamed: placed.inserted.renamed,
            unchanged: false,
        })
    }
}

fn insert_mapped<S: WorkspaceStore + ?Sized>(
    store: &S,
    parent: NodeId,
    branch: &Branch,
    name: &str,
    id_map: &HashMap<NodeId, NodeId>,
    policy: IdPolicy,
    before: Option<NodeId>,
) -> StoreResult<Inserted> {
    let mut properties = branch.properties.clone();
    if policy == IdPolicy::Regenerate {
        for property in &mut properties {
            property.remap_references(id_map);
        }
    }
    let id = id_map.get(&branch.id).copied();
    let inserted = store.insert_child(parent, name, id, properties, before)?;
    for child in &branch.children {
        let child_name = child
            .segment
            .as_ref()
            .map(|s| s.name().to_string())
            .ok_or_else(|| StoreError::InvalidBranch("child without a segment".into()))?;
        insert_mapped(store, inserted.id, child, &child_name, id_map, policy, None)?;
    }
    Ok(inserted)
}

/// Validate a move and return the node's current parent.
pub(crate) fn check_relocation<S: WorkspaceStore + ?Sized>(
    store: &S,
    id: NodeId,
    new_parent: NodeId,
    before: Option<NodeId>,
) -> StoreResult<NodeId> {
    if id == store.root() {
        return Err(StoreError::InvalidMove {
            id,
            reason: "the root cannot be moved".into(),
        });
    }
    let parent = store.parent_of(id)?.ok_or(StoreError::NodeNotFound(id))?;
    if !store.contains(new_parent)? {
        return Err(StoreError::NodeNotFound(new_parent));
    }

    let mut cursor = Some(new_parent);
    while let Some(ancestor) = cursor {
        if ancestor == id {
            return Err(StoreError::InvalidMove {
                id,
                reason: "destination is inside the moved branch".into(),
            });
        }
        cursor = store.parent_of(ancestor)?;
    }

    if let Some(sibling) = before {
        if store.parent_of(sibling)? != Some(new_parent) {
            return Err(StoreError::SiblingNotFound {
                parent: new_parent,
                sibling,
            });
        }
    }
    Ok(parent)
}

pub(crate) fn next_sibling<S: WorkspaceStore + ?Sized>(
    store: &S,
    parent: NodeId,
    id: NodeId,
) -> StoreResult<Option<NodeId>> {
    let children = store.children(parent)?;
    Ok(children
        .iter()
        .position(|c| c.id == id)
        .and_then(|i| children.get(i + 1))
        .map(|c| c.id))
}

pub(crate) fn unchanged<S: WorkspaceStore + ?Sized>(
    store: &S,
    id: NodeId,
    parent: NodeId,
    path: Path,
) -> StoreResult<Relocated> {
    let position = store
        .children(parent)?
        .iter()
        .position(|c| c.id == id)
        .ok_or(StoreError::NodeNotFound(id))?;
    Ok(Relocated {
        id,
        old_path: path.clone(),
        new_path: path,
        position,
        source_renamed: Vec::new(),
        target_renamed: Vec::new(),
        unchanged: true,
    })
}

/// A storage engine that hosts workspaces.
pub trait Backend: Send + Sync {
    type Store: WorkspaceStore;

    /// Short name of the engine, used in logs.
    fn kind(&self) -> &str;

    /// Create the store for a new, empty workspace whose root has `root`.
    fn open_workspace(&self, name: &str, root: NodeId) -> StoreResult<Self::Store>;

    /// Release whatever the engine holds for a destroyed workspace.
    fn destroy_workspace(&self, name: &str) -> StoreResult<()>;
}
