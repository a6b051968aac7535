//! Workspace store layered over a [`TreeCache`].
//!
//! The cache addresses nodes by their literal segment list and does not keep
//! child order, so this adapter adds:
//!
//! - the node identifier, stored in each node's identity attribute;
//! - the ordered child-segment list, stored on every parent under the
//!   reserved [`CHILD_SEGMENTS`] attribute;
//! - same-name-sibling renumbering, which re-keys the renamed child (new
//!   key, copied attributes, grandchildren moved across, old key removed);
//! - an identifier index from [`NodeId`] to the node's current key.
//!
//! Updates to one `(parent, name)` pair run inside a [`SiblingLocks`]
//! critical section. While a structural edit runs, the published child list,
//! the renamed keys and the new node are briefly out of step, so structural
//! edits hold the workspace's layout guard for writing and every key-based
//! read holds it for reading. Attribute reads and writes on one node rely on
//! the cache's per-node locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arbor_types::{NodeId, Path, Property, Segment, IDENTITY_PROPERTY};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::sns::{self, SegmentRename, SiblingLocks};
use crate::traits::{Backend, Child, Inserted, Removed, Renamed, WorkspaceStore};
use crate::tree_cache::{Attribute, SegmentKey, TreeCache};

/// Reserved attribute holding a parent's ordered child segments.
pub const CHILD_SEGMENTS: &str = "arbor:childSegments";

const RESERVED: [&str; 2] = [CHILD_SEGMENTS, IDENTITY_PROPERTY];

fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// A workspace stored in a tree cache.
pub struct TreeCacheWorkspace {
    name: String,
    root: NodeId,
    cache: Arc<TreeCache>,
    ids: RwLock<HashMap<NodeId, SegmentKey>>,
    siblings: SiblingLocks,
    layout: RwLock<()>,
}

impl TreeCacheWorkspace {
    /// Initialise the cache root as the root of a new workspace.
    pub fn new(name: impl Into<String>, root: NodeId, cache: Arc<TreeCache>) -> StoreResult<Self> {
        let key = SegmentKey::root();
        cache.put(&key, IDENTITY_PROPERTY, Attribute::Id(root))?;
        cache.put(&key, CHILD_SEGMENTS, Attribute::Segments(Vec::new()))?;
        Ok(Self {
            name: name.into(),
            root,
            cache,
            ids: RwLock::new(HashMap::from([(root, key)])),
            siblings: SiblingLocks::new(),
            layout: RwLock::new(()),
        })
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<TreeCache> {
        &self.cache
    }

    fn reading(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
        self.layout.read().map_err(StoreError::poisoned)
    }

    fn rearranging(&self) -> StoreResult<RwLockWriteGuard<'_, ()>> {
        self.layout.write().map_err(StoreError::poisoned)
    }

    fn key_of(&self, id: NodeId) -> StoreResult<Option<SegmentKey>> {
        let ids = self.ids.read().map_err(StoreError::poisoned)?;
        Ok(ids.get(&id).cloned())
    }

    fn require_key(&self, id: NodeId) -> StoreResult<SegmentKey> {
        self.key_of(id)?.ok_or(StoreError::NodeNotFound(id))
    }

    fn id_at(&self, key: &SegmentKey) -> StoreResult<NodeId> {
        match self.cache.get(key, IDENTITY_PROPERTY)? {
            Some(Attribute::Id(id)) => Ok(id),
            _ => Err(StoreError::Consistency(format!(
                "cache node {} has no identifier",
                key.to_path()
            ))),
        }
    }

    fn ordered_children(&self, key: &SegmentKey) -> StoreResult<Vec<Segment>> {
        match self.cache.get(key, CHILD_SEGMENTS)? {
            Some(Attribute::Segments(list)) => Ok(list),
            _ => Ok(Vec::new()),
        }
    }

    /// Edit a parent's ordered child list atomically.
    fn edit_children<R>(
        &self,
        key: &SegmentKey,
        f: impl FnOnce(&mut Vec<Segment>) -> R,
    ) -> StoreResult<R> {
        self.cache.update(key, CHILD_SEGMENTS, |value| {
            let mut list = match value.take() {
                Some(Attribute::Segments(list)) => list,
                _ => Vec::new(),
            };
            let result = f(&mut list);
            *value = Some(Attribute::Segments(list));
            result
        })
    }

    fn find_child(
        &self,
        parent: &SegmentKey,
        segment: &Segment,
    ) -> StoreResult<Option<SegmentKey>> {
        let list = self.ordered_children(parent)?;
        Ok(sns::find(&list, segment).map(|pos| parent.child(list[pos].clone())))
    }

    fn walk(&self, path: &Path) -> StoreResult<(usize, SegmentKey)> {
        let mut current = SegmentKey::root();
        for (depth, segment) in path.iter().enumerate() {
            match self.find_child(&current, segment)? {
                Some(child) => current = child,
                None => return Ok((depth, current)),
            }
        }
        Ok((path.depth(), current))
    }

    /// Point every identifier at or below `key` at its current key.
    fn reindex_under(&self, key: &SegmentKey) -> StoreResult<()> {
        let keys = self.cache.keys_under(key)?;
        let entries = keys
            .into_iter()
            .map(|k| Ok((self.id_at(&k)?, k)))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut ids = self.ids.write().map_err(StoreError::poisoned)?;
        ids.extend(entries);
        Ok(())
    }

    /// Re-key a child from `from` to `to` under the same parent.
    fn change_node_name(
        &self,
        parent: &SegmentKey,
        from: &Segment,
        to: &Segment,
    ) -> StoreResult<NodeId> {
        let old_key = parent.child(from.clone());
        let new_key = self.cache.add_child(parent, to.clone())?;
        self.cache.put_all(&new_key, self.cache.attributes(&old_key)?)?;
        for grandchild in self.cache.child_segments(&old_key)? {
            self.cache.move_node(&old_key.child(grandchild), &new_key)?;
        }
        self.cache.remove_node(&old_key)?;
        self.reindex_under(&new_key)?;
        self.id_at(&new_key)
    }

    /// Apply renames in the given order, reporting them in list order.
    fn apply_renames<'a>(
        &self,
        parent: &SegmentKey,
        renames: impl Iterator<Item = &'a SegmentRename>,
    ) -> StoreResult<Vec<Renamed>> {
        let mut renamed = renames
            .map(|r| {
                let id = self.change_node_name(parent, &r.from, &r.to)?;
                Ok((r.position, Renamed {
                    id,
                    from: r.from.clone(),
                    to: r.to.clone(),
                }))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        renamed.sort_by_key(|(position, _)| *position);
        Ok(renamed.into_iter().map(|(_, r)| r).collect())
    }
}

impl WorkspaceStore for TreeCacheWorkspace {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> NodeId {
        self.root
    }

    fn find(&self, path: &Path) -> StoreResult<Option<NodeId>> {
        let _layout = self.reading()?;
        let (depth, key) = self.walk(path)?;
        if depth < path.depth() {
            return Ok(None);
        }
        self.id_at(&key).map(Some)
    }

    fn lowest_existing(&self, path: &Path) -> StoreResult<Path> {
        let _layout = self.reading()?;
        let (depth, _) = self.walk(path)?;
        Ok(path.subpath(depth))
    }

    fn contains(&self, id: NodeId) -> StoreResult<bool> {
        Ok(self.key_of(id)?.is_some())
    }

    fn path_of(&self, id: NodeId) -> StoreResult<Option<Path>> {
        let _layout = self.reading()?;
        Ok(self.key_of(id)?.map(|k| k.to_path()))
    }

    fn parent_of(&self, id: NodeId) -> StoreResult<Option<NodeId>> {
        let _layout = self.reading()?;
        match self.require_key(id)?.parent() {
            Some(parent) => self.id_at(&parent).map(Some),
            None => Ok(None),
        }
    }

    fn children(&self, id: NodeId) -> StoreResult<Vec<Child>> {
        let _layout = self.reading()?;
        let key = self.require_key(id)?;
        self.ordered_children(&key)?
            .into_iter()
            .map(|segment| {
                let id = self.id_at(&key.child(segment.clone()))?;
                Ok(Child { segment, id })
            })
            .collect()
    }

    fn properties(&self, id: NodeId) -> StoreResult<BTreeMap<String, Property>> {
        let _layout = self.reading()?;
        let key = self.require_key(id)?;
        Ok(self
            .cache
            .attributes(&key)?
            .into_values()
            .filter_map(|value| match value {
                Attribute::Property(p) => Some((p.name.clone(), p)),
                _ => None,
            })
            .collect())
    }

    fn set_property(&self, id: NodeId, property: Property) -> StoreResult<()> {
        if is_reserved(&property.name) {
            return Err(StoreError::ReservedProperty(property.name));
        }
        let _layout = self.reading()?;
        let key = self.require_key(id)?;
        let name = property.name.clone();
        self.cache.put(&key, &name, Attribute::Property(property))
    }

    fn remove_property(&self, id: NodeId, name: &str) -> StoreResult<bool> {
        if is_reserved(name) {
            return Err(StoreError::ReservedProperty(name.to_string()));
        }
        let _layout = self.reading()?;
        let key = self.require_key(id)?;
        Ok(matches!(
            self.cache.remove_attribute(&key, name)?,
            Some(Attribute::Property(_))
        ))
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
        if let Some(p) = properties.iter().find(|p| is_reserved(&p.name)) {
            return Err(StoreError::ReservedProperty(p.name.clone()));
        }
        let id = id.unwrap_or_default();

        let slot = self.siblings.slot(parent, name)?;
        let _guard = slot.lock().map_err(StoreError::poisoned)?;
        let _layout = self.rearranging()?;

        let parent_key = self.require_key(parent)?;
        if self.key_of(id)?.is_some() {
            return Err(StoreError::DuplicateId(id));
        }
        let before_segment = match before {
            Some(sibling) => {
                let key = self
                    .key_of(sibling)?
                    .filter(|k| k.parent().as_ref() == Some(&parent_key));
                let segment = key.and_then(|k| k.last().cloned());
                Some(segment.ok_or(StoreError::SiblingNotFound { parent, sibling })?)
            }
            None => None,
        };

        let (position, segment, renames) = self.edit_children(&parent_key, |list| {
            let at = before_segment
                .as_ref()
                .and_then(|s| list.iter().position(|entry| entry == s));
            let (position, renames) = sns::insert(list, name, at);
            (position, list[position].clone(), renames)
        })?;

        // Shifting up: rename the highest index first so targets are free.
        let renamed = self.apply_renames(&parent_key, renames.iter().rev())?;

        let key = self.cache.add_child(&parent_key, segment.clone())?;
        let mut attributes: HashMap<String, Attribute> = properties
            .into_iter()
            .map(|p| (p.name.clone(), Attribute::Property(p)))
            .collect();
        attributes.insert(IDENTITY_PROPERTY.to_string(), Attribute::Id(id));
        attributes.insert(CHILD_SEGMENTS.to_string(), Attribute::Segments(Vec::new()));
        self.cache.put_all(&key, attributes)?;
        self.ids.write().map_err(StoreError::poisoned)?.insert(id, key);

        debug!(
            workspace = %self.name,
            parent = %parent,
            segment = %segment,
            id = %id,
            renamed = renamed.len(),
            "created node"
        );
        Ok(Inserted {
            id,
            segment,
            position,
            renamed,
        })
    }

    fn remove_child(&self, parent: NodeId, segment: &Segment) -> StoreResult<Removed> {
        let slot = self.siblings.slot(parent, segment.name())?;
        let _guard = slot.lock().map_err(StoreError::poisoned)?;
        let _layout = self.rearranging()?;
        let parent_key = self.require_key(parent)?;

        let (removed_segment, renames) = self
            .edit_children(&parent_key, |list| {
                sns::find(list, segment).and_then(|pos| sns::remove(list, pos))
            })?
            .ok_or_else(|| StoreError::Consistency(format!("no child {segment} under {parent}")))?;

        let key = parent_key.child(removed_segment.clone());
        let id = self.id_at(&key)?;
        let doomed = self
            .cache
            .keys_under(&key)?
            .iter()
            .map(|k| self.id_at(k))
            .collect::<StoreResult<Vec<_>>>()?;
        let count = self.cache.remove_node(&key)?;
        {
            let mut ids = self.ids.write().map_err(StoreError::poisoned)?;
            for gone in &doomed {
                ids.remove(gone);
            }
        }
        if count != doomed.len() {
            warn!(
                workspace = %self.name,
                removed = count,
                indexed = doomed.len(),
                "identifier index disagreed with cache on removal"
            );
        }

        // Shifting down: rename the lowest index first.
        let renamed = self.apply_renames(&parent_key, renames.iter())?;

        debug!(
            workspace = %self.name,
            parent = %parent,
            segment = %removed_segment,
            removed = count,
            renamed = renamed.len(),
            "removed branch"
        );
        Ok(Removed {
            id,
            segment: removed_segment,
            count,
            renamed,
        })
    }

    fn clear(&self) -> StoreResult<()> {
        let _layout = self.rearranging()?;
        let root = SegmentKey::root();
        let mut removed = 0;
        for segment in self.ordered_children(&root)? {
            removed += self.cache.remove_node(&root.child(segment))?;
        }
        self.cache.clear_attributes(&root, &RESERVED)?;
        self.cache.put(&root, CHILD_SEGMENTS, Attribute::Segments(Vec::new()))?;
        self.ids
            .write()
            .map_err(StoreError::poisoned)?
            .retain(|_, key| key.is_root());
        debug!(workspace = %self.name, removed, "cleared workspace");
        Ok(())
    }
}

impl std::fmt::Debug for TreeCacheWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCacheWorkspace")
            .field("name", &self.name)
            .field("node_count", &self.cache.len())
            .finish()
    }
}

/// Backend giving each workspace its own [`TreeCache`].
#[derive(Debug, Default)]
pub struct TreeCacheBackend {
    caches: RwLock<HashMap<String, Arc<TreeCache>>>,
}

impl TreeCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache backing a workspace, if it is open.
    pub fn cache(&self, workspace: &str) -> Option<Arc<TreeCache>> {
        self.caches.read().ok()?.get(workspace).cloned()
    }
}

impl Backend for TreeCacheBackend {
    type Store = TreeCacheWorkspace;

    fn kind(&self) -> &str {
        "tree-cache"
    }

    fn open_workspace(&self, name: &str, root: NodeId) -> StoreResult<TreeCacheWorkspace> {
        let cache = Arc::new(TreeCache::new());
        self.caches
            .write()
            .map_err(StoreError::poisoned)?
            .insert(name.to_string(), Arc::clone(&cache));
        info!(workspace = name, root = %root, "opened tree cache");
        TreeCacheWorkspace::new(name, root, cache)
    }

    fn destroy_workspace(&self, name: &str) -> StoreResult<()> {
        let dropped = self
            .caches
            .write()
            .map_err(StoreError::poisoned)?
            .remove(name);
        info!(workspace = name, existed = dropped.is_some(), "destroyed tree cache");
        Ok(())
    }
}
