//! A tree-structured key/value cache.
//!
//! [`TreeCache`] stands in for an external distributed tree cache: nodes are
//! addressed by a literal list of segments ([`SegmentKey`]), carry a map of
//! attributes, and know their children only as an *unordered* set of child
//! segments. Each node has its own lock; structural changes take the
//! table-wide write lock.
//!
//! The cache knows nothing about identifiers, ordering, or same-name-sibling
//! indices. [`TreeCacheWorkspace`](crate::TreeCacheWorkspace) layers those on
//! top.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use arbor_types::{NodeId, Path, Property, Segment};

use crate::error::{StoreError, StoreResult};

/// The cache key of a node: its full segment list from the root.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SegmentKey(Vec<Segment>);

impl SegmentKey {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this key equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &SegmentKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Replace the `from` prefix with `to`.
    fn rebase(&self, from: &SegmentKey, to: &SegmentKey) -> Self {
        let mut segments = to.0.clone();
        segments.extend_from_slice(&self.0[from.len()..]);
        Self(segments)
    }

    pub fn to_path(&self) -> Path {
        Path::from_segments(self.0.iter().cloned())
    }
}

impl From<&Path> for SegmentKey {
    fn from(path: &Path) -> Self {
        Self(path.segments().to_vec())
    }
}

impl fmt::Debug for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentKey({})", self.to_path())
    }
}

/// A value held in a cache node's attribute map.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Id(NodeId),
    Segments(Vec<Segment>),
    Property(Property),
}

#[derive(Debug, Default)]
struct CacheNode {
    attributes: HashMap<String, Attribute>,
    children: HashSet<Segment>,
}

type Slot = Arc<Mutex<CacheNode>>;

/// In-process model of an external tree cache.
#[derive(Debug)]
pub struct TreeCache {
    nodes: RwLock<HashMap<SegmentKey, Slot>>,
}

impl TreeCache {
    /// A cache holding only an empty root node.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(SegmentKey::root(), Arc::new(Mutex::new(CacheNode::default())));
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    fn slot(&self, key: &SegmentKey) -> StoreResult<Option<Slot>> {
        let nodes = self.nodes.read().map_err(StoreError::poisoned)?;
        Ok(nodes.get(key).cloned())
    }

    fn require(&self, key: &SegmentKey) -> StoreResult<Slot> {
        self.slot(key)?
            .ok_or_else(|| StoreError::Consistency(format!("no cache node at {}", key.to_path())))
    }

    pub fn exists(&self, key: &SegmentKey) -> StoreResult<bool> {
        Ok(self.slot(key)?.is_some())
    }

    /// Number of cache nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &SegmentKey, name: &str) -> StoreResult<Option<Attribute>> {
        let Some(slot) = self.slot(key)? else {
            return Ok(None);
        };
        let node = slot.lock().map_err(StoreError::poisoned)?;
        Ok(node.attributes.get(name).cloned())
    }

    pub fn attributes(&self, key: &SegmentKey) -> StoreResult<HashMap<String, Attribute>> {
        let slot = self.require(key)?;
        let node = slot.lock().map_err(StoreError::poisoned)?;
        Ok(node.attributes.clone())
    }

    pub fn put(&self, key: &SegmentKey, name: &str, value: Attribute) -> StoreResult<()> {
        let slot = self.require(key)?;
        let mut node = slot.lock().map_err(StoreError::poisoned)?;
        node.attributes.insert(name.to_string(), value);
        Ok(())
    }

    pub fn put_all(&self, key: &SegmentKey, values: HashMap<String, Attribute>) -> StoreResult<()> {
        let slot = self.require(key)?;
        let mut node = slot.lock().map_err(StoreError::poisoned)?;
        node.attributes.extend(values);
        Ok(())
    }

    /// Read-modify-write one attribute under the node's lock.
    ///
    /// `f` sees the current value (or `None`); whatever it leaves behind is
    /// stored, and `None` removes the attribute.
    pub fn update<R>(
        &self,
        key: &SegmentKey,
        name: &str,
        f: impl FnOnce(&mut Option<Attribute>) -> R,
    ) -> StoreResult<R> {
        let slot = self.require(key)?;
        let mut node = slot.lock().map_err(StoreError::poisoned)?;
        let mut value = node.attributes.remove(name);
        let result = f(&mut value);
        if let Some(value) = value {
            node.attributes.insert(name.to_string(), value);
        }
        Ok(result)
    }

    pub fn remove_attribute(&self, key: &SegmentKey, name: &str) -> StoreResult<Option<Attribute>> {
        let slot = self.require(key)?;
        let mut node = slot.lock().map_err(StoreError::poisoned)?;
        Ok(node.attributes.remove(name))
    }

    /// Drop every attribute except those named in `keep`.
    pub fn clear_attributes(&self, key: &SegmentKey, keep: &[&str]) -> StoreResult<()> {
        let slot = self.require(key)?;
        let mut node = slot.lock().map_err(StoreError::poisoned)?;
        node.attributes.retain(|name, _| keep.contains(&name.as_str()));
        Ok(())
    }

    /// Child segments in no particular order.
    pub fn child_segments(&self, key: &SegmentKey) -> StoreResult<Vec<Segment>> {
        let slot = self.require(key)?;
        let node = slot.lock().map_err(StoreError::poisoned)?;
        Ok(node.children.iter().cloned().collect())
    }

    /// Create an empty child node; fails if the key is taken.
    pub fn add_child(&self, parent: &SegmentKey, segment: Segment) -> StoreResult<SegmentKey> {
        let mut nodes = self.nodes.write().map_err(StoreError::poisoned)?;
        let parent_slot = nodes.get(parent).cloned().ok_or_else(|| {
            StoreError::Consistency(format!("no cache node at {}", parent.to_path()))
        })?;
        let key = parent.child(segment.clone());
        if nodes.contains_key(&key) {
            return Err(StoreError::Consistency(format!(
                "cache node already exists at {}",
                key.to_path()
            )));
        }
        parent_slot
            .lock()
            .map_err(StoreError::poisoned)?
            .children
            .insert(segment);
        nodes.insert(key.clone(), Arc::new(Mutex::new(CacheNode::default())));
        Ok(key)
    }

    /// Remove a node and everything below it. Returns the number removed.
    pub fn remove_node(&self, key: &SegmentKey) -> StoreResult<usize> {
        if key.is_root() {
            return Err(StoreError::Consistency("the cache root cannot be removed".into()));
        }
        let mut nodes = self.nodes.write().map_err(StoreError::poisoned)?;
        let before = nodes.len();
        nodes.retain(|k, _| !k.starts_with(key));
        let removed = before - nodes.len();
        if let (Some(parent), Some(last)) = (key.parent(), key.last()) {
            if let Some(slot) = nodes.get(&parent) {
                slot.lock().map_err(StoreError::poisoned)?.children.remove(last);
            }
        }
        Ok(removed)
    }

    /// Move a node (with its subtree) under `new_parent`, keeping its last
    /// key segment. Returns the node's new key.
    pub fn move_node(&self, key: &SegmentKey, new_parent: &SegmentKey) -> StoreResult<SegmentKey> {
        let last = key
            .last()
            .cloned()
            .ok_or_else(|| StoreError::Consistency("the cache root cannot be moved".into()))?;
        let new_key = new_parent.child(last.clone());

        let mut nodes = self.nodes.write().map_err(StoreError::poisoned)?;
        if nodes.contains_key(&new_key) {
            return Err(StoreError::Consistency(format!(
                "cache node already exists at {}",
                new_key.to_path()
            )));
        }
        let target = nodes.get(new_parent).cloned().ok_or_else(|| {
            StoreError::Consistency(format!("no cache node at {}", new_parent.to_path()))
        })?;

        let moving: Vec<SegmentKey> = nodes
            .keys()
            .filter(|k| k.starts_with(key))
            .cloned()
            .collect();
        if moving.is_empty() {
            return Err(StoreError::Consistency(format!("no cache node at {}", key.to_path())));
        }
        for old in moving {
            if let Some(slot) = nodes.remove(&old) {
                nodes.insert(old.rebase(key, &new_key), slot);
            }
        }

        if let Some(old_parent) = key.parent().and_then(|p| nodes.get(&p).cloned()) {
            old_parent.lock().map_err(StoreError::poisoned)?.children.remove(&last);
        }
        target.lock().map_err(StoreError::poisoned)?.children.insert(last);
        Ok(new_key)
    }

    /// Keys at or below `key`.
    pub fn keys_under(&self, key: &SegmentKey) -> StoreResult<Vec<SegmentKey>> {
        let nodes = self.nodes.read().map_err(StoreError::poisoned)?;
        Ok(nodes.keys().filter(|k| k.starts_with(key)).cloned().collect())
    }
}

impl Default for TreeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> SegmentKey {
        SegmentKey::from(&path.parse::<Path>().unwrap())
    }

    #[test]
    fn key_maps_back_to_path() {
        let path: Path = "/a/b[2]/c".parse().unwrap();
        assert_eq!(SegmentKey::from(&path).to_path(), path);
        assert!(SegmentKey::from(&Path::root()).is_root());
    }

    #[test]
    fn add_and_remove_children() {
        let cache = TreeCache::new();
        let a = cache.add_child(&SegmentKey::root(), Segment::new("a")).unwrap();
        cache.add_child(&a, Segment::new("b")).unwrap();
        assert_eq!(cache.len(), 3);
        assert!(cache.exists(&key("/a/b")).unwrap());
        assert!(cache.add_child(&SegmentKey::root(), Segment::new("a")).is_err());

        assert_eq!(cache.remove_node(&a).unwrap(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.child_segments(&SegmentKey::root()).unwrap().is_empty());
    }

    #[test]
    fn attributes_roundtrip() {
        let cache = TreeCache::new();
        let root = SegmentKey::root();
        let id = NodeId::new();
        cache.put(&root, "id", Attribute::Id(id)).unwrap();
        assert_eq!(cache.get(&root, "id").unwrap(), Some(Attribute::Id(id)));
        cache
            .put(&root, "title", Attribute::Property(Property::single("title", "x")))
            .unwrap();
        cache.clear_attributes(&root, &["id"]).unwrap();
        assert_eq!(cache.attributes(&root).unwrap().len(), 1);
        assert!(cache.remove_attribute(&root, "id").unwrap().is_some());
    }

    #[test]
    fn move_keeps_last_segment_and_subtree() {
        let cache = TreeCache::new();
        let root = SegmentKey::root();
        let a = cache.add_child(&root, Segment::new("a")).unwrap();
        let b = cache.add_child(&a, Segment::indexed("b", 2)).unwrap();
        cache.add_child(&b, Segment::new("c")).unwrap();
        let d = cache.add_child(&root, Segment::new("d")).unwrap();

        let moved = cache.move_node(&b, &d).unwrap();
        assert_eq!(moved, key("/d/b[2]"));
        assert!(cache.exists(&key("/d/b[2]/c")).unwrap());
        assert!(!cache.exists(&key("/a/b[2]")).unwrap());
        assert!(cache.child_segments(&a).unwrap().is_empty());
        assert_eq!(cache.child_segments(&d).unwrap(), vec![Segment::indexed("b", 2)]);
    }

    #[test]
    fn root_cannot_be_removed() {
        let cache = TreeCache::new();
        assert!(cache.remove_node(&SegmentKey::root()).is_err());
    }
}
