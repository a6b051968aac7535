//! The location cache.
//!
//! [`LocationCache`] remembers two kinds of facts read from a workspace
//! store:
//!
//! - path to [`Location`] (the identifier last seen at that path);
//! - parent path to its ordered child locations.
//!
//! Mutations must be reported so that no entry ever disagrees with what the
//! store would answer. The rules mirror same-name-sibling renumbering: when a
//! sibling is removed, later same-named siblings shift down one index and
//! anything cached below a shifted sibling is dropped. Callers can always
//! bypass or [`clear`](LocationCache::clear) the cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use arbor_store::Renamed;
use arbor_types::{Location, Path, Segment};
use tracing::{debug, trace, warn};

use crate::error::{CacheError, CacheResult};

#[derive(Debug, Default)]
struct CacheState {
    locations: HashMap<Path, Location>,
    children: HashMap<Path, Vec<Location>>,
}

fn is_sibling_named(path: &Path, parent: &Path, name: &str) -> bool {
    path.depth() == parent.depth() + 1
        && path.is_at_or_below(parent)
        && path.last_segment().map(Segment::name) == Some(name)
}

impl CacheState {
    /// Drop every entry at or below `path`. Returns whether anything went.
    fn drop_at_or_below(&mut self, path: &Path) -> bool {
        let before = self.locations.len() + self.children.len();
        self.locations.retain(|p, _| !p.is_at_or_below(path));
        self.children.retain(|p, _| !p.is_at_or_below(path));
        before != self.locations.len() + self.children.len()
    }

    fn add_child(
        &mut self,
        parent: &Path,
        child: Location,
        position: Option<usize>,
        renamed: &[Renamed],
    ) -> CacheResult<()> {
        let path = child.path.clone().ok_or(CacheError::Unaddressed)?;

        // Two phases so a rename onto a name still held by another renamed
        // sibling does not clobber it.
        for r in renamed {
            self.drop_at_or_below(&parent.child(r.from.clone()));
        }
        for r in renamed {
            let to = parent.child(r.to.clone());
            trace!(from = %r.from, to = %to, "cache rename");
            self.locations.insert(to.clone(), Location::new(to, r.id));
        }

        let mut out_of_range = None;
        if let Some(list) = self.children.get_mut(parent) {
            for entry in list.iter_mut() {
                if let Some(r) = renamed.iter().find(|r| entry.id == Some(r.id)) {
                    *entry = Location::new(parent.child(r.to.clone()), r.id);
                }
            }
            match position {
                Some(pos) if pos <= list.len() => list.insert(pos, child.clone()),
                Some(pos) => out_of_range = Some((pos, list.len())),
                None => list.push(child.clone()),
            }
        }
        if let Some((position, len)) = out_of_range {
            self.children.remove(parent);
            return Err(CacheError::PositionOutOfRange {
                parent: parent.clone(),
                position,
                len,
            });
        }

        self.locations.insert(path, child);
        Ok(())
    }

    fn remove_branch(&mut self, path: &Path) -> bool {
        let mut changed = self.drop_at_or_below(path);
        let (Some(parent), Some(removed)) = (path.parent(), path.last_segment().cloned()) else {
            // The root itself: everything below it is gone.
            changed |= !self.locations.is_empty() || !self.children.is_empty();
            self.locations.clear();
            self.children.clear();
            return changed;
        };
        let name = removed.name();

        // Same-name siblings left under the parent, when the list is known.
        let mut remaining = None;
        let mut stale_list = false;
        if let Some(list) = self.children.get_mut(&parent) {
            match list.iter().position(|l| l.path.as_ref() == Some(path)) {
                Some(pos) => {
                    list.remove(pos);
                    changed = true;
                    remaining = Some(
                        list.iter()
                            .filter(|l| {
                                l.path
                                    .as_ref()
                                    .is_some_and(|p| is_sibling_named(p, &parent, name))
                            })
                            .count(),
                    );
                }
                None => stale_list = true,
            }
        }
        if stale_list {
            warn!(parent = %parent, removed = %path, "cached children did not list removed node");
            self.children.remove(&parent);
        }

        let Some(k) = removed.index() else {
            return changed;
        };

        // Every sibling sharing the name that has anything cached at or
        // below it, by current index, with its identifier when known.
        let mut siblings: BTreeMap<u32, Option<Location>> = BTreeMap::new();
        let depth = parent.depth() + 1;
        let keys = self.locations.keys().chain(self.children.keys());
        for p in keys.filter(|p| p.depth() >= depth && p.is_at_or_below(&parent)) {
            let sibling = p.subpath(depth);
            if !is_sibling_named(&sibling, &parent, name) {
                continue;
            }
            if let Some(idx) = sibling.last_segment().and_then(Segment::index) {
                if idx != k {
                    siblings.entry(idx).or_insert(None);
                }
            }
        }
        let listed = self.children.get(&parent).into_iter().flatten();
        for location in self.locations.values().chain(listed) {
            let Some(p) = location.path.as_ref() else { continue };
            if !is_sibling_named(p, &parent, name) {
                continue;
            }
            if let Some(idx) = p.last_segment().and_then(Segment::index) {
                if idx != k {
                    siblings.insert(idx, Some(location.clone()));
                }
            }
        }

        // Old path, new path (None: drop), identifier.
        let mut plan = Vec::new();
        for (idx, location) in siblings {
            let id = location.and_then(|l| l.id);
            let shifted = if idx > k { idx - 1 } else { idx };
            let target = match remaining {
                Some(1) => Some(None),
                Some(_) => Some(Some(shifted)),
                None if shifted == 1 => None,
                None => Some(Some(shifted)),
            };
            if target == Some(Some(idx)) {
                continue;
            }
            let old = parent.child(Segment::indexed(name, idx));
            let new = target.map(|index| parent.child(Segment::indexed(name, index.unwrap_or(0))));
            plan.push((old, new, id));
        }

        for (old, _, _) in &plan {
            changed |= self.drop_at_or_below(old);
        }
        for (old, new, id) in &plan {
            match (new, id) {
                (Some(new), Some(id)) => {
                    trace!(from = %old, to = %new, "cache shift");
                    self.locations.insert(new.clone(), Location::new(new.clone(), *id));
                }
                _ => trace!(path = %old, "cache drop ambiguous sibling"),
            }
        }
        if let Some(list) = self.children.get_mut(&parent) {
            for entry in list.iter_mut() {
                let Some(current) = entry.path.clone() else { continue };
                if let Some((_, Some(new), _)) = plan.iter().find(|(old, _, _)| *old == current) {
                    *entry = entry.with_path(new.clone());
                }
            }
        }
        changed
    }
}

/// Read-through cache of resolved locations and child lists.
#[derive(Debug, Default)]
pub struct LocationCache {
    state: RwLock<CacheState>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> CacheResult<RwLockReadGuard<'_, CacheState>> {
        self.state
            .read()
            .map_err(|e| CacheError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> CacheResult<RwLockWriteGuard<'_, CacheState>> {
        self.state
            .write()
            .map_err(|e| CacheError::LockPoisoned(e.to_string()))
    }

    /// The location last recorded at `path`.
    pub fn location_for(&self, path: &Path) -> CacheResult<Option<Location>> {
        Ok(self.read()?.locations.get(path).cloned())
    }

    /// Record a resolved location. Locations without a path are ignored.
    pub fn add_location(&self, location: Location) -> CacheResult<()> {
        if let Some(path) = location.path.clone() {
            self.write()?.locations.insert(path, location);
        }
        Ok(())
    }

    /// The cached ordered children of `parent`.
    pub fn children_of(&self, parent: &Path) -> CacheResult<Option<Vec<Location>>> {
        Ok(self.read()?.children.get(parent).cloned())
    }

    /// Record (or with `None`, forget) the ordered children of `parent`.
    pub fn set_children(&self, parent: &Path, children: Option<Vec<Location>>) -> CacheResult<()> {
        let mut state = self.write()?;
        match children {
            Some(children) => {
                for child in &children {
                    if let Some(path) = child.path.clone() {
                        state.locations.insert(path, child.clone());
                    }
                }
                state.children.insert(parent.clone(), children);
            }
            None => {
                state.children.remove(parent);
            }
        }
        Ok(())
    }

    /// Record a new child of `parent` at `position` (or last).
    ///
    /// `renamed` lists the siblings the store renumbered to make room; their
    /// cached descendants are dropped.
    pub fn add_child(
        &self,
        parent: &Path,
        child: Location,
        position: Option<usize>,
        renamed: &[Renamed],
    ) -> CacheResult<()> {
        self.write()?.add_child(parent, child, position, renamed)
    }

    /// Forget a removed branch and shift later same-named siblings down.
    ///
    /// `path` must be the branch's actual path. Returns whether any entry
    /// changed.
    pub fn remove_branch(&self, path: &Path) -> CacheResult<bool> {
        let changed = self.write()?.remove_branch(path);
        debug!(path = %path, changed, "cache removed branch");
        Ok(changed)
    }

    /// Record a move: forget the old branch, then add the node under its new
    /// parent.
    pub fn move_node(
        &self,
        old_path: &Path,
        moved: Location,
        position: Option<usize>,
        renamed: &[Renamed],
    ) -> CacheResult<()> {
        let new_parent = moved
            .path
            .as_ref()
            .and_then(Path::parent)
            .ok_or(CacheError::Unaddressed)?;
        let mut state = self.write()?;
        state.remove_branch(old_path);
        state.add_child(&new_parent, moved, position, renamed)
    }

    /// Drop every entry.
    pub fn clear(&self) -> CacheResult<()> {
        let mut state = self.write()?;
        state.locations.clear();
        state.children.clear();
        Ok(())
    }

    /// Number of cached path entries.
    pub fn len(&self) -> usize {
        self.read().map(|s| s.locations.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parent paths with a cached child list.
    pub fn cached_parents(&self) -> CacheResult<Vec<Path>> {
        Ok(self.read()?.children.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::{InMemoryWorkspace, WorkspaceStore};
    use arbor_types::NodeId;
    use proptest::prelude::*;

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    fn loc(s: &str) -> Location {
        Location::new(p(s), NodeId::new())
    }

    fn paths(list: &[Location]) -> Vec<String> {
        list.iter().map(|l| l.path.as_ref().unwrap().to_string()).collect()
    }

    /// `/a` with children `e[1]..e[4]`, each with a cached child `x`.
    fn four_siblings(cache: &LocationCache) -> Vec<Location> {
        let children: Vec<_> = (1..=4).map(|i| loc(&format!("/a/e[{i}]"))).collect();
        cache.set_children(&p("/a"), Some(children.clone())).unwrap();
        for i in 1..=4 {
            let x = format!("/a/e[{i}]/x");
            cache.add_location(loc(&x)).unwrap();
            cache
                .set_children(&p(&format!("/a/e[{i}]")), Some(vec![loc(&x)]))
                .unwrap();
        }
        children
    }

    // -----------------------------------------------------------------------
    // Basic entries
    // -----------------------------------------------------------------------

    #[test]
    fn add_and_lookup_location() {
        let cache = LocationCache::new();
        let l = loc("/a/b");
        cache.add_location(l.clone()).unwrap();
        assert_eq!(cache.location_for(&p("/a/b")).unwrap(), Some(l));
        assert_eq!(cache.location_for(&p("/a")).unwrap(), None);

        cache.add_location(Location::with_id(NodeId::new())).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn set_children_records_each_child() {
        let cache = LocationCache::new();
        let children = vec![loc("/a/b"), loc("/a/c")];
        cache.set_children(&p("/a"), Some(children.clone())).unwrap();
        assert_eq!(cache.children_of(&p("/a")).unwrap(), Some(children.clone()));
        assert_eq!(cache.location_for(&p("/a/c")).unwrap(), Some(children[1].clone()));

        cache.set_children(&p("/a"), None).unwrap();
        assert_eq!(cache.children_of(&p("/a")).unwrap(), None);
        assert_eq!(cache.cached_parents().unwrap().len(), 0);
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    #[test]
    fn removing_a_sibling_shifts_later_ones_down() {
        let cache = LocationCache::new();
        let children = four_siblings(&cache);

        assert!(cache.remove_branch(&p("/a/e[2]")).unwrap());

        let list = cache.children_of(&p("/a")).unwrap().unwrap();
        assert_eq!(paths(&list), ["/a/e[1]", "/a/e[2]", "/a/e[3]"]);
        assert_eq!(list[1].id, children[2].id);
        assert_eq!(list[2].id, children[3].id);

        assert_eq!(cache.location_for(&p("/a/e[2]")).unwrap().unwrap().id, children[2].id);
        assert_eq!(cache.location_for(&p("/a/e[3]")).unwrap().unwrap().id, children[3].id);
        assert_eq!(cache.location_for(&p("/a/e[4]")).unwrap(), None);

        // Descendants of shifted siblings are dropped, untouched ones stay.
        assert!(cache.location_for(&p("/a/e[1]/x")).unwrap().is_some());
        for gone in ["/a/e[2]/x", "/a/e[3]/x", "/a/e[4]/x"] {
            assert_eq!(cache.location_for(&p(gone)).unwrap(), None, "{gone}");
        }
        assert!(cache.children_of(&p("/a/e[3]")).unwrap().is_none());
        assert!(cache.children_of(&p("/a/e[1]")).unwrap().is_some());
    }

    #[test]
    fn removing_down_to_one_drops_the_index() {
        let cache = LocationCache::new();
        let first = loc("/a/e[1]");
        cache
            .set_children(&p("/a"), Some(vec![first.clone(), loc("/a/e[2]"), loc("/a/f")]))
            .unwrap();

        cache.remove_branch(&p("/a/e[2]")).unwrap();
        let list = cache.children_of(&p("/a")).unwrap().unwrap();
        assert_eq!(paths(&list), ["/a/e", "/a/f"]);
        assert_eq!(cache.location_for(&p("/a/e")).unwrap().unwrap().id, first.id);
        assert_eq!(cache.location_for(&p("/a/e[1]")).unwrap(), None);
    }

    #[test]
    fn unknown_sibling_count_drops_ambiguous_entries() {
        let cache = LocationCache::new();
        let third = loc("/a/e[3]");
        cache.add_location(loc("/a/e[1]")).unwrap();
        cache.add_location(loc("/a/e[2]")).unwrap();
        cache.add_location(third.clone()).unwrap();

        cache.remove_branch(&p("/a/e[2]")).unwrap();
        // `e[1]` may have become `e`; it is dropped rather than guessed.
        assert_eq!(cache.location_for(&p("/a/e[1]")).unwrap(), None);
        assert_eq!(cache.location_for(&p("/a/e[2]")).unwrap().unwrap().id, third.id);
        assert_eq!(cache.location_for(&p("/a/e[3]")).unwrap(), None);
    }

    #[test]
    fn descendants_of_uncached_siblings_are_dropped() {
        let cache = LocationCache::new();
        cache.add_location(loc("/a/e[3]/x")).unwrap();
        cache.add_location(loc("/a/e[1]/y")).unwrap();
        cache.remove_branch(&p("/a/e[2]")).unwrap();
        assert_eq!(cache.location_for(&p("/a/e[3]/x")).unwrap(), None);
        assert_eq!(cache.location_for(&p("/a/e[1]/y")).unwrap(), None);
    }

    #[test]
    fn removing_root_clears_everything() {
        let cache = LocationCache::new();
        four_siblings(&cache);
        assert!(cache.remove_branch(&Path::root()).unwrap());
        assert!(cache.is_empty());
        assert!(cache.cached_parents().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Insertion and moves
    // -----------------------------------------------------------------------

    #[test]
    fn add_child_applies_store_renames() {
        let cache = LocationCache::new();
        let first = loc("/a/b");
        cache.set_children(&p("/a"), Some(vec![first.clone()])).unwrap();
        cache.add_location(loc("/a/b/x")).unwrap();

        let renamed = vec![Renamed {
            id: first.id.unwrap(),
            from: Segment::new("b"),
            to: Segment::indexed("b", 1),
        }];
        let second = loc("/a/b[2]");
        cache.add_child(&p("/a"), second.clone(), Some(1), &renamed).unwrap();

        let list = cache.children_of(&p("/a")).unwrap().unwrap();
        assert_eq!(paths(&list), ["/a/b[1]", "/a/b[2]"]);
        assert_eq!(list[0].id, first.id);
        assert_eq!(cache.location_for(&p("/a/b")).unwrap(), None);
        assert_eq!(cache.location_for(&p("/a/b/x")).unwrap(), None);
        assert_eq!(cache.location_for(&p("/a/b[2]")).unwrap(), Some(second));
    }

    #[test]
    fn add_child_out_of_range_forgets_list() {
        let cache = LocationCache::new();
        cache.set_children(&p("/a"), Some(vec![loc("/a/b")])).unwrap();
        let err = cache.add_child(&p("/a"), loc("/a/c"), Some(5), &[]).unwrap_err();
        assert!(matches!(err, CacheError::PositionOutOfRange { len: 1, .. }));
        assert!(cache.children_of(&p("/a")).unwrap().is_none());
    }

    #[test]
    fn move_updates_both_parents() {
        let cache = LocationCache::new();
        let children = four_siblings(&cache);
        cache.set_children(&p("/d"), Some(vec![])).unwrap();

        let moved = Location::new(p("/d/e"), children[1].id.unwrap());
        cache.move_node(&p("/a/e[2]"), moved.clone(), Some(0), &[]).unwrap();

        assert_eq!(cache.children_of(&p("/d")).unwrap(), Some(vec![moved]));
        let list = cache.children_of(&p("/a")).unwrap().unwrap();
        assert_eq!(paths(&list), ["/a/e[1]", "/a/e[2]", "/a/e[3]"]);
    }

    // -----------------------------------------------------------------------
    // Fidelity against a real store
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone)]
    enum Op {
        Create { parent: usize, name: usize, before: Option<usize> },
        Delete(usize),
        Move { node: usize, target: usize, before: Option<usize> },
        Read(usize),
    }

    const NAMES: [&str; 2] = ["b", "c"];

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (any::<usize>(), 0..NAMES.len(), proptest::option::of(any::<usize>()))
                .prop_map(|(parent, name, before)| Op::Create { parent, name, before }),
            1 => any::<usize>().prop_map(Op::Delete),
            1 => (any::<usize>(), any::<usize>(), proptest::option::of(any::<usize>()))
                .prop_map(|(node, target, before)| Op::Move { node, target, before }),
            3 => any::<usize>().prop_map(Op::Read),
        ]
    }

    fn all_nodes(ws: &InMemoryWorkspace) -> Vec<NodeId> {
        let mut out = vec![ws.root()];
        let mut i = 0;
        while i < out.len() {
            out.extend(ws.children(out[i]).unwrap().into_iter().map(|c| c.id));
            i += 1;
        }
        out
    }

    fn pick_child(ws: &InMemoryWorkspace, parent: NodeId, pick: Option<usize>) -> Option<NodeId> {
        let children = ws.children(parent).unwrap();
        let pick = pick?;
        (!children.is_empty()).then(|| children[pick % children.len()].id)
    }

    fn apply(ws: &InMemoryWorkspace, cache: &LocationCache, op: Op) {
        let nodes = all_nodes(ws);
        let at = |i: usize| nodes[i % nodes.len()];
        match op {
            Op::Create { parent, name, before } => {
                let parent = at(parent);
                let before = pick_child(ws, parent, before);
                let ins = ws.insert_child(parent, NAMES[name], None, vec![], before).unwrap();
                let parent_path = ws.resolve_id(parent).unwrap();
                let child = Location::new(parent_path.child(ins.segment.clone()), ins.id);
                cache.add_child(&parent_path, child, Some(ins.position), &ins.renamed).unwrap();
            }
            Op::Delete(node) => {
                let node = at(node);
                let Some(parent) = ws.parent_of(node).unwrap() else { return };
                let path = ws.resolve_id(node).unwrap();
                ws.remove_child(parent, path.last_segment().unwrap()).unwrap();
                cache.remove_branch(&path).unwrap();
            }
            Op::Move { node, target, before } => {
                let (node, target) = (at(node), at(target));
                let before = pick_child(ws, target, before);
                let Ok(moved) = ws.relocate(node, target, None, before) else { return };
                if !moved.unchanged {
                    let location = Location::new(moved.new_path.clone(), node);
                    cache
                        .move_node(
                            &moved.old_path,
                            location,
                            Some(moved.position),
                            &moved.target_renamed,
                        )
                        .unwrap();
                }
            }
            Op::Read(node) => {
                let node = at(node);
                let path = ws.resolve_id(node).unwrap();
                let children = ws
                    .children(node)
                    .unwrap()
                    .into_iter()
                    .map(|c| Location::new(path.child(c.segment), c.id))
                    .collect();
                cache.set_children(&path, Some(children)).unwrap();
            }
        }
    }

    proptest! {
        #[test]
        fn cache_never_diverges_from_store(ops in proptest::collection::vec(arb_op(), 1..60)) {
            let ws = InMemoryWorkspace::new("default", NodeId::new());
            let cache = LocationCache::new();
            for op in ops {
                apply(&ws, &cache, op.clone());

                for parent in cache.cached_parents().unwrap() {
                    let id = ws.find(&parent).unwrap();
                    prop_assert!(id.is_some(), "cached parent {} missing after {:?}", parent, op);
                    let expected: Vec<_> = ws
                        .children(id.unwrap())
                        .unwrap()
                        .into_iter()
                        .map(|c| Location::new(parent.child(c.segment), c.id))
                        .collect();
                    prop_assert_eq!(cache.children_of(&parent).unwrap().unwrap(), expected);
                }
                // Every recorded location, including ones whose path no longer resolves.
                let recorded: Vec<(Path, Location)> =
                    cache.state.read().unwrap().locations.clone().into_iter().collect();
                for (path, cached) in recorded {
                    prop_assert_eq!(
                        ws.find(&path).unwrap(),
                        cached.id,
                        "stale entry at {} after {:?}",
                        path,
                        op
                    );
                }
            }
        }
    }
}
