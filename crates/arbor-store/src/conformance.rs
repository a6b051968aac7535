//! Tree semantics every [`WorkspaceStore`] must satisfy.
//!
//! Adapters run the whole set with `conformance::suite!(constructor)`.

use std::collections::HashSet;

use arbor_types::{NodeId, Path, Property, PropertyValue, Segment};

use crate::error::StoreError;
use crate::traits::{IdPolicy, WorkspaceStore};

fn p(s: &str) -> Path {
    s.parse().unwrap()
}

fn child_names<S: WorkspaceStore>(ws: &S, parent: NodeId) -> Vec<String> {
    ws.children(parent)
        .unwrap()
        .into_iter()
        .map(|c| c.segment.to_string())
        .collect()
}

fn mkdir<S: WorkspaceStore>(ws: &S, parent: NodeId, name: &str) -> NodeId {
    ws.insert_child(parent, name, None, vec![], None).unwrap().id
}

pub fn round_trip<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let a = mkdir(ws, root, "a");
    let created = ws
        .insert_child(a, "b", None, vec![Property::single("title", "hello")], None)
        .unwrap();

    let path = ws.resolve_id(created.id).unwrap();
    assert_eq!(path, p("/a/b"));
    assert_eq!(ws.resolve(&path).unwrap(), created.id);
    assert_eq!(ws.parent_of(created.id).unwrap(), Some(a));
    assert_eq!(ws.parent_of(root).unwrap(), None);
    assert_eq!(
        ws.properties(created.id).unwrap()["title"].first(),
        Some(&PropertyValue::String("hello".into()))
    );
    assert_eq!(ws.location_of(created.id).unwrap().path, Some(path));
}

pub fn twenty_same_name_siblings<S: WorkspaceStore>(ws: &S) {
    let a = mkdir(ws, ws.root(), "a");
    let ids: Vec<_> = (0..20).map(|_| mkdir(ws, a, "b")).collect();

    let expected: Vec<String> = (1..=20).map(|i| format!("b[{i}]")).collect();
    assert_eq!(child_names(ws, a), expected);
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(ws.resolve(&p(&format!("/a/b[{}]", i + 1))).unwrap(), *id);
    }
}

pub fn second_sibling_indexes_first<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let first = ws.insert_child(root, "b", None, vec![], None).unwrap();
    assert_eq!(first.segment, Segment::new("b"));
    assert!(first.renamed.is_empty());

    let second = ws.insert_child(root, "b", None, vec![], None).unwrap();
    assert_eq!(second.segment, Segment::indexed("b", 2));
    assert_eq!(second.renamed.len(), 1);
    assert_eq!(second.renamed[0].id, first.id);
    assert_eq!(second.renamed[0].to, Segment::indexed("b", 1));
    assert_eq!(ws.resolve_id(first.id).unwrap(), p("/b[1]"));
}

pub fn other_names_do_not_perturb<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    for name in ["b", "x", "b", "y", "x", "b"] {
        mkdir(ws, root, name);
    }
    assert_eq!(
        child_names(ws, root),
        ["b[1]", "x[1]", "b[2]", "y", "x[2]", "b[3]"]
    );
}

pub fn insert_before_sibling<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let first = mkdir(ws, root, "b");
    let c = mkdir(ws, root, "c");
    let inserted = ws.insert_child(root, "b", None, vec![], Some(first)).unwrap();

    assert_eq!(inserted.position, 0);
    assert_eq!(inserted.segment, Segment::indexed("b", 1));
    assert_eq!(child_names(ws, root), ["b[1]", "b[2]", "c"]);
    assert_eq!(ws.resolve_id(first).unwrap(), p("/b[2]"));

    let err = ws.insert_child(first, "z", None, vec![], Some(c)).unwrap_err();
    assert!(matches!(err, StoreError::SiblingNotFound { .. }));
}

pub fn delete_renumbers_remaining<S: WorkspaceStore>(ws: &S) {
    let a = mkdir(ws, ws.root(), "a");
    let ids: Vec<_> = (0..5).map(|_| mkdir(ws, a, "b")).collect();
    let grandchild = mkdir(ws, ids[3], "leaf");

    let removed = ws.remove_child(a, &Segment::indexed("b", 2)).unwrap();
    assert_eq!(removed.id, ids[1]);
    assert_eq!(removed.count, 1);
    assert_eq!(removed.renamed.len(), 3);

    let remaining: Vec<_> = ws.children(a).unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(remaining, [ids[0], ids[2], ids[3], ids[4]]);
    assert_eq!(child_names(ws, a), ["b[1]", "b[2]", "b[3]", "b[4]"]);
    assert_eq!(ws.resolve_id(grandchild).unwrap(), p("/a/b[3]/leaf"));
    assert!(!ws.contains(ids[1]).unwrap());
}

pub fn delete_down_to_one_collapses<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let first = mkdir(ws, root, "b");
    mkdir(ws, root, "b");

    let removed = ws.remove_child(root, &Segment::indexed("b", 2)).unwrap();
    assert_eq!(removed.renamed[0].id, first);
    assert_eq!(child_names(ws, root), ["b"]);
    assert_eq!(ws.resolve(&p("/b")).unwrap(), first);
}

pub fn remove_purges_descendants<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let a = mkdir(ws, root, "a");
    let b = mkdir(ws, a, "b");
    let c = mkdir(ws, b, "c");

    let removed = ws.remove_child(root, &Segment::new("a")).unwrap();
    assert_eq!(removed.count, 3);
    for id in [a, b, c] {
        assert!(!ws.contains(id).unwrap());
        assert_eq!(ws.path_of(id).unwrap(), None);
    }
    assert!(ws.children(root).unwrap().is_empty());
}

pub fn first_index_addresses_sole_sibling<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let a = mkdir(ws, root, "a");
    let b = mkdir(ws, a, "b");
    assert_eq!(ws.resolve(&p("/a[1]/b[1]")).unwrap(), b);
    assert_eq!(ws.find(&p("/a/b[2]")).unwrap(), None);
}

pub fn missing_path_reports_lowest_ancestor<S: WorkspaceStore>(ws: &S) {
    mkdir(ws, ws.root(), "a");
    match ws.resolve(&p("/a/x/y")).unwrap_err() {
        StoreError::PathNotFound {
            path,
            lowest_existing,
        } => {
            assert_eq!(path, p("/a/x/y"));
            assert_eq!(lowest_existing, p("/a"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ws.lowest_existing(&p("/q")).unwrap(), Path::root());
}

pub fn duplicate_id_is_rejected<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let id = NodeId::new();
    ws.insert_child(root, "a", Some(id), vec![], None).unwrap();
    let err = ws.insert_child(root, "b", Some(id), vec![], None).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(dup) if dup == id));
    assert!(ws.insert_child(root, "bad/name", None, vec![], None).is_err());
}

pub fn property_updates<S: WorkspaceStore>(ws: &S) {
    let a = mkdir(ws, ws.root(), "a");
    ws.set_property(a, Property::single("n", 1i64)).unwrap();
    ws.set_property(a, Property::multiple("n", [2i64, 3])).unwrap();
    assert_eq!(ws.properties(a).unwrap()["n"].values().len(), 2);

    assert!(ws.remove_property(a, "n").unwrap());
    assert!(!ws.remove_property(a, "n").unwrap());
    assert!(ws.properties(a).unwrap().is_empty());
}

pub fn copy_leaves_source_untouched<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let a = mkdir(ws, root, "a");
    let b = ws
        .insert_child(a, "b", None, vec![Property::single("k", "v")], None)
        .unwrap()
        .id;
    let c = mkdir(ws, b, "c");
    ws.set_property(c, Property::single("up", PropertyValue::Reference(b)))
        .unwrap();
    let before = ws.snapshot(b).unwrap();

    let copied = ws
        .insert_branch(a, &before, Some("d"), IdPolicy::Regenerate, None)
        .unwrap();
    assert_eq!(copied.count(), 2);
    assert_eq!(ws.snapshot(b).unwrap(), before);

    let d = ws.resolve(&p("/a/d")).unwrap();
    let d_c = ws.resolve(&p("/a/d/c")).unwrap();
    let fresh: HashSet<_> = [d, d_c].into();
    assert!(!fresh.contains(&b) && !fresh.contains(&c));
    assert_eq!(ws.properties(d).unwrap()["k"], Property::single("k", "v"));
    // References into the copied branch follow the copy.
    assert_eq!(
        ws.properties(d_c).unwrap()["up"].first(),
        Some(&PropertyValue::Reference(d))
    );
}

pub fn move_preserves_identity<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let a = mkdir(ws, root, "a");
    let b1 = mkdir(ws, a, "b");
    let b1_child = mkdir(ws, b1, "x");
    let b2 = mkdir(ws, a, "b");
    let b3 = mkdir(ws, a, "b");
    let d = mkdir(ws, a, "d");

    let moved = ws.relocate(b1, d, None, None).unwrap();
    assert_eq!(moved.old_path, p("/a/b[1]"));
    assert_eq!(moved.new_path, p("/a/d/b"));
    assert_eq!(moved.source_renamed.len(), 2);
    assert!(!moved.unchanged);

    assert_eq!(ws.resolve(&p("/a/d/b")).unwrap(), b1);
    assert_eq!(ws.resolve(&p("/a/d/b/x")).unwrap(), b1_child);
    assert_eq!(child_names(ws, a), ["b[1]", "b[2]", "d"]);
    assert_eq!(ws.resolve(&p("/a/b[1]")).unwrap(), b2);
    assert_eq!(ws.resolve(&p("/a/b[2]")).unwrap(), b3);
    assert_eq!(ws.parent_of(b1).unwrap(), Some(d));
}

pub fn move_with_rename_and_before<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let a = mkdir(ws, root, "a");
    let b = mkdir(ws, root, "b");
    let c = mkdir(ws, root, "c");

    let moved = ws.relocate(c, root, Some("b"), Some(a)).unwrap();
    assert_eq!(moved.position, 0);
    assert_eq!(moved.new_path, p("/b[1]"));
    assert_eq!(child_names(ws, root), ["b[1]", "a", "b[2]"]);
    assert_eq!(ws.resolve(&p("/b[2]")).unwrap(), b);
    assert_eq!(moved.target_renamed.len(), 1);
}

pub fn move_before_itself_is_noop<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    mkdir(ws, root, "b");
    let second = mkdir(ws, root, "b");
    mkdir(ws, root, "b");

    let moved = ws.relocate(second, root, None, Some(second)).unwrap();
    assert!(moved.unchanged);
    assert_eq!(moved.old_path, moved.new_path);
    assert_eq!(moved.position, 1);
    assert_eq!(child_names(ws, root), ["b[1]", "b[2]", "b[3]"]);
}

pub fn invalid_moves_are_rejected<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let a = mkdir(ws, root, "a");
    let b = mkdir(ws, a, "b");

    assert!(matches!(
        ws.relocate(root, a, None, None).unwrap_err(),
        StoreError::InvalidMove { .. }
    ));
    assert!(matches!(
        ws.relocate(a, b, None, None).unwrap_err(),
        StoreError::InvalidMove { .. }
    ));
    assert!(matches!(
        ws.relocate(a, a, None, None).unwrap_err(),
        StoreError::InvalidMove { .. }
    ));
    assert_eq!(ws.resolve_id(b).unwrap(), p("/a/b"));
}

pub fn clear_empties_workspace<S: WorkspaceStore>(ws: &S) {
    let root = ws.root();
    let a = mkdir(ws, root, "a");
    mkdir(ws, a, "b");
    ws.set_property(root, Property::single("k", "v")).unwrap();

    ws.clear().unwrap();
    assert!(ws.children(root).unwrap().is_empty());
    assert!(ws.properties(root).unwrap().is_empty());
    assert!(!ws.contains(a).unwrap());
    assert!(ws.contains(root).unwrap());
    mkdir(ws, root, "a");
    assert_eq!(child_names(ws, root), ["a"]);
}

/// Expand to one `#[test]` per conformance check, each on a fresh store.
macro_rules! suite {
    ($make:path) => {
        $crate::conformance::suite!(@tests $make;
            round_trip,
            twenty_same_name_siblings,
            second_sibling_indexes_first,
            other_names_do_not_perturb,
            insert_before_sibling,
            delete_renumbers_remaining,
            delete_down_to_one_collapses,
            remove_purges_descendants,
            first_index_addresses_sole_sibling,
            missing_path_reports_lowest_ancestor,
            duplicate_id_is_rejected,
            property_updates,
            copy_leaves_source_untouched,
            move_preserves_identity,
            move_with_rename_and_before,
            move_before_itself_is_noop,
            invalid_moves_are_rejected,
            clear_empties_workspace,
        );
    };
    (@tests $make:path; $($check:ident),* $(,)?) => {
        $(
            #[test]
            fn $check() {
                $crate::conformance::$check(&$make());
            }
        )*
    };
}

pub(crate) use suite;
