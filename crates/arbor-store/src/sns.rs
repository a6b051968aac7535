//! Same-name-sibling (SNS) index maintenance.
//!
//! Children sharing a name under one parent carry indices `1..=n` in their
//! stored order. A name with a single child carries no index at all. The
//! functions here operate on a parent's ordered child-segment list, correct
//! the indices of exactly the siblings sharing one name, and report each
//! segment they rewrote so that adapters can re-key the affected nodes.
//!
//! Entries that already hold the correct index are never reported, so
//! running [`reindex`] on a consistent list is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arbor_types::{NodeId, Segment};
use tracing::trace;

use crate::error::{StoreError, StoreResult};

/// One segment rewritten by index maintenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentRename {
    /// Position of the entry in the (corrected) child list.
    pub position: usize,
    pub from: Segment,
    pub to: Segment,
}

/// Recompute the indices of every entry named `name`.
///
/// Indices are assigned by position among the matching entries, not by
/// global position. Returns the rewritten entries in list order.
pub fn reindex(segments: &mut [Segment], name: &str) -> Vec<SegmentRename> {
    let count = segments.iter().filter(|s| s.name() == name).count();
    let mut renames = Vec::new();
    let mut ordinal = 0u32;

    for (position, segment) in segments.iter_mut().enumerate() {
        if segment.name() != name {
            continue;
        }
        ordinal += 1;
        let expected = if count == 1 { None } else { Some(ordinal) };
        if segment.index() != expected {
            let to = segment.with_index(expected);
            trace!(%position, from = %segment, to = %to, "sns rename");
            renames.push(SegmentRename {
                position,
                from: segment.clone(),
                to: to.clone(),
            });
            *segment = to;
        }
    }
    renames
}

/// Insert a new entry named `name` at `at` (or at the end) and reindex.
///
/// Returns the position of the new entry and the renames applied to the
/// pre-existing siblings. The new entry's final segment is
/// `segments[position]`.
pub fn insert(
    segments: &mut Vec<Segment>,
    name: &str,
    at: Option<usize>,
) -> (usize, Vec<SegmentRename>) {
    let position = at.unwrap_or(segments.len()).min(segments.len());
    segments.insert(position, Segment::new(name));
    let renames = reindex(segments, name)
        .into_iter()
        .filter(|r| r.position != position)
        .collect();
    (position, renames)
}

/// Remove the entry at `position` and reindex the remaining siblings that
/// shared its name.
///
/// Returns `None` when `position` is out of range.
pub fn remove(
    segments: &mut Vec<Segment>,
    position: usize,
) -> Option<(Segment, Vec<SegmentRename>)> {
    if position >= segments.len() {
        return None;
    }
    let removed = segments.remove(position);
    let renames = reindex(segments, removed.name());
    Some((removed, renames))
}

/// Position of the stored entry a requested segment addresses.
pub fn find(segments: &[Segment], requested: &Segment) -> Option<usize> {
    segments
        .iter()
        .position(|s| s == requested)
        .or_else(|| segments.iter().position(|s| requested.addresses(s)))
}

/// Whether the entries named `name` carry dense, correctly collapsed indices.
pub fn is_dense(segments: &[Segment], name: &str) -> bool {
    let matches: Vec<_> = segments.iter().filter(|s| s.name() == name).collect();
    match matches.len() {
        0 => true,
        1 => matches[0].index().is_none(),
        _ => matches
            .iter()
            .enumerate()
            .all(|(i, s)| s.index() == Some(i as u32 + 1)),
    }
}

/// Per-(parent, name) critical sections.
///
/// Reading a child list, recomputing indices and writing the list back must
/// not interleave with another writer touching the same parent and name.
#[derive(Debug, Default)]
pub struct SiblingLocks {
    slots: Mutex<HashMap<(NodeId, String), Arc<Mutex<()>>>>,
}

impl SiblingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `(parent, name)`.
    ///
    /// Callers hold the returned mutex for the whole read-modify-write.
    pub fn slot(&self, parent: NodeId, name: &str) -> StoreResult<Arc<Mutex<()>>> {
        let mut slots = self.slots.lock().map_err(StoreError::poisoned)?;
        // Drop slots nobody else holds.
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        let slot = slots
            .entry((parent, name.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Ok(Arc::clone(slot))
    }

    /// Number of slots currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
