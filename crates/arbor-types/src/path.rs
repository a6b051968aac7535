//! Path segments and absolute paths.
//!
//! A [`Path`] is an ordered list of [`Segment`]s starting at the workspace
//! root. Each segment is a name plus an optional 1-based same-name-sibling
//! index. The textual form is the familiar `/a/b[2]/c`.
//!
//! # Index semantics
//!
//! A segment without an index is *not* equal to the same name with index 1.
//! Stores never keep index 1 on a sole sibling; the index only appears once
//! a second sibling of the same name exists. To keep paths written by hand
//! usable, [`Segment::addresses`] lets a requested `b[1]` address a stored,
//! unindexed `b`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Characters that may not appear in a segment name.
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '[', ']'];

/// One element of a path: a name plus an optional same-name-sibling index.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Segment {
    name: String,
    index: Option<u32>,
}

impl Segment {
    /// A segment with no same-name-sibling index.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    /// A segment with the given 1-based index. An index of 0 means no index.
    pub fn indexed(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index: (index > 0).then_some(index),
        }
    }

    /// Check that `name` can be used as a segment name.
    pub fn validate_name(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidSegment {
                input: name.to_string(),
                reason: "name must not be empty".into(),
            });
        }
        if let Some(ch) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
            return Err(TypeError::InvalidSegment {
                input: name.to_string(),
                reason: format!("contains forbidden character: {ch:?}"),
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// The index this segment occupies among its same-named siblings,
    /// counting an unindexed segment as the first.
    pub fn position(&self) -> u32 {
        self.index.unwrap_or(1)
    }

    /// The same name with a different (or no) index.
    pub fn with_index(&self, index: Option<u32>) -> Self {
        Self {
            name: self.name.clone(),
            index: index.filter(|i| *i > 0),
        }
    }

    pub fn without_index(&self) -> Self {
        self.with_index(None)
    }

    /// Whether this segment, used in a lookup, addresses the `stored` one.
    ///
    /// Exact matches always address; additionally `name[1]` addresses a
    /// stored, unindexed `name`.
    pub fn addresses(&self, stored: &Segment) -> bool {
        if self == stored {
            return true;
        }
        self.name == stored.name && self.index == Some(1) && stored.index.is_none()
    }
}

impl FromStr for Segment {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TypeError::InvalidSegment {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let Some(open) = s.find('[') else {
            Segment::validate_name(s)?;
            return Ok(Segment::new(s));
        };
        let Some(digits) = s[open + 1..].strip_suffix(']') else {
            return Err(invalid("unterminated index"));
        };
        let name = &s[..open];
        Segment::validate_name(name)?;
        let index: u32 = digits
            .parse()
            .map_err(|_| invalid("index is not a positive integer"))?;
        if index == 0 {
            return Err(invalid("indexes start at 1"));
        }
        Ok(Segment::indexed(name, index))
    }
}

impl TryFrom<String> for Segment {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Segment> for String {
    fn from(segment: Segment) -> Self {
        segment.to_string()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{index}]", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment({self})")
    }
}

/// An absolute path from the workspace root. The root path has no segments.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments below the root.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        Some(self.subpath(self.depth() - 1))
    }

    /// The path formed by the first `len` segments.
    pub fn subpath(&self, len: usize) -> Path {
        Self {
            segments: self.segments[..len.min(self.depth())].to_vec(),
        }
    }

    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Shorthand for a child with an unindexed segment.
    pub fn child_named(&self, name: &str) -> Path {
        self.child(Segment::new(name))
    }

    /// A sibling path: the same parent with a different last segment.
    /// The root has no siblings and is returned unchanged.
    pub fn with_last_segment(&self, segment: Segment) -> Path {
        match self.parent() {
            Some(parent) => parent.child(segment),
            None => self.clone(),
        }
    }

    /// Whether this path is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.depth() < other.depth() && other.segments.starts_with(&self.segments)
    }

    /// Whether this path equals `ancestor` or lies below it.
    pub fn is_at_or_below(&self, ancestor: &Path) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }

    /// Replace the `from` prefix of this path with `to`.
    ///
    /// Returns `None` when this path is not at or below `from`.
    pub fn rebase(&self, from: &Path, to: &Path) -> Option<Path> {
        if !self.is_at_or_below(from) {
            return None;
        }
        let mut segments = to.segments.clone();
        segments.extend_from_slice(&self.segments[from.depth()..]);
        Some(Self { segments })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

impl FromStr for Path {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix('/') else {
            return Err(TypeError::InvalidPath {
                input: s.to_string(),
                reason: "paths must be absolute".into(),
            });
        };
        if rest.is_empty() {
            return Ok(Path::root());
        }
        let segments = rest
            .split('/')
            .map(|part| {
                part.parse::<Segment>().map_err(|e| TypeError::InvalidPath {
                    input: s.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Path { segments })
    }
}

impl TryFrom<String> for Path {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}
