//! Typed requests.
//!
//! Every request carries its inputs as public fields and its results behind
//! accessors. The processor fills in the results, or attaches an error; it
//! never returns one.

use std::collections::{BTreeMap, BTreeSet};

use arbor_cache::CachePolicy;
use arbor_types::{Location, Property};

use crate::error::RequestError;

/// What a create does when the parent already has a child of that name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeConflictBehavior {
    /// Always add a new same-name sibling.
    #[default]
    Append,
    /// Return the existing child untouched.
    DoNotReplace,
    /// Remove the existing node, then create.
    Replace,
    /// Apply the properties to the existing node, creating it if missing.
    Update,
}

/// What a workspace create does when the name is taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CreateConflictBehavior {
    #[default]
    DoNotCreate,
    /// Append the first free counter (`name1`, `name2`, ...).
    CreateWithAdjustedName,
}

/// What a workspace clone does when the source is missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CloneConflictBehavior {
    #[default]
    DoNotClone,
    /// Create an empty target instead.
    SkipClone,
}

/// Outcome bookkeeping shared by every request.
#[derive(Debug, Default)]
pub struct RequestState {
    error: Option<RequestError>,
    cache_policy: Option<CachePolicy>,
}

/// Access to a request's outcome.
pub trait Outcome {
    fn state(&self) -> &RequestState;
    fn state_mut(&mut self) -> &mut RequestState;

    fn has_error(&self) -> bool {
        self.state().error.is_some()
    }

    fn error(&self) -> Option<&RequestError> {
        self.state().error.as_ref()
    }

    fn set_error(&mut self, error: RequestError) {
        self.state_mut().error = Some(error);
    }

    fn take_error(&mut self) -> Option<RequestError> {
        self.state_mut().error.take()
    }

    /// How long the results may be cached, for read requests.
    fn cache_policy(&self) -> Option<CachePolicy> {
        self.state().cache_policy
    }

    fn set_cache_policy(&mut self, policy: Option<CachePolicy>) {
        self.state_mut().cache_policy = policy;
    }
}

macro_rules! outcome {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Outcome for $ty {
                fn state(&self) -> &RequestState {
                    &self.state
                }

                fn state_mut(&mut self) -> &mut RequestState {
                    &mut self.state
                }
            }
        )*
    };
}

outcome!(
    CreateNode,
    ReadNode,
    ReadAllChildren,
    ReadAllProperties,
    UpdateProperties,
    DeleteBranch,
    CopyBranch,
    CloneBranch,
    MoveBranch,
    CreateWorkspace,
    DestroyWorkspace,
    CloneWorkspace,
    VerifyWorkspace,
    GetWorkspaces,
    Composite,
);

/// Create a child of `under` named `name`.
///
/// An identity property among `properties` supplies the new node's
/// identifier; empty properties are ignored.
#[derive(Debug)]
pub struct CreateNode {
    pub workspace: Option<String>,
    pub under: Location,
    pub name: String,
    pub properties: Vec<Property>,
    pub conflict: NodeConflictBehavior,
    pub(crate) actual_location: Option<Location>,
    pub(crate) state: RequestState,
}

impl CreateNode {
    pub fn new(under: impl Into<Location>, name: impl Into<String>) -> Self {
        Self {
            workspace: None,
            under: under.into(),
            name: name.into(),
            properties: Vec::new(),
            conflict: NodeConflictBehavior::default(),
            actual_location: None,
            state: RequestState::default(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_conflict(mut self, conflict: NodeConflictBehavior) -> Self {
        self.conflict = conflict;
        self
    }

    /// Path and identifier of the created (or reused) node.
    pub fn actual_location(&self) -> Option<&Location> {
        self.actual_location.as_ref()
    }
}

/// Read a node with its children and properties.
#[derive(Debug)]
pub struct ReadNode {
    pub workspace: Option<String>,
    pub at: Location,
    pub(crate) actual_location: Option<Location>,
    pub(crate) children: Vec<Location>,
    pub(crate) properties: BTreeMap<String, Property>,
    pub(crate) state: RequestState,
}

impl ReadNode {
    pub fn new(at: impl Into<Location>) -> Self {
        Self {
            workspace: None,
            at: at.into(),
            actual_location: None,
            children: Vec::new(),
            properties: BTreeMap::new(),
            state: RequestState::default(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn actual_location(&self) -> Option<&Location> {
        self.actual_location.as_ref()
    }

    pub fn children(&self) -> &[Location] {
        &self.children
    }

    /// Properties, including the identity property.
    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.properties
    }
}

#[derive(Debug)]
pub struct ReadAllChildren {
    pub workspace: Option<String>,
    pub of: Location,
    pub(crate) actual_location: Option<Location>,
    pub(crate) children: Vec<Location>,
    pub(crate) state: RequestState,
}

impl ReadAllChildren {
    pub fn new(of: impl Into<Location>) -> Self {
        Self {
            workspace: None,
            of: of.into(),
            actual_location: None,
            children: Vec::new(),
            state: RequestState::default(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn actual_location(&self) -> Option<&Location> {
        self.actual_location.as_ref()
    }

    /// Children in stored order, each with its actual path and identifier.
    pub fn children(&self) -> &[Location] {
        &self.children
    }
}

#[derive(Debug)]
pub struct ReadAllProperties {
    pub workspace: Option<String>,
    pub of: Location,
    pub(crate) actual_location: Option<Location>,
    pub(crate) properties: BTreeMap<String, Property>,
    pub(crate) state: RequestState,
}

impl ReadAllProperties {
    pub fn new(of: impl Into<Location>) -> Self {
        Self {
            workspace: None,
            of: of.into(),
            actual_location: None,
            properties: BTreeMap::new(),
            state: RequestState::default(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn actual_location(&self) -> Option<&Location> {
        self.actual_location.as_ref()
    }

    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }
}

/// Set or remove properties. A property with no values is removed.
#[derive(Debug)]
pub struct UpdateProperties {
    pub workspace: Option<String>,
    pub on: Location,
    pub properties: Vec<Property>,
    pub(crate) actual_location: Option<Location>,
    pub(crate) created: BTreeSet<String>,
    pub(crate) state: RequestState,
}

impl UpdateProperties {
    pub fn new(on: impl Into<Location>, properties: Vec<Property>) -> Self {
        Self {
            workspace: None,
            on: on.into(),
            properties,
            actual_location: None,
            created: BTreeSet::new(),
            state: RequestState::default(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn actual_location(&self) -> Option<&Location> {
        self.actual_location.as_ref()
    }

    /// Names of properties that did not exist before the update.
    pub fn created(&self) -> &BTreeSet<String> {
        &self.created
    }
}

/// Remove a node and everything below it.
#[derive(Debug)]
pub struct DeleteBranch {
    pub workspace: Option<String>,
    pub at: Location,
    pub(crate) actual_location: Option<Location>,
    pub(crate) state: RequestState,
}

impl DeleteBranch {
    pub fn new(at: impl Into<Location>) -> Self {
        Self {
            workspace: None,
            at: at.into(),
            actual_location: None,
            state: RequestState::default(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Where the branch was before it was removed.
    pub fn actual_location(&self) -> Option<&Location> {
        self.actual_location.as_ref()
    }
}

/// Copy a node (and, when `recursive`, its descendants) under another
/// parent, possibly in another workspace. Copies get fresh identifiers.
#[derive(Debug)]
pub struct CopyBranch {
    pub from_workspace: Option<String>,
    pub from: Location,
    pub into_workspace: Option<String>,
    pub into: Location,
    pub desired_name: Option<String>,
    pub recursive: bool,
    pub(crate) actual_from: Option<Location>,
    pub(crate) actual_into: Option<Location>,
    pub(crate) state: RequestState,
}

impl CopyBranch {
    pub fn new(from: impl Into<Location>, into: impl Into<Location>) -> Self {
        Self {
            from_workspace: None,
            from: from.into(),
            into_workspace: None,
            into: into.into(),
            desired_name: None,
            recursive: true,
            actual_from: None,
            actual_into: None,
            state: RequestState::default(),
        }
    }

    pub fn between(mut self, from: impl Into<String>, into: impl Into<String>) -> Self {
        self.from_workspace = Some(from.into());
        self.into_workspace = Some(into.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.desired_name = Some(name.into());
        self
    }

    /// Copy only the node itself.
    pub fn node_only(mut self) -> Self {
        self.recursive = false;
        self
    }

    pub fn actual_from(&self) -> Option<&Location> {
        self.actual_from.as_ref()
    }

    /// Location of the copy's root.
    pub fn actual_into(&self) -> Option<&Location> {
        self.actual_into.as_ref()
    }
}

/// Copy a branch under another parent, usually in another workspace,
/// keeping every identifier.
///
/// Nodes in the target workspace that already carry one of the branch's
/// identifiers make the request fail, unless `remove_existing` is set, in
/// which case they are removed first and reported by
/// [`removed`](CloneBranch::removed).
#[derive(Debug)]
pub struct CloneBranch {
    pub from_workspace: Option<String>,
    pub from: Location,
    pub into_workspace: Option<String>,
    pub into: Location,
    pub desired_name: Option<String>,
    pub remove_existing: bool,
    pub(crate) actual_from: Option<Location>,
    pub(crate) actual_into: Option<Location>,
    pub(crate) removed: Vec<Location>,
    pub(crate) state: RequestState,
}

impl CloneBranch {
    pub fn new(from: impl Into<Location>, into: impl Into<Location>) -> Self {
        Self {
            from_workspace: None,
            from: from.into(),
            into_workspace: None,
            into: into.into(),
            desired_name: None,
            remove_existing: false,
            actual_from: None,
            actual_into: None,
            removed: Vec::new(),
            state: RequestState::default(),
        }
    }

    pub fn between(mut self, from: impl Into<String>, into: impl Into<String>) -> Self {
        self.from_workspace = Some(from.into());
        self.into_workspace = Some(into.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.desired_name = Some(name.into());
        self
    }

    pub fn removing_existing(mut self) -> Self {
        self.remove_existing = true;
        self
    }

    pub fn actual_from(&self) -> Option<&Location> {
        self.actual_from.as_ref()
    }

    /// Location of the clone's root.
    pub fn actual_into(&self) -> Option<&Location> {
        self.actual_into.as_ref()
    }

    /// Target nodes removed because they shared an identifier with the
    /// branch, where they were before removal.
    pub fn removed(&self) -> &[Location] {
        &self.removed
    }
}

/// Move a node under `into`, or next to `before`, keeping its identifier.
///
/// With only `before`, the new parent is `before`'s parent. With neither,
/// the request is invalid.
#[derive(Debug)]
pub struct MoveBranch {
    pub workspace: Option<String>,
    pub from: Location,
    pub into: Option<Location>,
    pub before: Option<Location>,
    pub desired_name: Option<String>,
    pub(crate) actual_old: Option<Location>,
    pub(crate) actual_new: Option<Location>,
    pub(crate) state: RequestState,
}

impl MoveBranch {
    pub fn new(from: impl Into<Location>) -> Self {
        Self {
            workspace: None,
            from: from.into(),
            into: None,
            before: None,
            desired_name: None,
            actual_old: None,
            actual_new: None,
            state: RequestState::default(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn into_parent(mut self, parent: impl Into<Location>) -> Self {
        self.into = Some(parent.into());
        self
    }

    pub fn before(mut self, sibling: impl Into<Location>) -> Self {
        self.before = Some(sibling.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.desired_name = Some(name.into());
        self
    }

    pub fn actual_old_location(&self) -> Option<&Location> {
        self.actual_old.as_ref()
    }

    pub fn actual_new_location(&self) -> Option<&Location> {
        self.actual_new.as_ref()
    }
}

#[derive(Debug)]
pub struct CreateWorkspace {
    pub name: String,
    pub conflict: CreateConflictBehavior,
    pub(crate) actual_name: Option<String>,
    pub(crate) actual_root: Option<Location>,
    pub(crate) state: RequestState,
}

impl CreateWorkspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conflict: CreateConflictBehavior::default(),
            actual_name: None,
            actual_root: None,
            state: RequestState::default(),
        }
    }

    pub fn with_conflict(mut self, conflict: CreateConflictBehavior) -> Self {
        self.conflict = conflict;
        self
    }

    /// The name the workspace was created under.
    pub fn actual_name(&self) -> Option<&str> {
        self.actual_name.as_deref()
    }

    pub fn actual_root(&self) -> Option<&Location> {
        self.actual_root.as_ref()
    }
}

#[derive(Debug)]
pub struct DestroyWorkspace {
    pub name: String,
    pub(crate) actual_root: Option<Location>,
    pub(crate) state: RequestState,
}

impl DestroyWorkspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actual_root: None,
            state: RequestState::default(),
        }
    }

    pub fn actual_root(&self) -> Option<&Location> {
        self.actual_root.as_ref()
    }
}

/// Create `target` as a copy of `source`, identifiers included.
#[derive(Debug)]
pub struct CloneWorkspace {
    pub source: String,
    pub target: String,
    pub target_conflict: CreateConflictBehavior,
    pub clone_conflict: CloneConflictBehavior,
    pub(crate) actual_name: Option<String>,
    pub(crate) actual_root: Option<Location>,
    pub(crate) state: RequestState,
}

impl CloneWorkspace {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            target_conflict: CreateConflictBehavior::default(),
            clone_conflict: CloneConflictBehavior::default(),
            actual_name: None,
            actual_root: None,
            state: RequestState::default(),
        }
    }

    pub fn with_target_conflict(mut self, conflict: CreateConflictBehavior) -> Self {
        self.target_conflict = conflict;
        self
    }

    pub fn with_clone_conflict(mut self, conflict: CloneConflictBehavior) -> Self {
        self.clone_conflict = conflict;
        self
    }

    pub fn actual_name(&self) -> Option<&str> {
        self.actual_name.as_deref()
    }

    pub fn actual_root(&self) -> Option<&Location> {
        self.actual_root.as_ref()
    }
}

/// Check that a workspace exists. `None` names the default workspace.
#[derive(Debug, Default)]
pub struct VerifyWorkspace {
    pub name: Option<String>,
    pub(crate) actual_name: Option<String>,
    pub(crate) actual_root: Option<Location>,
    pub(crate) state: RequestState,
}

impl VerifyWorkspace {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn actual_name(&self) -> Option<&str> {
        self.actual_name.as_deref()
    }

    pub fn actual_root(&self) -> Option<&Location> {
        self.actual_root.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct GetWorkspaces {
    pub(crate) names: BTreeSet<String>,
    pub(crate) state: RequestState,
}

impl GetWorkspaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }
}

/// An ordered batch. Every member is processed even when an earlier one
/// fails; the batch itself fails if any member did.
#[derive(Debug, Default)]
pub struct Composite {
    pub requests: Vec<Request>,
    pub(crate) state: RequestState,
}

impl Composite {
    pub fn new(requests: Vec<Request>) -> Self {
        Self {
            requests,
            state: RequestState::default(),
        }
    }

    pub fn push(&mut self, request: impl Into<Request>) {
        self.requests.push(request.into());
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Every request the processor understands.
#[derive(Debug)]
pub enum Request {
    CreateNode(CreateNode),
    ReadNode(ReadNode),
    ReadAllChildren(ReadAllChildren),
    ReadAllProperties(ReadAllProperties),
    UpdateProperties(UpdateProperties),
    DeleteBranch(DeleteBranch),
    CopyBranch(CopyBranch),
    CloneBranch(CloneBranch),
    MoveBranch(MoveBranch),
    CreateWorkspace(CreateWorkspace),
    DestroyWorkspace(DestroyWorkspace),
    CloneWorkspace(CloneWorkspace),
    VerifyWorkspace(VerifyWorkspace),
    GetWorkspaces(GetWorkspaces),
    Composite(Composite),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::CreateNode(_) => "create-node",
            Request::ReadNode(_) => "read-node",
            Request::ReadAllChildren(_) => "read-all-children",
            Request::ReadAllProperties(_) => "read-all-properties",
            Request::UpdateProperties(_) => "update-properties",
            Request::DeleteBranch(_) => "delete-branch",
            Request::CopyBranch(_) => "copy-branch",
            Request::CloneBranch(_) => "clone-branch",
            Request::MoveBranch(_) => "move-branch",
            Request::CreateWorkspace(_) => "create-workspace",
            Request::DestroyWorkspace(_) => "destroy-workspace",
            Request::CloneWorkspace(_) => "clone-workspace",
            Request::VerifyWorkspace(_) => "verify-workspace",
            Request::GetWorkspaces(_) => "get-workspaces",
            Request::Composite(_) => "composite",
        }
    }

    /// Whether the request changes content or workspaces. A batch is an
    /// update if any member is.
    pub fn is_update(&self) -> bool {
        match self {
            Request::ReadNode(_)
            | Request::ReadAllChildren(_)
            | Request::ReadAllProperties(_)
            | Request::VerifyWorkspace(_)
            | Request::GetWorkspaces(_) => false,
            Request::Composite(batch) => batch.requests.iter().any(Request::is_update),
            _ => true,
        }
    }

    fn outcome(&self) -> &dyn Outcome {
        match self {
            Request::CreateNode(r) => r,
            Request::ReadNode(r) => r,
            Request::ReadAllChildren(r) => r,
            Request::ReadAllProperties(r) => r,
            Request::UpdateProperties(r) => r,
            Request::DeleteBranch(r) => r,
            Request::CopyBranch(r) => r,
            Request::CloneBranch(r) => r,
            Request::MoveBranch(r) => r,
            Request::CreateWorkspace(r) => r,
            Request::DestroyWorkspace(r) => r,
            Request::CloneWorkspace(r) => r,
            Request::VerifyWorkspace(r) => r,
            Request::GetWorkspaces(r) => r,
            Request::Composite(r) => r,
        }
    }

    fn outcome_mut(&mut self) -> &mut dyn Outcome {
        match self {
            Request::CreateNode(r) => r,
            Request::ReadNode(r) => r,
            Request::ReadAllChildren(r) => r,
            Request::ReadAllProperties(r) => r,
            Request::UpdateProperties(r) => r,
            Request::DeleteBranch(r) => r,
            Request::CopyBranch(r) => r,
            Request::CloneBranch(r) => r,
            Request::MoveBranch(r) => r,
            Request::CreateWorkspace(r) => r,
            Request::DestroyWorkspace(r) => r,
            Request::CloneWorkspace(r) => r,
            Request::VerifyWorkspace(r) => r,
            Request::GetWorkspaces(r) => r,
            Request::Composite(r) => r,
        }
    }
}

impl Outcome for Request {
    fn state(&self) -> &RequestState {
        self.outcome().state()
    }

    fn state_mut(&mut self) -> &mut RequestState {
        self.outcome_mut().state_mut()
    }
}

macro_rules! into_request {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Request {
                fn from(request: $variant) -> Self {
                    Request::$variant(request)
                }
            }
        )*
    };
}

into_request!(
    CreateNode,
    ReadNode,
    ReadAllChildren,
    ReadAllProperties,
    UpdateProperties,
    DeleteBranch,
    CopyBranch,
    CloneBranch,
    MoveBranch,
    CreateWorkspace,
    DestroyWorkspace,
    CloneWorkspace,
    VerifyWorkspace,
    GetWorkspaces,
    Composite,
);

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::Path;

    #[test]
    fn builders_fill_inputs() {
        let create = CreateNode::new(Path::root(), "a")
            .in_workspace("staging")
            .with_property(Property::single("title", "A"))
            .with_conflict(NodeConflictBehavior::Replace);
        assert_eq!(create.workspace.as_deref(), Some("staging"));
        assert_eq!(create.name, "a");
        assert_eq!(create.properties.len(), 1);
        assert_eq!(create.conflict, NodeConflictBehavior::Replace);
        assert!(create.actual_location().is_none());

        let copy = CopyBranch::new(Path::root(), Path::root()).node_only();
        assert!(!copy.recursive);

        let clone = CloneBranch::new(Path::root(), Path::root())
            .between("default", "other")
            .removing_existing();
        assert!(clone.remove_existing);
        assert_eq!(clone.into_workspace.as_deref(), Some("other"));
        assert!(clone.removed().is_empty());
    }

    #[test]
    fn update_classification() {
        let read: Request = ReadNode::new(Path::root()).into();
        let delete: Request = DeleteBranch::new(Path::root()).into();
        assert!(!read.is_update());
        assert!(delete.is_update());

        let mut batch = Composite::default();
        batch.push(GetWorkspaces::new());
        assert!(!Request::from(batch).is_update());

        let mut batch = Composite::default();
        batch.push(GetWorkspaces::new());
        batch.push(CreateWorkspace::new("w"));
        assert_eq!(batch.len(), 2);
        assert!(Request::from(batch).is_update());
    }

    #[test]
    fn errors_attach_through_the_enum() {
        let mut request: Request = VerifyWorkspace::new(Some("w".into())).into();
        assert!(!request.has_error());
        request.set_error(RequestError::WorkspaceDoesNotExist("w".into()));
        assert!(matches!(
            request.error(),
            Some(RequestError::WorkspaceDoesNotExist(name)) if name == "w"
        ));
        assert_eq!(request.kind(), "verify-workspace");
    }
}
