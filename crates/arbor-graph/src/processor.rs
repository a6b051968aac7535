//! Request dispatch.
//!
//! [`RequestProcessor::process`] is the single entry point: it matches on
//! the request kind, runs the handler against the repository's stores and
//! keeps each workspace's location cache in step with what the store
//! reports. A handler failure is attached to the request.

use std::sync::Arc;

use arbor_store::{Backend, IdPolicy, StoreError, WorkspaceStore};
use arbor_types::{Location, NodeId, Path, Property, Segment};
use tracing::debug;

use crate::error::{RequestError, RequestResult};
use crate::repository::{Repository, Workspace};
use crate::request::{
    CloneBranch, CloneConflictBehavior, CloneWorkspace, Composite, CopyBranch, CreateNode,
    CreateWorkspace, DeleteBranch, DestroyWorkspace, GetWorkspaces, MoveBranch,
    NodeConflictBehavior, Outcome, ReadAllChildren, ReadAllProperties, ReadNode, Request,
    UpdateProperties, VerifyWorkspace,
};

/// Executes requests against one repository.
pub struct RequestProcessor<'a, B: Backend> {
    repository: &'a Repository<B>,
}

impl<'a, B: Backend> RequestProcessor<'a, B> {
    pub fn new(repository: &'a Repository<B>) -> Self {
        Self { repository }
    }

    pub fn process(&self, request: &mut Request) {
        let kind = request.kind();
        debug!(source = self.repository.source_name(), kind, "processing request");

        let result = self
            .check_allowed(request)
            .and_then(|()| self.dispatch(request));

        match result {
            Ok(()) => {
                if !request.is_update() {
                    request.set_cache_policy(self.repository.config().default_cache_policy);
                }
            }
            Err(e) => {
                debug!(kind, error = %e, "request failed");
                request.set_error(e);
            }
        }
    }

    fn dispatch(&self, request: &mut Request) -> RequestResult<()> {
        match request {
            Request::CreateNode(r) => self.create_node(r),
            Request::ReadNode(r) => self.read_node(r),
            Request::ReadAllChildren(r) => self.read_all_children(r),
            Request::ReadAllProperties(r) => self.read_all_properties(r),
            Request::UpdateProperties(r) => self.update_properties(r),
            Request::DeleteBranch(r) => self.delete_branch(r),
            Request::CopyBranch(r) => self.copy_branch(r),
            Request::CloneBranch(r) => self.clone_branch(r),
            Request::MoveBranch(r) => self.move_branch(r),
            Request::CreateWorkspace(r) => self.create_workspace(r),
            Request::DestroyWorkspace(r) => self.destroy_workspace(r),
            Request::CloneWorkspace(r) => self.clone_workspace(r),
            Request::VerifyWorkspace(r) => self.verify_workspace(r),
            Request::GetWorkspaces(r) => self.get_workspaces(r),
            Request::Composite(r) => self.composite(r),
        }
    }

    fn check_allowed(&self, request: &Request) -> RequestResult<()> {
        let config = self.repository.config();
        match request {
            // Members of a batch are checked one by one.
            Request::Composite(_) => Ok(()),
            _ if request.is_update() && !config.updates_allowed => {
                Err(RequestError::ReadOnly(config.source_name.clone()))
            }
            Request::CreateWorkspace(_) | Request::CloneWorkspace(_)
                if !config.creating_workspaces_allowed =>
            {
                Err(RequestError::InvalidArgument(format!(
                    "source {} does not allow creating workspaces",
                    config.source_name
                )))
            }
            _ => Ok(()),
        }
    }

    fn workspace(&self, name: Option<&str>) -> RequestResult<Arc<Workspace<B::Store>>> {
        self.repository.workspace(name)
    }

    /// Separate identity properties from the rest. The first value of an
    /// identity property becomes the node's identifier.
    fn split_identity(
        &self,
        properties: &[Property],
    ) -> RequestResult<(Option<NodeId>, Vec<Property>)> {
        let identity = self.repository.identity();
        let mut id = None;
        let mut rest = Vec::with_capacity(properties.len());
        for property in properties {
            if identity.is_identity(property.name()) {
                if let Some(value) = property.first() {
                    id = Some(NodeId::from_value(value)?);
                }
            } else if !property.is_empty() {
                rest.push(property.clone());
            }
        }
        Ok((id, rest))
    }

    fn child_locations(
        ws: &Workspace<B::Store>,
        id: NodeId,
        path: &Path,
    ) -> RequestResult<Vec<Location>> {
        Ok(ws
            .store()
            .children(id)?
            .into_iter()
            .map(|child| Location::new(path.child(child.segment), child.id))
            .collect())
    }

    /// The first child of `parent` named `name`, or, when `id` is given and
    /// exists, that node.
    fn existing_node(
        ws: &Workspace<B::Store>,
        parent: NodeId,
        name: &str,
        id: Option<NodeId>,
    ) -> RequestResult<Option<NodeId>> {
        if let Some(id) = id {
            if ws.store().contains(id)? {
                return Ok(Some(id));
            }
        }
        Ok(ws
            .store()
            .children(parent)?
            .into_iter()
            .find(|child| child.segment.name() == name)
            .map(|child| child.id))
    }

    /// Remove `id` and its descendants, keeping the cache in step. Removing
    /// the root empties the workspace instead.
    fn remove_node(ws: &Workspace<B::Store>, id: NodeId) -> RequestResult<Path> {
        let path = ws.store().resolve_id(id)?;
        if path.is_root() {
            ws.store().clear()?;
            ws.remember(|cache| cache.clear());
            return Ok(path);
        }
        let segment = path
            .last_segment()
            .cloned()
            .ok_or_else(|| StoreError::Consistency(format!("node {id} has no segment")))?;
        let parent = ws
            .store()
            .parent_of(id)?
            .ok_or_else(|| StoreError::Consistency(format!("node {id} at {path} has no parent")))?;
        let removed = ws.store().remove_child(parent, &segment)?;
        ws.remember(|cache| cache.remove_branch(&path).map(|_| ()));
        debug!(workspace = ws.name(), path = %path, nodes = removed.count, "removed branch");
        Ok(path)
    }

    fn create_node(&self, r: &mut CreateNode) -> RequestResult<()> {
        Segment::validate_name(&r.name)?;
        let ws = self.workspace(r.workspace.as_deref())?;
        let (parent, parent_path) = ws.resolve(&r.under)?;
        let (id, properties) = self.split_identity(&r.properties)?;

        let existing = match r.conflict {
            NodeConflictBehavior::Append => None,
            NodeConflictBehavior::DoNotReplace => Self::existing_node(&ws, parent, &r.name, None)?,
            NodeConflictBehavior::Replace | NodeConflictBehavior::Update => {
                Self::existing_node(&ws, parent, &r.name, id)?
            }
        };

        match (r.conflict, existing) {
            (NodeConflictBehavior::DoNotReplace, Some(existing)) => {
                r.actual_location = Some(ws.store().location_of(existing)?);
                return Ok(());
            }
            (NodeConflictBehavior::Update, Some(existing)) => {
                for property in properties {
                    ws.store().set_property(existing, property)?;
                }
                r.actual_location = Some(ws.store().location_of(existing)?);
                return Ok(());
            }
            (NodeConflictBehavior::Replace, Some(existing)) => {
                Self::remove_node(&ws, existing)?;
            }
            _ => {}
        }

        // Removing a node found by identifier can renumber the parent's ancestors.
        let parent_path = match r.conflict {
            NodeConflictBehavior::Replace => ws.store().resolve_id(parent)?,
            _ => parent_path,
        };
        let inserted = ws.store().insert_child(parent, &r.name, id, properties, None)?;
        let actual = Location::new(parent_path.child(inserted.segment.clone()), inserted.id);
        ws.remember(|cache| {
            cache.add_child(
                &parent_path,
                actual.clone(),
                Some(inserted.position),
                &inserted.renamed,
            )
        });
        debug!(workspace = ws.name(), at = %actual, "created node");
        r.actual_location = Some(actual);
        Ok(())
    }

    fn read_node(&self, r: &mut ReadNode) -> RequestResult<()> {
        let ws = self.workspace(r.workspace.as_deref())?;
        let (id, path) = ws.resolve(&r.at)?;
        let children = Self::child_locations(&ws, id, &path)?;
        let mut properties = ws.store().properties(id)?;
        let identity = self.repository.identity().identity_property().to_string();
        properties.insert(
            identity.clone(),
            Property::single(identity, self.repository.values().identity(id)),
        );
        ws.remember(|cache| cache.set_children(&path, Some(children.clone())));

        r.actual_location = Some(Location::new(path, id));
        r.children = children;
        r.properties = properties;
        Ok(())
    }

    fn read_all_children(&self, r: &mut ReadAllChildren) -> RequestResult<()> {
        let ws = self.workspace(r.workspace.as_deref())?;
        let (id, path) = ws.resolve(&r.of)?;
        let children = Self::child_locations(&ws, id, &path)?;
        ws.remember(|cache| cache.set_children(&path, Some(children.clone())));

        r.actual_location = Some(Location::new(path, id));
        r.children = children;
        Ok(())
    }

    fn read_all_properties(&self, r: &mut ReadAllProperties) -> RequestResult<()> {
        let ws = self.workspace(r.workspace.as_deref())?;
        let (id, path) = ws.resolve(&r.of)?;
        let mut properties = ws.store().properties(id)?;
        let identity = self.repository.identity().identity_property().to_string();
        properties.insert(
            identity.clone(),
            Property::single(identity, self.repository.values().identity(id)),
        );

        r.actual_location = Some(Location::new(path, id));
        r.properties = properties;
        Ok(())
    }

    fn update_properties(&self, r: &mut UpdateProperties) -> RequestResult<()> {
        let ws = self.workspace(r.workspace.as_deref())?;
        let (id, path) = ws.resolve(&r.on)?;
        let identity = self.repository.identity();
        let existing = ws.store().properties(id)?;

        for property in &r.properties {
            // Identity cannot be changed through properties.
            if identity.is_identity(property.name()) {
                continue;
            }
            if property.is_empty() {
                ws.store().remove_property(id, property.name())?;
                continue;
            }
            if !existing.contains_key(property.name()) {
                r.created.insert(property.name().to_string());
            }
            ws.store().set_property(id, property.clone())?;
        }

        debug!(
            workspace = ws.name(),
            path = %path,
            updated = r.properties.len(),
            created = r.created.len(),
            "updated properties"
        );
        r.actual_location = Some(Location::new(path, id));
        Ok(())
    }

    fn delete_branch(&self, r: &mut DeleteBranch) -> RequestResult<()> {
        let ws = self.workspace(r.workspace.as_deref())?;
        let (id, _) = ws.resolve(&r.at)?;
        let path = Self::remove_node(&ws, id)?;
        r.actual_location = Some(Location::new(path, id));
        Ok(())
    }

    fn copy_branch(&self, r: &mut CopyBranch) -> RequestResult<()> {
        let source = self.workspace(r.from_workspace.as_deref())?;
        let target = self.workspace(r.into_workspace.as_deref())?;
        let (from, from_path) = source.resolve(&r.from)?;
        let (into, into_path) = target.resolve(&r.into)?;

        let name = match (&r.desired_name, from_path.last_segment()) {
            (Some(name), _) => {
                Segment::validate_name(name)?;
                name.clone()
            }
            (None, Some(segment)) => segment.name().to_string(),
            (None, None) => {
                return Err(RequestError::InvalidArgument(
                    "copying the root needs a name for the copy".into(),
                ))
            }
        };

        let mut branch = source.store().snapshot(from)?;
        if !r.recursive {
            branch.children.clear();
        }
        let placed = target
            .store()
            .insert_branch(into, &branch, Some(&name), IdPolicy::Regenerate, None)?;
        let inserted = placed.inserted;
        let actual = Location::new(into_path.child(inserted.segment.clone()), inserted.id);
        target.remember(|cache| {
            cache.add_child(&into_path, actual.clone(), Some(inserted.position), &inserted.renamed)
        });

        debug!(
            from = %from_path,
            into = %actual,
            nodes = placed.id_map.len(),
            "copied branch"
        );
        r.actual_from = Some(Location::new(from_path, from));
        r.actual_into = Some(actual);
        Ok(())
    }

    fn clone_branch(&self, r: &mut CloneBranch) -> RequestResult<()> {
        let source = self.workspace(r.from_workspace.as_deref())?;
        let target = self.workspace(r.into_workspace.as_deref())?;
        let (from, from_path) = source.resolve(&r.from)?;
        let (into, _) = target.resolve(&r.into)?;

        let name = match (&r.desired_name, from_path.last_segment()) {
            (Some(name), _) => {
                Segment::validate_name(name)?;
                name.clone()
            }
            (None, Some(segment)) => segment.name().to_string(),
            (None, None) => {
                return Err(RequestError::InvalidArgument(
                    "the root of a workspace cannot be cloned".into(),
                ))
            }
        };

        let branch = source.store().snapshot(from)?;
        // Descendants come before their ancestors so each clash is reported.
        let mut clashing = Vec::new();
        for id in branch.ids().into_iter().rev() {
            if target.store().contains(id)? {
                clashing.push(id);
            }
        }

        if let Some(&id) = clashing.first() {
            if !r.remove_existing {
                return Err(RequestError::IdentifierExists {
                    id,
                    path: target.store().resolve_id(id)?,
                    workspace: target.name().to_string(),
                });
            }
        }
        for id in clashing {
            // Removing an ancestor earlier may already have taken this node.
            if target.store().contains(id)? {
                let path = Self::remove_node(&target, id)?;
                r.removed.push(Location::new(path, id));
            }
        }

        let into_path = target.store().resolve_id(into)?;
        let placed = target
            .store()
            .insert_branch(into, &branch, Some(&name), IdPolicy::Preserve, None)?;
        let inserted = placed.inserted;
        let actual = Location::new(into_path.child(inserted.segment.clone()), inserted.id);
        target.remember(|cache| {
            cache.add_child(&into_path, actual.clone(), Some(inserted.position), &inserted.renamed)
        });

        debug!(
            from = %from_path,
            into = %actual,
            nodes = placed.id_map.len(),
            removed = r.removed.len(),
            "cloned branch"
        );
        r.actual_from = Some(Location::new(from_path, from));
        r.actual_into = Some(actual);
        Ok(())
    }

    fn move_branch(&self, r: &mut MoveBranch) -> RequestResult<()> {
        let ws = self.workspace(r.workspace.as_deref())?;
        let (id, old_path) = ws.resolve(&r.from)?;
        let before = r
            .before
            .as_ref()
            .map(|location| ws.resolve(location).map(|(sibling, _)| sibling))
            .transpose()?;
        let new_parent = match (&r.into, before) {
            (Some(into), _) => ws.resolve(into)?.0,
            (None, Some(before)) => ws.store().parent_of(before)?.ok_or_else(|| {
                RequestError::InvalidArgument("the root has no siblings to move before".into())
            })?,
            (None, None) => {
                return Err(RequestError::InvalidArgument(
                    "a move needs a new parent or a sibling to precede".into(),
                ))
            }
        };
        if let Some(name) = &r.desired_name {
            Segment::validate_name(name)?;
        }

        let relocated = ws
            .store()
            .relocate(id, new_parent, r.desired_name.as_deref(), before)?;
        let moved = Location::new(relocated.new_path.clone(), id);
        if !relocated.unchanged {
            ws.remember(|cache| {
                cache.move_node(
                    &old_path,
                    moved.clone(),
                    Some(relocated.position),
                    &relocated.target_renamed,
                )
            });
        }

        r.actual_old = Some(Location::new(relocated.old_path, id));
        r.actual_new = Some(moved);
        Ok(())
    }

    fn create_workspace(&self, r: &mut CreateWorkspace) -> RequestResult<()> {
        let ws = self.repository.create_workspace(&r.name, r.conflict)?;
        r.actual_name = Some(ws.name().to_string());
        r.actual_root = Some(Location::new(Path::root(), ws.store().root()));
        Ok(())
    }

    fn destroy_workspace(&self, r: &mut DestroyWorkspace) -> RequestResult<()> {
        let ws = self.repository.destroy_workspace(&r.name)?;
        r.actual_root = Some(Location::new(Path::root(), ws.store().root()));
        Ok(())
    }

    fn clone_workspace(&self, r: &mut CloneWorkspace) -> RequestResult<()> {
        let source = match self.workspace(Some(&r.source)) {
            Ok(ws) => Some(ws),
            Err(RequestError::WorkspaceDoesNotExist(_)) => None,
            Err(e) => return Err(e),
        };
        if source.is_none() && r.clone_conflict == CloneConflictBehavior::DoNotClone {
            return Err(RequestError::WorkspaceDoesNotExist(r.source.clone()));
        }

        let target = self.repository.create_workspace(&r.target, r.target_conflict)?;
        let root = target.store().root();
        if let Some(source) = source {
            let from = source.store().root();
            for property in source.store().properties(from)?.into_values() {
                target.store().set_property(root, property)?;
            }
            for child in source.store().children(from)? {
                let branch = source.store().snapshot(child.id)?;
                target
                    .store()
                    .insert_branch(root, &branch, None, IdPolicy::Preserve, None)?;
            }
            debug!(source = %r.source, target = target.name(), "cloned workspace");
        }

        r.actual_name = Some(target.name().to_string());
        r.actual_root = Some(Location::new(Path::root(), root));
        Ok(())
    }

    fn verify_workspace(&self, r: &mut VerifyWorkspace) -> RequestResult<()> {
        let ws = self.workspace(r.name.as_deref())?;
        r.actual_name = Some(ws.name().to_string());
        r.actual_root = Some(Location::new(Path::root(), ws.store().root()));
        Ok(())
    }

    fn get_workspaces(&self, r: &mut GetWorkspaces) -> RequestResult<()> {
        r.names = self.repository.workspace_names()?;
        Ok(())
    }

    fn composite(&self, r: &mut Composite) -> RequestResult<()> {
        for request in &mut r.requests {
            self.process(request);
        }
        let failed = r.requests.iter().filter(|request| request.has_error()).count();
        if failed > 0 {
            return Err(RequestError::BatchFailed {
                failed,
                total: r.requests.len(),
            });
        }
        Ok(())
    }
}
