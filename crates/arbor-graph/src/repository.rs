use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arbor_cache::{CacheResult, LocationCache};
use arbor_store::{Backend, StoreError, WorkspaceStore};
use arbor_types::{IdentityResolver, Location, NodeId, Path, StandardIdentity, ValueFactory};
use tracing::{debug, info, warn};

use crate::config::RepositoryConfig;
use crate::error::{RequestError, RequestResult};
use crate::processor::RequestProcessor;
use crate::request::{CreateConflictBehavior, Request};

/// A named tree: a store plus its optional location cache.
pub struct Workspace<S> {
    name: String,
    store: S,
    cache: Option<LocationCache>,
}

impl<S: WorkspaceStore> Workspace<S> {
    pub fn new(store: S, use_cache: bool) -> Self {
        Self {
            name: store.name().to_string(),
            store,
            cache: use_cache.then(LocationCache::new),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> Option<&LocationCache> {
        self.cache.as_ref()
    }

    /// Resolve a location to an identifier and its actual path.
    ///
    /// The identifier wins when it names an existing node; otherwise the
    /// path is resolved. Cached entries are only trusted after the store
    /// confirms the node still lives at that path.
    pub fn resolve(&self, location: &Location) -> RequestResult<(NodeId, Path)> {
        if let Some(id) = location.id() {
            if let Some(path) = self.store.path_of(id)? {
                return Ok((id, path));
            }
            if location.path().is_none() {
                return Err(RequestError::NotFound {
                    location: location.clone(),
                    lowest_existing: Path::root(),
                });
            }
        }

        let path = location.path().ok_or_else(|| {
            RequestError::InvalidArgument("a location needs a path or an identifier".into())
        })?;

        if let Some(id) = self.cached_id(path)? {
            return Ok((id, path.clone()));
        }

        let Some(id) = self.store.find(path)? else {
            return Err(RequestError::NotFound {
                location: location.clone(),
                lowest_existing: self.store.lowest_existing(path)?,
            });
        };
        let actual = self.store.resolve_id(id)?;
        self.remember(|cache| cache.add_location(Location::new(actual.clone(), id)));
        Ok((id, actual))
    }

    fn cached_id(&self, path: &Path) -> RequestResult<Option<NodeId>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let Some(id) = cache.location_for(path).ok().flatten().and_then(|l| l.id()) else {
            return Ok(None);
        };
        if self.store.path_of(id)?.as_ref() == Some(path) {
            Ok(Some(id))
        } else {
            debug!(workspace = %self.name, path = %path, "stale cache entry");
            Ok(None)
        }
    }

    /// Apply an update to the location cache. A failed update clears it.
    pub(crate) fn remember<F>(&self, update: F)
    where
        F: FnOnce(&LocationCache) -> CacheResult<()>,
    {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = update(cache) {
            warn!(workspace = %self.name, error = %e, "location cache out of step, clearing");
            if let Err(e) = cache.clear() {
                warn!(workspace = %self.name, error = %e, "could not clear location cache");
            }
        }
    }
}

impl<S: WorkspaceStore> std::fmt::Debug for Workspace<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("name", &self.name)
            .field("root", &self.store.root())
            .field("cached", &self.cache.as_ref().map(LocationCache::len))
            .finish()
    }
}

type Workspaces<S> = BTreeMap<String, Arc<Workspace<S>>>;

/// A repository source: one backend, its workspaces and configuration.
pub struct Repository<B: Backend> {
    backend: B,
    config: RepositoryConfig,
    workspaces: RwLock<Workspaces<B::Store>>,
    identity: Box<dyn IdentityResolver>,
    values: ValueFactory,
}

impl<B: Backend> Repository<B> {
    /// Open the default and predefined workspaces of `config`.
    pub fn open(backend: B, config: RepositoryConfig) -> RequestResult<Self> {
        config
            .validate()
            .map_err(|e| RequestError::InvalidArgument(e.to_string()))?;
        let repository = Self {
            backend,
            config,
            workspaces: RwLock::new(BTreeMap::new()),
            identity: Box::new(StandardIdentity),
            values: ValueFactory::new(),
        };
        for name in repository.config.initial_workspaces() {
            repository.create_workspace(&name, CreateConflictBehavior::DoNotCreate)?;
        }
        info!(
            source = %repository.config.source_name,
            backend = repository.backend.kind(),
            "opened repository"
        );
        Ok(repository)
    }

    /// Replace the resolver deciding which properties carry identity.
    pub fn with_identity(mut self, resolver: impl IdentityResolver + 'static) -> Self {
        self.identity = Box::new(resolver);
        self
    }

    pub fn source_name(&self) -> &str {
        &self.config.source_name
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn identity(&self) -> &dyn IdentityResolver {
        self.identity.as_ref()
    }

    pub fn values(&self) -> &ValueFactory {
        &self.values
    }

    fn read(&self) -> RequestResult<RwLockReadGuard<'_, Workspaces<B::Store>>> {
        self.workspaces
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()).into())
    }

    fn write(&self) -> RequestResult<RwLockWriteGuard<'_, Workspaces<B::Store>>> {
        self.workspaces
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()).into())
    }

    /// Look up a workspace; `None` means the default one.
    pub fn workspace(&self, name: Option<&str>) -> RequestResult<Arc<Workspace<B::Store>>> {
        let name = name.unwrap_or(&self.config.default_workspace);
        self.read()?
            .get(name)
            .cloned()
            .ok_or_else(|| RequestError::WorkspaceDoesNotExist(name.to_string()))
    }

    pub fn workspace_names(&self) -> RequestResult<BTreeSet<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Create an empty workspace.
    pub fn create_workspace(
        &self,
        name: &str,
        conflict: CreateConflictBehavior,
    ) -> RequestResult<Arc<Workspace<B::Store>>> {
        if name.trim().is_empty() {
            return Err(RequestError::InvalidArgument(
                "workspace name must not be empty".into(),
            ));
        }
        let mut workspaces = self.write()?;
        let name = if !workspaces.contains_key(name) {
            name.to_string()
        } else {
            match conflict {
                CreateConflictBehavior::DoNotCreate => {
                    return Err(RequestError::WorkspaceAlreadyExists(name.to_string()))
                }
                CreateConflictBehavior::CreateWithAdjustedName => (1u64..)
                    .map(|n| format!("{name}{n}"))
                    .find(|candidate| !workspaces.contains_key(candidate))
                    .ok_or_else(|| RequestError::WorkspaceAlreadyExists(name.to_string()))?,
            }
        };
        let store = self
            .backend
            .open_workspace(&name, self.config.root_node_id)?;
        let workspace = Arc::new(Workspace::new(store, self.config.use_location_cache));
        workspaces.insert(name.clone(), Arc::clone(&workspace));
        info!(source = %self.config.source_name, workspace = %name, "created workspace");
        Ok(workspace)
    }

    /// Remove a workspace and release its backend storage.
    pub fn destroy_workspace(&self, name: &str) -> RequestResult<Arc<Workspace<B::Store>>> {
        let workspace = self
            .write()?
            .remove(name)
            .ok_or_else(|| RequestError::WorkspaceDoesNotExist(name.to_string()))?;
        workspace.store().clear()?;
        self.backend.destroy_workspace(name)?;
        info!(source = %self.config.source_name, workspace = %name, "destroyed workspace");
        Ok(workspace)
    }

    /// Process one request. Errors are attached to the request.
    pub fn execute(&self, request: &mut Request) {
        RequestProcessor::new(self).process(request);
    }

    /// Whether the repository is usable.
    pub fn ping(&self) -> bool {
        self.workspaces.read().is_ok()
    }
}

impl<B: Backend> std::fmt::Debug for Repository<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("source", &self.config.source_name)
            .field("backend", &self.backend.kind())
            .field("workspaces", &self.workspace_names().ok())
            .finish()
    }
}
