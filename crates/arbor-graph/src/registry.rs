use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use arbor_store::{Backend, StoreError};
use tracing::{debug, info};

use crate::error::{RequestError, RequestResult};
use crate::repository::Repository;
use crate::request::Request;

/// A named place requests can be sent to.
pub trait RepositorySource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the source answered within `timeout`.
    fn ping(&self, timeout: Duration) -> bool;

    /// Process a request; the outcome is recorded on the request.
    fn execute(&self, request: &mut Request);
}

impl<B: Backend> RepositorySource for Repository<B> {
    fn name(&self) -> &str {
        self.source_name()
    }

    fn ping(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        let alive = Repository::ping(self);
        alive && started.elapsed() <= timeout
    }

    fn execute(&self, request: &mut Request) {
        Repository::execute(self, request);
    }
}

/// Sources by name.
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<BTreeMap<String, Arc<dyn RepositorySource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own name. Fails if the name is taken.
    pub fn register(&self, source: Arc<dyn RepositorySource>) -> RequestResult<()> {
        let name = source.name().to_string();
        let mut sources = self
            .sources
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        if sources.contains_key(&name) {
            return Err(RequestError::InvalidArgument(format!(
                "a source named {name} is already registered"
            )));
        }
        sources.insert(name.clone(), source);
        info!(source = %name, "registered source");
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> RequestResult<Option<Arc<dyn RepositorySource>>> {
        let removed = self
            .sources
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .remove(name);
        debug!(source = name, existed = removed.is_some(), "unregistered source");
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> RequestResult<Option<Arc<dyn RepositorySource>>> {
        Ok(self
            .sources
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .get(name)
            .cloned())
    }

    pub fn names(&self) -> RequestResult<Vec<String>> {
        Ok(self
            .sources
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .keys()
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.sources.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names().ok())
            .finish()
    }
}
