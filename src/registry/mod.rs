//! Project-context registry (component K): lazily opens one [`MemoryManager`]
//! and [`ProtocolEnforcer`] per project, capped at `max_project_contexts`
//! with least-recently-used eviction, and wires each local manager to the
//! shared global-store manager when the global store is enabled.

use crate::embedding::Embedder;
use crate::memory::MemoryManager;
use crate::models::GLOBAL_PROJECT_PATH;
use crate::protocol::ProtocolEnforcer;
use crate::{EngineConfig, Error, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

struct ProjectContext {
    memory: Arc<MemoryManager>,
    protocol: Arc<ProtocolEnforcer>,
}

/// A project's memory manager and protocol enforcer, checked out of the
/// registry.
#[derive(Clone)]
pub struct ProjectHandle {
    /// This project's memory manager.
    pub memory: Arc<MemoryManager>,
    /// This project's protocol enforcer.
    pub protocol: Arc<ProtocolEnforcer>,
}

/// Owns every currently-open project's state behind an [`LruCache`],
/// evicting the least-recently-used project once `max_project_contexts` is
/// exceeded.
pub struct ProjectRegistry {
    config: EngineConfig,
    embedder: Option<Arc<dyn Embedder>>,
    global: Option<Arc<MemoryManager>>,
    contexts: Mutex<LruCache<String, ProjectContext>>,
}

impl ProjectRegistry {
    /// Builds a registry. If `config.global.enabled`, eagerly opens the
    /// shared global-store manager so every later local manager can be
    /// wired to it; fails immediately if enabled without a configured path
    /// rather than deferring the error to the first project lookup.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the global store is enabled without a
    /// path, otherwise `Error::Store`/`Error::Fatal` from opening it.
    pub fn new(config: EngineConfig, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let global = if config.global.enabled {
            let path = config
                .global
                .path
                .clone()
                .ok_or_else(|| Error::Validation("GLOBAL_ENABLED requires GLOBAL_PATH".to_string()))?;
            let manager = MemoryManager::open(&path, GLOBAL_PROJECT_PATH, config.clone(), embedder.clone())?;
            Some(Arc::new(manager))
        } else {
            None
        };
        let capacity = NonZeroUsize::new(config.max_project_contexts.max(1)).unwrap_or(NonZeroUsize::MIN);
        Ok(Self { config, embedder, global, contexts: Mutex::new(LruCache::new(capacity)) })
    }

    fn lock_contexts(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, ProjectContext>>> {
        self.contexts.lock().map_err(|_| Error::Fatal("project registry lock poisoned".to_string()))
    }

    /// Number of currently open project contexts.
    ///
    /// # Errors
    ///
    /// Returns `Error::Fatal` if the registry's internal lock is poisoned.
    pub fn open_count(&self) -> Result<usize> {
        Ok(self.lock_contexts()?.len())
    }

    /// Returns the project's memory manager and protocol enforcer, opening
    /// them on first use. `project_path` doubles as the on-disk project
    /// root and the logical project identity stamped on its memories.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store`/`Error::Fatal` if opening the project's store
    /// fails.
    pub fn acquire(&self, project_path: &str) -> Result<ProjectHandle> {
        let mut contexts = self.lock_contexts()?;
        if let Some(ctx) = contexts.get(project_path) {
            return Ok(ProjectHandle { memory: ctx.memory.clone(), protocol: ctx.protocol.clone() });
        }

        let root = std::path::Path::new(project_path);
        let mut memory = MemoryManager::open(root, project_path, self.config.clone(), self.embedder.clone())?;
        if let Some(global) = &self.global {
            memory = memory.with_global(global.clone());
        }
        let secret = self.config.token_secret.clone().unwrap_or_else(|| format!("codemem-dev-secret-{project_path}"));
        let handle = ProjectHandle { memory: Arc::new(memory), protocol: Arc::new(ProtocolEnforcer::new(secret)) };

        contexts.put(
            project_path.to_string(),
            ProjectContext { memory: handle.memory.clone(), protocol: handle.protocol.clone() },
        );
        Ok(handle)
    }

    /// Evicts a project's context immediately, regardless of capacity.
    /// Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns `Error::Fatal` if the registry's internal lock is poisoned.
    pub fn release(&self, project_path: &str) -> Result<bool> {
        Ok(self.lock_contexts()?.pop(project_path).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_with_cap(max: usize) -> EngineConfig {
        EngineConfig { max_project_contexts: max, ..EngineConfig::default() }
    }

    #[test]
    fn acquiring_the_same_project_twice_returns_the_same_manager() {
        let dir = tempdir().unwrap();
        let registry = ProjectRegistry::new(config_with_cap(10), None).unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let first = registry.acquire(&path).unwrap();
        let second = registry.acquire(&path).unwrap();
        assert!(Arc::ptr_eq(&first.memory, &second.memory));
        assert!(Arc::ptr_eq(&first.protocol, &second.protocol));
    }

    #[test]
    fn exceeding_capacity_evicts_the_least_recently_used_project() {
        let dir = tempdir().unwrap();
        let registry = ProjectRegistry::new(config_with_cap(2), None).unwrap();
        let paths: Vec<String> = (0..3).map(|i| dir.path().join(format!("p{i}")).to_string_lossy().to_string()).collect();

        registry.acquire(&paths[0]).unwrap();
        registry.acquire(&paths[1]).unwrap();
        assert_eq!(registry.open_count().unwrap(), 2);

        registry.acquire(&paths[2]).unwrap();
        assert_eq!(registry.open_count().unwrap(), 2);
        assert!(registry.release(&paths[0]).is_ok());
    }

    #[test]
    fn release_removes_an_open_project() {
        let dir = tempdir().unwrap();
        let registry = ProjectRegistry::new(config_with_cap(10), None).unwrap();
        let path = dir.path().to_string_lossy().to_string();
        registry.acquire(&path).unwrap();
        assert!(registry.release(&path).unwrap());
        assert!(!registry.release(&path).unwrap());
    }

    #[test]
    fn global_store_disabled_by_default_leaves_registry_unwired() {
        let registry = ProjectRegistry::new(EngineConfig::default(), None).unwrap();
        assert!(registry.global.is_none());
    }

    #[test]
    fn global_store_enabled_requires_a_path() {
        let mut config = EngineConfig::default();
        config.global.enabled = true;
        config.global.path = None;
        assert!(ProjectRegistry::new(config, None).is_err());
    }
}
