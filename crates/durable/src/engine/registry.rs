//! Backend registry for name-based executor creation
//!
//! The registry maps backend names to factories that build an [`Executor`]
//! from a [`Config`]. It is an explicit object; [`default_registry`] is a
//! process-wide instance with the built-in backends already registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::config::{Config, DURABLE_BACKEND, INMEMORY_BACKEND};
use super::executor::Executor;
use crate::backend::durable::DurableExecutor;
use crate::backend::memory::InMemoryExecutor;

/// Factory function type for creating executors from configuration
pub type BackendFactory =
    Arc<dyn Fn(Config) -> Result<Arc<dyn Executor>, RegistryError> + Send + Sync>;

/// Errors from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No factory registered under this name
    #[error("unknown workflow backend: {0}")]
    UnknownBackend(String),

    /// The backend needs `Config.client` and none was given
    #[error("workflow backend {backend} requires a client")]
    MissingClient { backend: String },

    /// `Config.client` holds a value of the wrong type
    #[error("workflow backend {backend} expects a client of type {expected}")]
    InvalidClient {
        backend: String,
        expected: &'static str,
    },

    /// The factory rejected the configuration for another reason
    #[error("workflow backend error: {0}")]
    Backend(String),
}

/// Registry of executor factories keyed by backend name
///
/// Registration and lookup are safe for concurrent use; registering an
/// existing name replaces its factory.
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, BackendFactory>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with `inmemory` and `durable` registered
    pub fn with_builtin_backends() -> Self {
        let registry = Self::new();
        registry.register(INMEMORY_BACKEND, |config| {
            Ok(Arc::new(InMemoryExecutor::from_config(&config)) as Arc<dyn Executor>)
        });
        registry.register(DURABLE_BACKEND, |config| {
            Ok(Arc::new(DurableExecutor::from_config(config)?) as Arc<dyn Executor>)
        });
        registry
    }

    /// Register a backend factory
    ///
    /// # Example
    ///
    /// ```ignore
    /// let registry = BackendRegistry::new();
    /// registry.register("custom", |config| Ok(Arc::new(MyExecutor::new(config)) as Arc<dyn Executor>));
    /// ```
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(Config) -> Result<Arc<dyn Executor>, RegistryError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(backend = %name, "registering workflow backend");
        self.factories.write().insert(name, Arc::new(factory));
    }

    /// Build an executor for the named backend
    pub fn new_executor(
        &self,
        name: &str,
        config: Config,
    ) -> Result<Arc<dyn Executor>, RegistryError> {
        // Clone the factory out so the lock is not held while it runs
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))?;

        factory(config)
    }

    /// Check if a backend is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered backend names, sorted
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends())
            .finish()
    }
}

/// Process-wide registry with the built-in backends
pub fn default_registry() -> &'static BackendRegistry {
    static REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
    REGISTRY.get_or_init(BackendRegistry::with_builtin_backends)
}
