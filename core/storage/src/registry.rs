//! Backend registry for resolving the active backend by kind.

use std::collections::HashMap;
use std::sync::Arc;

use cloudfs_common::{Error, Result};

use crate::backend::{BackendKind, StorageBackend};

/// Registry of constructed backends, at most one per kind.
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register a backend under its own kind.
    ///
    /// # Errors
    /// - A backend of the same kind is already registered
    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) -> Result<()> {
        let kind = backend.kind();
        if self.backends.contains_key(&kind) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                kind
            )));
        }
        self.backends.insert(kind, backend);
        Ok(())
    }

    /// Resolve a backend by kind.
    ///
    /// # Errors
    /// - No backend of that kind is configured
    pub fn resolve(&self, kind: BackendKind) -> Result<Arc<dyn StorageBackend>> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Unavailable(format!("Backend '{}' is not configured", kind)))
    }

    /// Registered kinds.
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    /// Check if a kind is registered.
    pub fn has(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Every registered backend.
    pub fn all(&self) -> Vec<Arc<dyn StorageBackend>> {
        self.backends.values().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
