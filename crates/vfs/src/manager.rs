//! Store manager - maps store names to filesystems
//!
//! Stores are registered eagerly or through a factory that runs on first
//! lookup. Registrations are never dropped implicitly; registering a name
//! again replaces its binding.

#![allow(clippy::non_std_lazy_statics)]

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::backend::Adapter;
use crate::error::{Result, StorageError};
use crate::filesystem::Filesystem;

/// Store factory for lazy initialization
pub type StoreFactory = Box<dyn Fn() -> Result<Filesystem> + Send + Sync>;

lazy_static::lazy_static! {
    static ref GLOBAL: StoreManager = StoreManager::new();
}

/// Registry of named stores
pub struct StoreManager {
    /// Initialized stores
    stores: RwLock<HashMap<String, Arc<Filesystem>>>,
    /// Lazy store factories (for deferred initialization)
    factories: RwLock<HashMap<String, StoreFactory>>,
}

impl Default for StoreManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreManager {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide manager
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Bind `name` to a filesystem (immediately available)
    pub async fn register_store(&self, name: impl Into<String>, fs: Filesystem) -> Arc<Filesystem> {
        let name = name.into();
        let fs = Arc::new(fs);
        // Lock order is always factories, then stores
        let mut factories = self.factories.write().await;
        factories.remove(&name);
        self.stores.write().await.insert(name.clone(), Arc::clone(&fs));
        drop(factories);
        info!(store = %name, adapter = fs.adapter().kind(), "Registered store");
        fs
    }

    /// Bind `name` to a filesystem wrapping `adapter`
    pub async fn register_adapter(
        &self,
        name: impl Into<String>,
        adapter: impl Adapter + 'static,
    ) -> Arc<Filesystem> {
        self.register_store(name, Filesystem::new(adapter)).await
    }

    /// Register a lazy store factory (initialized on first use)
    pub async fn register_lazy_store(&self, name: impl Into<String>, factory: StoreFactory) {
        let name = name.into();
        let mut factories = self.factories.write().await;
        self.stores.write().await.remove(&name);
        factories.insert(name, factory);
    }

    /// Get or initialize a store
    ///
    /// A factory stays registered until it succeeds, so a failed
    /// initialization is retried on the next lookup.
    pub async fn get_store(&self, name: &str) -> Result<Arc<Filesystem>> {
        if let Some(fs) = self.stores.read().await.get(name).cloned() {
            return Ok(fs);
        }

        let mut factories = self.factories.write().await;
        // Another caller may have finished initialization while we waited
        if let Some(fs) = self.stores.read().await.get(name).cloned() {
            return Ok(fs);
        }
        let Some(factory) = factories.get(name) else {
            return Err(StorageError::UnknownStore {
                name: name.to_string(),
            });
        };

        let fs = Arc::new(factory()?);
        self.stores
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&fs));
        factories.remove(name);
        drop(factories);
        info!(store = %name, adapter = fs.adapter().kind(), "Initialized lazy store");
        Ok(fs)
    }

    pub async fn has_store(&self, name: &str) -> bool {
        let factories = self.factories.read().await;
        factories.contains_key(name) || self.stores.read().await.contains_key(name)
    }

    /// Names of registered stores, sorted
    pub async fn store_names(&self) -> Vec<String> {
        let factories = self.factories.read().await;
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.extend(self.stores.read().await.keys().cloned());
        drop(factories);
        names.sort();
        names.dedup();
        names
    }
}
