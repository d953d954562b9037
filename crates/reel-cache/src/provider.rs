//! Context-owned cache lifecycle.
//!
//! A [`CacheProvider`] lazily opens one [`CacheStore`] and hands out shared references
//! to it. Releasing the provider releases the store; the next [`CacheProvider::get_cache`]
//! opens a fresh one. Owners decide the scope (one per app, one per test), there is no
//! process-global instance.

use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::key::KeyResolver;
use crate::store::CacheStore;

#[derive(Debug)]
pub struct CacheProvider {
    config: CacheConfig,
    current: Mutex<Option<Arc<CacheStore>>>,
}

impl CacheProvider {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Key resolver matching this provider's asset namespace.
    pub fn key_resolver(&self) -> KeyResolver {
        KeyResolver::from_config(&self.config)
    }

    /// Shared store, opened on first use (or after a release).
    pub fn get_cache(&self) -> CacheResult<Arc<CacheStore>> {
        let mut current = self.current.lock();
        if let Some(store) = current.as_ref().filter(|s| !s.is_released()) {
            return Ok(store.clone());
        }
        let store = Arc::new(CacheStore::open(&self.config)?);
        *current = Some(store.clone());
        Ok(store)
    }

    pub fn is_open(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|s| !s.is_released())
    }

    /// Release the current store, if any.
    pub fn release_cache(&self) {
        let store = self.current.lock().take();
        if let Some(store) = store {
            store.release();
        }
    }

    /// Release the store and delete the cache directory.
    pub fn clear(&self) {
        self.release_cache();
        match fs::remove_dir_all(&self.config.root) {
            Ok(()) => debug!(root = %self.config.root.display(), "cache: directory cleared"),
            Err(e) => debug!(
                root = %self.config.root.display(),
                "cache: clear failed err='{}' (best-effort)",
                e
            ),
        }
    }
}
