//! Coarse-locked cache handle for multi-threaded embedders

use super::store::{Cache, CacheDump, CacheStats};
use crate::config::CacheConfig;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Cloneable handle to one [`Cache`] behind a single mutex
///
/// Bucket chains and free lists are not safe for concurrent mutation, so
/// every operation holds the lock from start to finish.
#[derive(Clone)]
pub struct SharedCache {
    inner: Arc<Mutex<Cache>>,
}

impl SharedCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Ok(Self::from_cache(Cache::new(config)?))
    }

    pub fn from_cache(cache: Cache) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lock().get(key)
    }

    pub fn get_into(&self, key: &[u8], out: &mut [u8]) -> Result<Option<usize>> {
        self.inner.lock().get_into(key, out)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.lock().set(key, value)
    }

    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.inner.lock().remove(key)
    }

    pub fn flush_all(&self) -> Result<()> {
        self.inner.lock().flush_all()
    }

    pub fn dump(&self) -> Result<CacheDump> {
        self.inner.lock().dump()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn memory_used(&self) -> u64 {
        self.inner.lock().memory_used()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }

    /// Run several operations under one lock acquisition
    pub fn with<R>(&self, f: impl FnOnce(&mut Cache) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }
}

impl std::fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache").finish_non_exhaustive()
    }
}
