//! Fetch caches wrapping a store
//!
//! Both decorators only intercept `fetch`; every other call goes straight to
//! the wrapped store. Failed fetches are never cached.

mod filesystem;
mod memory;

pub use filesystem::{CACHE_FILE_EXTENSION, FilesystemCache, clear_cache_dir};
pub use memory::MemoryCache;

use std::path::PathBuf;
use std::sync::Arc;

use kubeswitch_core::config::expand_path;
use kubeswitch_core::paths::default_cache_dir;
use kubeswitch_core::{CacheConfig, CacheKind};

use crate::error::Result;
use crate::store::Store;

/// Wrap `store` in the cache selected by `cache`
pub fn wrap_with_cache(store: Arc<dyn Store>, cache: &CacheConfig) -> Result<Arc<dyn Store>> {
    match filesystem_cache_dir(cache)? {
        None => Ok(Arc::new(MemoryCache::new(store))),
        Some(dir) => Ok(Arc::new(FilesystemCache::new(store, dir))),
    }
}

/// Directory of a filesystem cache, `None` for the memory cache
pub fn filesystem_cache_dir(cache: &CacheConfig) -> Result<Option<PathBuf>> {
    match cache.kind {
        CacheKind::Memory => Ok(None),
        CacheKind::Filesystem => match cache.path() {
            Some(path) => Ok(Some(expand_path(path)?)),
            None => Ok(Some(default_cache_dir()?)),
        },
    }
}
