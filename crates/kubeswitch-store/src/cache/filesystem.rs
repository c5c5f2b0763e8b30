//! On-disk fetch cache

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kubeswitch_core::{StoreConfig, StoreKind};
use md5::{Digest, Md5};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::store::{Previewer, SearchResult, Store, Tags};

/// Extension of cache files
pub const CACHE_FILE_EXTENSION: &str = "cache";

/// Keeps fetched kubeconfigs in a directory, surviving process restarts
pub struct FilesystemCache {
    inner: Arc<dyn Store>,
    dir: PathBuf,
}

impl FilesystemCache {
    pub fn new(inner: Arc<dyn Store>, dir: PathBuf) -> Self {
        Self { inner, dir }
    }

    /// `<md5(key)>.<store-id>.cache`
    pub fn cache_file(&self, key: &str) -> PathBuf {
        let digest = Md5::digest(key.as_bytes());
        self.dir.join(format!(
            "{}.{}.{}",
            hex::encode(digest),
            self.inner.id(),
            CACHE_FILE_EXTENSION
        ))
    }
}

#[async_trait]
impl Store for FilesystemCache {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> StoreKind {
        self.inner.kind()
    }

    fn config(&self) -> &StoreConfig {
        self.inner.config()
    }

    fn span(&self) -> tracing::Span {
        self.inner.span()
    }

    async fn verify(&self) -> Result<()> {
        self.inner.verify().await
    }

    async fn prefix(&self, key: &str) -> Result<String> {
        self.inner.prefix(key).await
    }

    async fn start_search(&self, out: mpsc::Sender<SearchResult>, cancel: CancellationToken) {
        self.inner.start_search(out, cancel).await
    }

    fn previewer(&self) -> Option<&dyn Previewer> {
        self.inner.previewer()
    }

    async fn fetch(&self, key: &str, tags: &Tags) -> Result<Vec<u8>> {
        let path = self.cache_file(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable cache file"),
        }

        let bytes = self.inner.fetch(key, tags).await?;

        let (target, data) = (path.clone(), bytes.clone());
        let written = tokio::task::spawn_blocking(move || {
            kubeswitch_core::fsutil::write_atomic(&target, &data)
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "failed to write cache file"),
            Err(e) => warn!(path = %path.display(), error = %e, "cache write task failed"),
        }

        Ok(bytes)
    }
}

/// Delete every cache file in `dir`. Returns how many were removed.
pub fn clear_cache_dir(dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io_at(dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io_at(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(CACHE_FILE_EXTENSION)
            && kubeswitch_core::fsutil::remove_if_exists(&path)?
        {
            removed += 1;
        }
    }
    Ok(removed)
}
