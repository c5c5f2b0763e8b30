//! In-process fetch cache

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kubeswitch_core::{StoreConfig, StoreKind};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::store::{Previewer, SearchResult, Store, Tags};

/// Memoizes successful fetches for the lifetime of the process
pub struct MemoryCache {
    inner: Arc<dyn Store>,
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Store for MemoryCache {
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
        if let Some(bytes) = self.entries.lock().await.get(key) {
            return Ok(bytes.clone());
        }

        let bytes = self.inner.fetch(key, tags).await?;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), bytes.clone());
        Ok(bytes)
    }
}
