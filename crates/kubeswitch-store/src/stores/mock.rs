//! In-memory store for testing
//!
//! Serves a fixed set of kubeconfigs without touching the filesystem or the
//! network, and counts the calls made against it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kubeswitch_core::{StoreConfig, StoreKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::store::{SearchResult, Store, Tags};

/// One kubeconfig served by [`MockStore`]
#[derive(Debug, Clone)]
pub struct MockEntry {
    pub key: String,
    pub tags: Tags,
    pub kubeconfig: Vec<u8>,
}

impl MockEntry {
    pub fn new(key: impl Into<String>, kubeconfig: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            tags: Tags::new(),
            kubeconfig: kubeconfig.into(),
        }
    }
}

/// In-memory store for testing
#[derive(Clone)]
pub struct MockStore {
    id: String,
    config: StoreConfig,
    entries: Arc<Vec<MockEntry>>,
    /// Error records emitted after the entries
    errors: Arc<Vec<String>>,
    /// Keys emitted by the search whose fetch fails
    unreadable: Arc<Vec<String>>,
    /// Delay before every fetch answers
    fetch_delay: Option<Duration>,
    /// Never finish the search until cancelled
    hang: bool,
    operations: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    verifies: AtomicUsize,
    searches: AtomicUsize,
    fetches: AtomicUsize,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub verifies: usize,
    pub searches: usize,
    pub fetches: usize,
}

impl MockStore {
    /// Create a store with the given id serving `entries`
    pub fn new(id: &str, entries: Vec<MockEntry>) -> Self {
        let mut config = StoreConfig::filesystem(vec!["mock".to_string()]);
        config.id = Some(id.to_string());
        Self::with_config(config, entries)
    }

    pub fn with_config(config: StoreConfig, entries: Vec<MockEntry>) -> Self {
        Self {
            id: config.store_id(),
            config,
            entries: Arc::new(entries),
            errors: Arc::new(Vec::new()),
            unreadable: Arc::new(Vec::new()),
            fetch_delay: None,
            hang: false,
            operations: Arc::new(Counters::default()),
        }
    }

    /// Also emit these error records during a search
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = Arc::new(errors);
        self
    }

    /// Also emit these keys, failing every fetch of them
    pub fn with_unreadable(mut self, keys: Vec<String>) -> Self {
        self.unreadable = Arc::new(keys);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Keep the search open until it is cancelled
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        OperationCounts {
            verifies: self.operations.verifies.load(Ordering::SeqCst),
            searches: self.operations.searches.load(Ordering::SeqCst),
            fetches: self.operations.fetches.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Store for MockStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StoreKind {
        self.config.kind
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn verify(&self) -> Result<()> {
        self.operations.verifies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn prefix(&self, key: &str) -> Result<String> {
        Ok(key.to_string())
    }

    async fn start_search(&self, out: mpsc::Sender<SearchResult>, cancel: CancellationToken) {
        self.operations.searches.fetch_add(1, Ordering::SeqCst);

        for entry in self.entries.iter() {
            let result = SearchResult::with_tags(entry.key.clone(), entry.tags.clone());
            if out.send(result).await.is_err() {
                return;
            }
        }
        for key in self.unreadable.iter() {
            if out.send(SearchResult::entry(key.clone())).await.is_err() {
                return;
            }
        }
        for error in self.errors.iter() {
            if out.send(SearchResult::error(error.clone())).await.is_err() {
                return;
            }
        }

        if self.hang {
            cancel.cancelled().await;
        }
    }

    async fn fetch(&self, key: &str, _tags: &Tags) -> Result<Vec<u8>> {
        self.operations.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.kubeconfig.clone())
            .ok_or_else(|| StoreError::NotFound {
                store: self.id.clone(),
                key: key.to_string(),
            })
    }
}
