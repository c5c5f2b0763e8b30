//! Filesystem store
//!
//! Walks the configured roots depth-first and reports every file whose name
//! matches the kubeconfig name glob. Roots may also name a file directly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kubeswitch_core::{StoreConfig, StoreKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::store::{SearchResult, Store, Tags};

#[derive(Clone)]
pub struct FilesystemStore {
    id: String,
    config: StoreConfig,
    roots: Vec<PathBuf>,
    pattern: glob::Pattern,
}

impl FilesystemStore {
    /// Create a store from its configuration and the effective kubeconfig name glob
    pub fn new(config: StoreConfig, kubeconfig_name: &str) -> Result<Self> {
        let id = config.store_id();
        let pattern =
            glob::Pattern::new(config.kubeconfig_name(kubeconfig_name)).map_err(|e| {
                StoreError::InvalidConfig {
                    store: id.clone(),
                    message: format!("invalid kubeconfig name pattern: {}", e),
                }
            })?;
        let roots = config.expanded_paths()?;

        Ok(Self {
            id,
            config,
            roots,
            pattern,
        })
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.pattern.matches(n))
    }

    /// Blocking walk over all roots, reporting into `out`
    fn walk(&self, out: &mpsc::Sender<SearchResult>, cancel: &CancellationToken) {
        for root in &self.roots {
            if root.is_file() {
                if out
                    .blocking_send(SearchResult::entry(root.to_string_lossy()))
                    .is_err()
                {
                    return;
                }
                continue;
            }

            for entry in WalkDir::new(root).follow_links(true) {
                if cancel.is_cancelled() {
                    return;
                }

                let result = match entry {
                    Ok(entry) if entry.file_type().is_file() && self.matches(entry.path()) => {
                        SearchResult::entry(entry.path().to_string_lossy())
                    }
                    Ok(_) => continue,
                    Err(e) => SearchResult::error(format!("walking {}: {}", root.display(), e)),
                };

                if out.blocking_send(result).is_err() {
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Store for FilesystemStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Filesystem
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn verify(&self) -> Result<()> {
        for root in &self.roots {
            if tokio::fs::metadata(root).await.is_err() {
                return Err(StoreError::PathNotFound {
                    store: self.id.clone(),
                    path: root.clone(),
                });
            }
        }
        Ok(())
    }

    async fn prefix(&self, key: &str) -> Result<String> {
        Ok(Path::new(key)
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    async fn start_search(&self, out: mpsc::Sender<SearchResult>, cancel: CancellationToken) {
        let store = self.clone();
        let walk = tokio::task::spawn_blocking(move || store.walk(&out, &cancel));
        if let Err(e) = walk.await {
            tracing::warn!(store = %self.id, error = %e, "filesystem walk failed");
        }
    }

    async fn fetch(&self, key: &str, _tags: &Tags) -> Result<Vec<u8>> {
        tokio::fs::read(key).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    store: self.id.clone(),
                    key: key.to_string(),
                }
            } else {
                StoreError::io_at(key, e)
            }
        })
    }
}
