//! Store construction from configuration

use std::sync::Arc;

use kubeswitch_core::{StoreConfig, StoreKind, SwitchConfig};
use tracing::debug;

use crate::cache::wrap_with_cache;
use crate::error::Result;
use crate::store::Store;
use crate::stores::{DigitalOceanStore, EksStore, FilesystemStore, PluginStore, VaultStore};

/// Build one store, wrapped in its configured cache
pub async fn create_store(config: &StoreConfig, kubeconfig_name: &str) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.kind {
        StoreKind::Filesystem => Arc::new(FilesystemStore::new(config.clone(), kubeconfig_name)?),
        StoreKind::Vault => Arc::new(VaultStore::new(config.clone())?),
        StoreKind::Eks => Arc::new(EksStore::new(config.clone())?),
        StoreKind::Digitalocean => Arc::new(DigitalOceanStore::new(config.clone())?),
        StoreKind::Plugin => Arc::new(PluginStore::start(config.clone()).await?),
    };

    match &config.cache {
        Some(cache) => wrap_with_cache(store, cache),
        None => Ok(store),
    }
}

/// Build every configured store
///
/// A store that fails to initialize aborts when it is required and is
/// dropped otherwise.
pub async fn create_stores(config: &SwitchConfig) -> Result<Vec<Arc<dyn Store>>> {
    let mut stores = Vec::with_capacity(config.kubeconfig_stores.len());

    for store_config in &config.kubeconfig_stores {
        match create_store(store_config, &config.kubeconfig_name).await {
            Ok(store) => stores.push(store),
            Err(e) if !store_config.is_required() => {
                debug!(store = %store_config.store_id(), error = %e, "skipping optional store");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(stores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_optional_store_failure_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let config = SwitchConfig::from_yaml(&format!(
            r#"
kubeconfigStores:
  - kind: filesystem
    paths: ["{}"]
    cache:
      kind: memory
  - kind: plugin
    id: broken
    required: false
    config:
      cmdPath: /nonexistent/kubeswitch-plugin
"#,
            tmp.path().display()
        ))
        .unwrap();

        let stores = create_stores(&config).await.unwrap();
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].id(), "filesystem.default");
    }

    #[tokio::test]
    async fn test_required_store_failure_aborts() {
        let config = SwitchConfig::from_yaml(
            r#"
kubeconfigStores:
  - kind: plugin
    config:
      cmdPath: /nonexistent/kubeswitch-plugin
"#,
        )
        .unwrap();

        assert!(create_stores(&config).await.is_err());
    }
}
