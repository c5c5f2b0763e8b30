//! Effective settings of one invocation
//!
//! The configuration file merged with command-line overrides.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kubeswitch_core::config::expand_path;
use kubeswitch_core::{AliasTable, History, StatePaths, StoreConfig, SwitchConfig};
use kubeswitch_store::{SearchHandle, SearchSession, Store, create_stores, search};
use md5::{Digest, Md5};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CliError, Result};

/// Id prefix of the store built from `--kubeconfig-path`
const PATH_STORE_ID: &str = "kubeconfig-path";

/// Command-line options that override the configuration file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<String>,
    pub state_directory: Option<String>,
    pub kubeconfig_paths: Vec<String>,
    pub kubeconfig_name: Option<String>,
    pub no_index: bool,
    pub search_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub config: SwitchConfig,
    pub paths: StatePaths,
    pub no_index: bool,
    pub search_timeout: Duration,
}

impl Settings {
    pub fn load(overrides: Overrides) -> Result<Self> {
        let mut config = match &overrides.config_path {
            Some(path) => SwitchConfig::load_from(&expand_path(path)?),
            None => SwitchConfig::default_path().and_then(|p| SwitchConfig::load(&p)),
        }
        .map_err(CliError::from_config_load)?;

        if let Some(name) = overrides.kubeconfig_name {
            config.kubeconfig_name = name;
        }

        if !overrides.kubeconfig_paths.is_empty() {
            let mut store = StoreConfig::filesystem(overrides.kubeconfig_paths.clone());
            store.id = Some(path_store_id(&overrides.kubeconfig_paths)?);
            store.show_prefix = Some(true);
            config.kubeconfig_stores.push(store);
        } else if config.kubeconfig_stores.is_empty() {
            debug!("no stores configured, using ~/.kube/config");
            let mut store = StoreConfig::filesystem(vec!["~/.kube/config".to_string()]);
            store.show_prefix = Some(false);
            config.kubeconfig_stores.push(store);
        }
        config.validate().map_err(CliError::from_config_load)?;

        let state_dir = overrides
            .state_directory
            .as_deref()
            .map(expand_path)
            .transpose()?;
        let paths = StatePaths::from_home(state_dir)?;

        Ok(Self {
            search_timeout: overrides
                .search_timeout
                .unwrap_or_else(|| config.search_timeout()),
            no_index: overrides.no_index,
            config,
            paths,
        })
    }

    pub async fn stores(&self) -> Result<Vec<Arc<dyn Store>>> {
        Ok(create_stores(&self.config).await?)
    }

    /// Start a search across every configured store
    pub async fn search(&self) -> Result<SearchHandle> {
        let stores = self.stores().await?;
        let session = SearchSession {
            paths: self.paths.clone(),
            default_ttl: self.config.refresh_index_after,
            no_index: self.no_index,
            timeout: self.search_timeout,
            cancel: CancellationToken::new(),
        };
        Ok(search(stores, session).await?)
    }

    pub fn history(&self) -> History {
        History::new(&self.paths.history_file)
    }

    pub fn aliases(&self) -> Result<AliasTable> {
        Ok(AliasTable::load(&self.paths.alias_file())?)
    }

    pub fn namespace_dir(&self) -> PathBuf {
        self.paths.namespace_dir()
    }
}

/// Store id for a set of `--kubeconfig-path` values. Each set of paths gets
/// its own search index.
fn path_store_id(paths: &[String]) -> Result<String> {
    let mut hasher = Md5::new();
    for path in paths {
        hasher.update(expand_path(path)?.to_string_lossy().as_bytes());
        hasher.update([0]);
    }
    let digest = hex::encode(hasher.finalize());
    Ok(format!("{}-{}", PATH_STORE_ID, &digest[..12]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn overrides(tmp: &TempDir, paths: &[&str]) -> Overrides {
        let config = tmp.path().join("switch-config.yaml");
        std::fs::write(&config, "refreshIndexAfter: 1h\n").unwrap();
        Overrides {
            config_path: Some(config.to_string_lossy().into_owned()),
            state_directory: Some(tmp.path().join("state").to_string_lossy().into_owned()),
            kubeconfig_paths: paths.iter().map(|p| p.to_string()).collect(),
            ..Overrides::default()
        }
    }

    #[test]
    fn test_path_store_id_depends_on_paths() {
        let a = path_store_id(&["/tmp/kc/a".to_string()]).unwrap();
        let b = path_store_id(&["/tmp/kc/b".to_string()]).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("kubeconfig-path-"));
        assert_eq!(a, path_store_id(&["/tmp/kc/a".to_string()]).unwrap());

        let joined = path_store_id(&["/tmp/kc".to_string(), "a".to_string()]).unwrap();
        assert_ne!(joined, path_store_id(&["/tmp/kca".to_string()]).unwrap());
    }

    #[test]
    fn test_each_path_set_has_its_own_index() {
        let tmp = TempDir::new().unwrap();
        let a = Settings::load(overrides(&tmp, &["/tmp/kc/a"])).unwrap();
        let b = Settings::load(overrides(&tmp, &["/tmp/kc/b"])).unwrap();

        let store_a = a.config.kubeconfig_stores[0].store_id();
        let store_b = b.config.kubeconfig_stores[0].store_id();
        assert_ne!(store_a, store_b);
        assert_ne!(a.paths.index_file(&store_a), b.paths.index_file(&store_b));
        assert_eq!(a.config.refresh_index_after, Some(Duration::from_secs(3600)));
    }
}
