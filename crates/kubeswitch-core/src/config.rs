//! User configuration
//!
//! Loaded from `~/.kube/switch-config.yaml` unless another path is given.
//! A missing file yields the default configuration.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default kubeconfig file name glob
pub const DEFAULT_KUBECONFIG_NAME: &str = "config";

/// Default deadline of one discovery run
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default store id when none is configured
pub const DEFAULT_STORE_ID: &str = "default";

/// Configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchConfig {
    /// Schema version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Glob matched against kubeconfig file names
    #[serde(default = "default_kubeconfig_name")]
    pub kubeconfig_name: String,

    /// Global search index TTL
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub refresh_index_after: Option<Duration>,

    /// Deadline of one discovery run
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub search_timeout: Option<Duration>,

    /// Configured kubeconfig stores, in order
    #[serde(default)]
    pub kubeconfig_stores: Vec<StoreConfig>,
}

fn default_kubeconfig_name() -> String {
    DEFAULT_KUBECONFIG_NAME.to_string()
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::default(),
            kubeconfig_name: default_kubeconfig_name(),
            refresh_index_after: None,
            search_timeout: None,
            kubeconfig_stores: Vec::new(),
        }
    }
}

impl SwitchConfig {
    /// Load configuration from a path, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::io_at(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(CoreError::NoHomeDir)?;
        Ok(home.join(".kube").join("switch-config.yaml"))
    }

    /// Effective search deadline
    pub fn search_timeout(&self) -> Duration {
        self.search_timeout.unwrap_or(DEFAULT_SEARCH_TIMEOUT)
    }

    /// Check store definitions for consistency
    pub fn validate(&self) -> Result<()> {
        for store in &self.kubeconfig_stores {
            store.validate()?;
        }

        let ttl_in_effect = self.refresh_index_after.is_some()
            || self
                .kubeconfig_stores
                .iter()
                .any(|s| s.refresh_index_after.is_some());

        if ttl_in_effect {
            let mut seen = HashSet::new();
            for store in &self.kubeconfig_stores {
                if !seen.insert(store.store_id()) {
                    return Err(CoreError::InvalidConfig {
                        message: format!(
                            "duplicate store '{}': each (kind, id) pair must be unique when a search index is used",
                            store.store_id()
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Configuration schema version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    #[serde(rename = "v1alpha1")]
    V1Alpha1,
}

/// Kubeconfig store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Filesystem,
    Vault,
    Eks,
    Digitalocean,
    Plugin,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Filesystem => "filesystem",
            StoreKind::Vault => "vault",
            StoreKind::Eks => "eks",
            StoreKind::Digitalocean => "digitalocean",
            StoreKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub kind: StoreKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Overrides the global kubeconfig name glob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_name: Option<String>,

    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_prefix: Option<bool>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub refresh_index_after: Option<Duration>,

    /// Kind-specific settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_yaml::Value>,
}

impl StoreConfig {
    /// Filesystem store over the given paths
    pub fn filesystem(paths: Vec<String>) -> Self {
        Self {
            kind: StoreKind::Filesystem,
            id: None,
            kubeconfig_name: None,
            paths,
            cache: None,
            required: None,
            show_prefix: None,
            refresh_index_after: None,
            config: None,
        }
    }

    /// Store id, `<kind>.<id>`
    pub fn store_id(&self) -> String {
        format!(
            "{}.{}",
            self.kind,
            self.id.as_deref().unwrap_or(DEFAULT_STORE_ID)
        )
    }

    /// Initialization failures are fatal for required stores
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }

    pub fn show_prefix(&self) -> bool {
        self.show_prefix.unwrap_or(true)
    }

    /// Search index TTL, the per-store override winning over the global default
    pub fn index_ttl(&self, global: Option<Duration>) -> Option<Duration> {
        self.refresh_index_after.or(global)
    }

    /// Effective kubeconfig name glob
    pub fn kubeconfig_name<'a>(&'a self, global: &'a str) -> &'a str {
        self.kubeconfig_name.as_deref().unwrap_or(global)
    }

    /// Deserialize the kind-specific `config` block
    pub fn typed_config<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.config {
            None | Some(serde_yaml::Value::Null) => Ok(T::default()),
            Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| {
                CoreError::InvalidConfig {
                    message: format!("store '{}': {}", self.store_id(), e),
                }
            }),
        }
    }

    /// Configured paths with `~` and environment variables expanded
    pub fn expanded_paths(&self) -> Result<Vec<PathBuf>> {
        self.paths.iter().map(|p| expand_path(p)).collect()
    }

    fn validate(&self) -> Result<()> {
        match self.kind {
            StoreKind::Filesystem | StoreKind::Vault if self.paths.is_empty() => {
                Err(CoreError::InvalidConfig {
                    message: format!(
                        "store '{}' of kind {} requires at least one path",
                        self.store_id(),
                        self.kind
                    ),
                })
            }
            StoreKind::Plugin => {
                let has_cmd = self
                    .config
                    .as_ref()
                    .and_then(|c| c.get("cmdPath"))
                    .and_then(serde_yaml::Value::as_str)
                    .is_some_and(|s| !s.is_empty());
                if has_cmd {
                    Ok(())
                } else {
                    Err(CoreError::InvalidConfig {
                        message: format!(
                            "plugin store '{}' requires config.cmdPath",
                            self.store_id()
                        ),
                    })
                }
            }
            _ => Ok(()),
        }
    }
}

/// Cache decorator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub kind: CacheKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_yaml::Value>,
}

impl CacheConfig {
    /// Directory of the filesystem cache, if configured
    pub fn path(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.get("path"))
            .and_then(serde_yaml::Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Memory,
    Filesystem,
}

/// Expand `~` and `$VAR` in a user supplied path
pub fn expand_path(path: &str) -> Result<PathBuf> {
    shellexpand::full(path)
        .map(|p| PathBuf::from(p.into_owned()))
        .map_err(|e| CoreError::InvalidConfig {
            message: format!("cannot expand path '{}': {}", path, e),
        })
}
