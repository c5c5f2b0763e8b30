//! HashiCorp Vault store
//!
//! Secrets below the configured paths are listed recursively over the KV HTTP
//! API. Each leaf secret is one entry; its key is the secret path.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use kubeswitch_core::{StoreConfig, StoreKind};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::store::{SearchResult, Store, Tags};

/// Per-request deadline
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound of concurrent LIST requests
const MAX_CONCURRENT_LISTS: usize = 8;

const DEFAULT_KUBECONFIG_KEY: &str = "config";

#[derive(Debug, Default, Deserialize)]
struct VaultSettings {
    #[serde(rename = "vaultAPIAddress")]
    api_address: Option<String>,
    #[serde(rename = "vaultKeyKubeconfig")]
    key_kubeconfig: Option<String>,
    #[serde(rename = "vaultEngineVersion")]
    engine_version: Option<EngineVersion>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EngineVersion {
    #[default]
    V1,
    V2,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    data: serde_json::Value,
}

pub struct VaultStore {
    id: String,
    config: StoreConfig,
    client: reqwest::Client,
    address: String,
    token: String,
    kubeconfig_key: String,
    engine: EngineVersion,
    roots: Vec<String>,
}

impl VaultStore {
    /// Create a store, reading the token from `VAULT_TOKEN` or `~/.vault-token`
    pub fn new(config: StoreConfig) -> Result<Self> {
        let token = match std::env::var("VAULT_TOKEN") {
            Ok(token) if !token.is_empty() => token,
            _ => read_token_file().ok_or_else(|| StoreError::InvalidConfig {
                store: config.store_id(),
                message: "no Vault token: set VAULT_TOKEN or log in to create ~/.vault-token"
                    .to_string(),
            })?,
        };
        Self::with_token(config, token)
    }

    /// Create a store with an explicit token
    pub fn with_token(config: StoreConfig, token: String) -> Result<Self> {
        let id = config.store_id();
        let settings: VaultSettings = config.typed_config()?;

        let address = settings
            .api_address
            .or_else(|| std::env::var("VAULT_ADDR").ok())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| StoreError::InvalidConfig {
                store: id.clone(),
                message: "no Vault address: set vaultAPIAddress or VAULT_ADDR".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let roots = config
            .paths
            .iter()
            .map(|p| p.trim_matches('/').to_string())
            .collect();

        Ok(Self {
            id,
            client,
            address: address.trim_end_matches('/').to_string(),
            token,
            kubeconfig_key: settings
                .key_kubeconfig
                .unwrap_or_else(|| DEFAULT_KUBECONFIG_KEY.to_string()),
            engine: settings.engine_version.unwrap_or_default(),
            roots,
            config,
        })
    }

    /// API URL of a secret path. KV v2 inserts `metadata`/`data` after the mount.
    fn url(&self, path: &str, listing: bool) -> String {
        let path = match self.engine {
            EngineVersion::V1 => path.to_string(),
            EngineVersion::V2 => {
                let (mount, rest) = path.split_once('/').unwrap_or((path, ""));
                let segment = if listing { "metadata" } else { "data" };
                format!("{}/{}/{}", mount, segment, rest)
            }
        };
        format!("{}/v1/{}", self.address, path.trim_end_matches('/'))
    }

    /// Children of a directory. Directory names keep their trailing slash.
    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url(dir, true))
            .query(&[("list", "true")])
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        // Vault answers 404 for an empty directory
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = response.error_for_status()?;
        Ok(response.json::<ListResponse>().await?.data.keys)
    }

    async fn read(&self, path: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
        let response = self
            .client
            .get(self.url(path, false))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                store: self.id.clone(),
                key: path.to_string(),
            });
        }
        let body = response.error_for_status()?.json::<ReadResponse>().await?;

        let data = match self.engine {
            EngineVersion::V1 => body.data,
            EngineVersion::V2 => body
                .data
                .get("data")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        };
        match data {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(StoreError::backend(
                &self.id,
                format!("secret '{}' has no data", path),
            )),
        }
    }

    /// Pick the kubeconfig field of a secret
    fn select_payload(
        &self,
        key: &str,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<u8>> {
        let value = match data.get(&self.kubeconfig_key) {
            Some(value) => value,
            None if data.len() == 1 => data.values().next().ok_or_else(|| {
                StoreError::NotFound {
                    store: self.id.clone(),
                    key: key.to_string(),
                }
            })?,
            None if data.is_empty() => {
                return Err(StoreError::NotFound {
                    store: self.id.clone(),
                    key: key.to_string(),
                });
            }
            None => {
                return Err(StoreError::AmbiguousSecret {
                    store: self.id.clone(),
                    key: key.to_string(),
                    message: format!(
                        "found fields {:?}, none named '{}'",
                        data.keys().collect::<Vec<_>>(),
                        self.kubeconfig_key
                    ),
                });
            }
        };

        let text = value.as_str().ok_or_else(|| {
            StoreError::backend(&self.id, format!("secret '{}' field is not a string", key))
        })?;

        Ok(decode_payload(text))
    }
}

/// Base64 payloads are decoded, anything else is taken verbatim
fn decode_payload(text: &str) -> Vec<u8> {
    let compact: String = text.split_whitespace().collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .unwrap_or_else(|_| text.as_bytes().to_vec())
}

fn read_token_file() -> Option<String> {
    let path = dirs::home_dir()?.join(".vault-token");
    let token = std::fs::read_to_string(path).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[async_trait]
impl Store for VaultStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Vault
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn prefix(&self, key: &str) -> Result<String> {
        Ok(key.rsplit('/').next().unwrap_or(key).to_string())
    }

    async fn start_search(&self, out: mpsc::Sender<SearchResult>, cancel: CancellationToken) {
        let mut level = self.roots.clone();

        while !level.is_empty() {
            let listings = futures::stream::iter(level)
                .map(|dir| async move {
                    let result = self.list(&dir).await;
                    (dir, result)
                })
                .buffer_unordered(MAX_CONCURRENT_LISTS)
                .collect::<Vec<_>>();

            let listings = tokio::select! {
                _ = cancel.cancelled() => return,
                listings = listings => listings,
            };

            let mut next = Vec::new();
            for (dir, result) in listings {
                let children = match result {
                    Ok(children) => children,
                    Err(e) => {
                        if out
                            .send(SearchResult::error(format!("listing '{}': {}", dir, e)))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        continue;
                    }
                };

                for child in children {
                    match child.strip_suffix('/') {
                        Some(sub) => next.push(format!("{}/{}", dir, sub)),
                        None => {
                            let key = format!("{}/{}", dir, child);
                            if out.send(SearchResult::entry(key)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            level = next;
        }
    }

    async fn fetch(&self, key: &str, _tags: &Tags) -> Result<Vec<u8>> {
        let data = self.read(key).await?;
        self.select_payload(key, &data)
    }
}
