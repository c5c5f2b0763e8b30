//! DigitalOcean Kubernetes store
//!
//! Pages through the clusters of the account and downloads the ready-made
//! kubeconfig of a cluster on fetch. Summaries seen during discovery back the
//! preview.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use kubeswitch_core::{Kubeconfig, StoreConfig, StoreKind};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::store::{Previewer, SearchResult, Store, Tags, required_tag};

pub const TAG_CLUSTER_ID: &str = "cluster-id";
pub const TAG_REGION: &str = "region";

const DEFAULT_API_ADDRESS: &str = "https://api.digitalocean.com";
const PAGE_SIZE: u32 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DigitalOceanSettings {
    api_address: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterPage {
    #[serde(default)]
    kubernetes_clusters: Vec<Cluster>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    pages: Option<Pages>,
}

#[derive(Debug, Default, Deserialize)]
struct Pages {
    next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Cluster {
    id: String,
    name: String,
    region: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    status: Option<ClusterStatus>,
    #[serde(default)]
    node_pools: Vec<NodePool>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClusterStatus {
    state: String,
}

#[derive(Debug, Clone, Deserialize)]
struct NodePool {
    name: String,
    size: String,
    count: u32,
}

impl Cluster {
    fn summary(&self) -> String {
        let mut text = format!(
            "Cluster: {}\nID:      {}\nRegion:  {}\nVersion: {}\nStatus:  {}\n",
            self.name,
            self.id,
            self.region,
            self.version,
            self.status.as_ref().map(|s| s.state.as_str()).unwrap_or("unknown"),
        );
        if !self.node_pools.is_empty() {
            text.push_str("Node pools:\n");
            for pool in &self.node_pools {
                text.push_str(&format!("  - {} ({} x {})\n", pool.name, pool.count, pool.size));
            }
        }
        text
    }
}

pub struct DigitalOceanStore {
    id: String,
    config: StoreConfig,
    client: reqwest::Client,
    api_address: String,
    token: String,
    /// Clusters seen during discovery, by id
    discovered: Mutex<HashMap<String, Cluster>>,
}

impl DigitalOceanStore {
    /// Create a store, reading the token from `DIGITALOCEAN_ACCESS_TOKEN` or `config.token`
    pub fn new(config: StoreConfig) -> Result<Self> {
        let settings: DigitalOceanSettings = config.typed_config()?;
        let token = std::env::var("DIGITALOCEAN_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or(settings.token)
            .ok_or_else(|| StoreError::InvalidConfig {
                store: config.store_id(),
                message: "no API token: set DIGITALOCEAN_ACCESS_TOKEN or config.token"
                    .to_string(),
            })?;
        Self::with_token(config, token)
    }

    pub fn with_token(config: StoreConfig, token: String) -> Result<Self> {
        let settings: DigitalOceanSettings = config.typed_config()?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            id: config.store_id(),
            api_address: settings
                .api_address
                .unwrap_or_else(|| DEFAULT_API_ADDRESS.to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
            token,
            discovered: Mutex::new(HashMap::new()),
            config,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        Ok(response.error_for_status()?)
    }

    async fn page(&self, url: &str) -> Result<ClusterPage> {
        Ok(self.get(url).await?.json().await?)
    }
}

/// `digitalocean_<region>--<cluster-name>`
pub fn entry_key(region: &str, name: &str) -> String {
    format!("digitalocean_{}--{}", region, name)
}

#[async_trait]
impl Store for DigitalOceanStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Digitalocean
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn prefix(&self, key: &str) -> Result<String> {
        Ok(key.to_string())
    }

    async fn start_search(&self, out: mpsc::Sender<SearchResult>, cancel: CancellationToken) {
        let mut next = Some(format!(
            "{}/v2/kubernetes/clusters?page=1&per_page={}",
            self.api_address, PAGE_SIZE
        ));

        while let Some(url) = next.take() {
            let page = tokio::select! {
                _ = cancel.cancelled() => return,
                page = self.page(&url) => page,
            };

            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    let _ = out
                        .send(SearchResult::error(format!("listing clusters: {}", e)))
                        .await;
                    return;
                }
            };

            for cluster in page.kubernetes_clusters {
                let mut tags = Tags::new();
                tags.insert(TAG_CLUSTER_ID.to_string(), cluster.id.clone());
                tags.insert(TAG_REGION.to_string(), cluster.region.clone());
                let key = entry_key(&cluster.region, &cluster.name);

                self.discovered
                    .lock()
                    .await
                    .insert(cluster.id.clone(), cluster);

                if out.send(SearchResult::with_tags(key, tags)).await.is_err() {
                    return;
                }
            }

            next = page.links.and_then(|l| l.pages).and_then(|p| p.next);
        }
    }

    async fn fetch(&self, key: &str, tags: &Tags) -> Result<Vec<u8>> {
        let cluster_id = required_tag(&self.id, key, tags, TAG_CLUSTER_ID)?;
        let url = format!(
            "{}/v2/kubernetes/clusters/{}/kubeconfig",
            self.api_address, cluster_id
        );
        Ok(self.get(&url).await?.bytes().await?.to_vec())
    }

    fn previewer(&self) -> Option<&dyn Previewer> {
        Some(self)
    }
}

#[async_trait]
impl Previewer for DigitalOceanStore {
    async fn preview(&self, key: &str, tags: &Tags) -> Result<String> {
        let cluster_id = required_tag(&self.id, key, tags, TAG_CLUSTER_ID)?;
        if let Some(cluster) = self.discovered.lock().await.get(cluster_id) {
            return Ok(cluster.summary());
        }

        // cold cache, e.g. when the search was served from the index
        let bytes = self.fetch(key, tags).await?;
        let sanitized = Kubeconfig::parse(&bytes)?.to_sanitized_bytes()?;
        Ok(String::from_utf8_lossy(&sanitized).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: do-nyc1-web
  cluster:
    server: https://1.2.3.4
users:
- name: do-nyc1-web-admin
  user:
    token: secret-token
contexts:
- name: do-nyc1-web
  context:
    cluster: do-nyc1-web
    user: do-nyc1-web-admin
current-context: do-nyc1-web
"#;

    fn store(server: &MockServer) -> DigitalOceanStore {
        let config: StoreConfig = serde_yaml::from_str(&format!(
            "kind: digitalocean\nconfig:\n  apiAddress: {}\n",
            server.uri()
        ))
        .unwrap();
        DigitalOceanStore::with_token(config, "do-token".to_string()).unwrap()
    }

    fn cluster(id: &str, name: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": name,
            "region": "nyc1",
            "version": "1.30.1-do.0",
            "status": { "state": "running" },
            "node_pools": [{ "name": "pool-1", "size": "s-2vcpu-4gb", "count": 3 }]
        })
    }

    async fn mount_pages(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v2/kubernetes/clusters"))
            .and(query_param("page", "1"))
            .and(header("Authorization", "Bearer do-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kubernetes_clusters": [cluster("id-web", "web")],
                "links": { "pages": {
                    "next": format!("{}/v2/kubernetes/clusters?page=2&per_page=50", server.uri())
                }}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/kubernetes/clusters"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kubernetes_clusters": [cluster("id-api", "api")],
                "links": {}
            })))
            .mount(server)
            .await;
    }

    async fn search(store: &DigitalOceanStore) -> Vec<SearchResult> {
        let (tx, mut rx) = mpsc::channel(16);
        store.start_search(tx, CancellationToken::new()).await;
        let mut results = Vec::new();
        while let Some(r) = rx.recv().await {
            results.push(r);
        }
        results
    }

    #[tokio::test]
    async fn test_search_follows_pagination() {
        let server = MockServer::start().await;
        mount_pages(&server).await;

        let store = store(&server);
        let results = search(&store).await;

        let keys: Vec<&str> = results
            .iter()
            .filter_map(|r| match r {
                SearchResult::Entry { key, .. } => Some(key.as_str()),
                SearchResult::Error { .. } => None,
            })
            .collect();
        assert_eq!(keys, vec!["digitalocean_nyc1--web", "digitalocean_nyc1--api"]);

        let SearchResult::Entry { tags, .. } = &results[0] else {
            panic!("expected entry");
        };
        assert_eq!(tags[TAG_CLUSTER_ID], "id-web");
        assert_eq!(tags[TAG_REGION], "nyc1");
    }

    #[tokio::test]
    async fn test_fetch_and_preview() {
        let server = MockServer::start().await;
        mount_pages(&server).await;
        Mock::given(method("GET"))
            .and(path("/v2/kubernetes/clusters/id-web/kubeconfig"))
            .respond_with(ResponseTemplate::new(200).set_body_string(KUBECONFIG))
            .mount(&server)
            .await;

        let store = store(&server);
        let tags = Tags::from([(TAG_CLUSTER_ID.to_string(), "id-web".to_string())]);

        // cold cache falls back to the sanitized kubeconfig
        let cold = store.preview("digitalocean_nyc1--web", &tags).await.unwrap();
        assert!(cold.contains("REDACTED"));
        assert!(!cold.contains("secret-token"));

        search(&store).await;
        let warm = store.preview("digitalocean_nyc1--web", &tags).await.unwrap();
        assert!(warm.contains("Cluster: web"));
        assert!(warm.contains("pool-1 (3 x s-2vcpu-4gb)"));

        let bytes = store.fetch("digitalocean_nyc1--web", &tags).await.unwrap();
        assert_eq!(bytes, KUBECONFIG.as_bytes());
    }

    #[tokio::test]
    async fn test_unauthorized_search_reports_one_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let results = search(&store(&server)).await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], SearchResult::Error { .. }));
    }
}
