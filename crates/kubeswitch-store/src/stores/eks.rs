//! AWS EKS store
//!
//! Lists clusters per region and synthesizes a kubeconfig for each one whose
//! user obtains tokens through `aws eks get-token`.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_eks::Client;
use aws_sdk_eks::error::DisplayErrorContext;
use kubeswitch_core::{ExecPlugin, Kubeconfig, StoreConfig, StoreKind, SyntheticCluster};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{SearchResult, Store, Tags, required_tag};

pub const TAG_REGION: &str = "region";
pub const TAG_CLUSTER: &str = "cluster";
pub const TAG_PROFILE: &str = "profile";

const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";
const DEFAULT_PROFILE_LABEL: &str = "default";

/// Deadline of one SDK call, retries included
const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

fn timeout_config() -> TimeoutConfig {
    TimeoutConfig::builder()
        .operation_timeout(OPERATION_TIMEOUT)
        .operation_attempt_timeout(ATTEMPT_TIMEOUT)
        .build()
}

#[derive(Debug, Default, Deserialize)]
struct EksSettings {
    profile: Option<String>,
    #[serde(default)]
    regions: Vec<String>,
}

pub struct EksStore {
    id: String,
    config: StoreConfig,
    profile: Option<String>,
    regions: Vec<String>,
}

impl EksStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let settings: EksSettings = config.typed_config()?;
        Ok(Self {
            id: config.store_id(),
            profile: settings.profile.filter(|p| !p.is_empty()),
            regions: settings.regions,
            config,
        })
    }

    /// SDK client for a region. Returns the region the SDK resolved.
    async fn client(&self, region: Option<&str>) -> (Client, Option<String>) {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).timeout_config(timeout_config());
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;
        let resolved = config.region().map(|r| r.to_string());
        (Client::new(&config), resolved)
    }

    fn profile_label(&self) -> &str {
        self.profile.as_deref().unwrap_or(DEFAULT_PROFILE_LABEL)
    }

    fn entry(&self, region: &str, cluster: &str) -> SearchResult {
        let mut tags = Tags::new();
        tags.insert(TAG_REGION.to_string(), region.to_string());
        tags.insert(TAG_CLUSTER.to_string(), cluster.to_string());
        if let Some(profile) = &self.profile {
            tags.insert(TAG_PROFILE.to_string(), profile.clone());
        }
        SearchResult::with_tags(entry_key(self.profile_label(), region, cluster), tags)
    }

    /// Page through ListClusters of one region. Returns false once the search should stop.
    async fn search_region(
        &self,
        region: &str,
        out: &mpsc::Sender<SearchResult>,
        cancel: &CancellationToken,
    ) -> bool {
        let (client, _) = self.client(Some(region)).await;
        let mut next_token: Option<String> = None;

        loop {
            let mut request = client.list_clusters();
            if let Some(token) = next_token.take() {
                request = request.next_token(token);
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => return false,
                response = request.send() => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let message = format!(
                        "listing clusters in {}: {}",
                        region,
                        DisplayErrorContext(&e)
                    );
                    return out.send(SearchResult::error(message)).await.is_ok();
                }
            };

            for cluster in response.clusters() {
                if out.send(self.entry(region, cluster)).await.is_err() {
                    return false;
                }
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                return true;
            }
        }
    }
}

/// `eks_<profile>--<region>--<cluster>`
pub fn entry_key(profile: &str, region: &str, cluster: &str) -> String {
    format!("eks_{}--{}--{}", profile, region, cluster)
}

/// Kubeconfig of one cluster, authenticating through the AWS CLI
pub fn cluster_kubeconfig(
    cluster: &str,
    region: &str,
    profile: Option<&str>,
    endpoint: &str,
    certificate_authority_data: Option<String>,
) -> Kubeconfig {
    let mut args = vec![
        "--region".to_string(),
        region.to_string(),
        "eks".to_string(),
        "get-token".to_string(),
        "--cluster-name".to_string(),
        cluster.to_string(),
    ];
    if let Some(profile) = profile {
        args.push("--profile".to_string());
        args.push(profile.to_string());
    }

    Kubeconfig::synthesize(SyntheticCluster {
        name: cluster.to_string(),
        server: endpoint.to_string(),
        certificate_authority_data,
        exec: ExecPlugin {
            api_version: EXEC_API_VERSION.to_string(),
            command: "aws".to_string(),
            args,
            env: Vec::new(),
        },
    })
}

#[async_trait]
impl Store for EksStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Eks
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn prefix(&self, key: &str) -> Result<String> {
        Ok(key
            .rsplit_once("--")
            .map(|(prefix, _)| prefix)
            .unwrap_or(key)
            .to_string())
    }

    async fn start_search(&self, out: mpsc::Sender<SearchResult>, cancel: CancellationToken) {
        let regions = if self.regions.is_empty() {
            match self.client(None).await {
                (_, Some(region)) => vec![region],
                (_, None) => {
                    let _ = out
                        .send(SearchResult::error(
                            "no region configured and no default AWS region found",
                        ))
                        .await;
                    return;
                }
            }
        } else {
            self.regions.clone()
        };

        for region in &regions {
            debug!(region = %region, "listing EKS clusters");
            if !self.search_region(region, &out, &cancel).await {
                return;
            }
        }
    }

    async fn fetch(&self, key: &str, tags: &Tags) -> Result<Vec<u8>> {
        // region comes from the entry itself, never from the search loop
        let region = required_tag(&self.id, key, tags, TAG_REGION)?;
        let cluster = required_tag(&self.id, key, tags, TAG_CLUSTER)?;
        let profile = tags.get(TAG_PROFILE).map(String::as_str);

        let (client, _) = self.client(Some(region)).await;
        let response = client
            .describe_cluster()
            .name(cluster)
            .send()
            .await
            .map_err(|e| StoreError::backend(&self.id, DisplayErrorContext(&e).to_string()))?;

        let description = response.cluster().ok_or_else(|| StoreError::NotFound {
            store: self.id.clone(),
            key: key.to_string(),
        })?;
        let endpoint = description.endpoint().ok_or_else(|| {
            StoreError::backend(&self.id, format!("cluster '{}' has no endpoint yet", cluster))
        })?;
        let ca = description
            .certificate_authority()
            .and_then(|ca| ca.data())
            .map(str::to_string);

        Ok(cluster_kubeconfig(cluster, region, profile, endpoint, ca).to_bytes()?)
    }
}
