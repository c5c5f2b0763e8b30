//! Store implementations
//!
//! - **Filesystem**: kubeconfig files below local directories
//! - **Vault**: kubeconfigs kept as HashiCorp Vault KV secrets
//! - **EKS**: AWS EKS clusters, with a synthesized kubeconfig per cluster
//! - **DigitalOcean**: DigitalOcean Kubernetes clusters
//! - **Plugin**: any backend implemented by an out-of-process gRPC plugin
//! - **Mock**: in-memory store for tests

mod digitalocean;
mod eks;
mod filesystem;
mod mock;
pub mod plugin;
mod vault;

pub use digitalocean::DigitalOceanStore;
pub use eks::EksStore;
pub use filesystem::FilesystemStore;
pub use mock::{MockEntry, MockStore, OperationCounts};
pub use plugin::PluginStore;
pub use vault::VaultStore;
