//! Kubeswitch Store - kubeconfig discovery for kubeswitch
//!
//! This crate provides:
//! - **Stores**: Filesystem, Vault, EKS, DigitalOcean and out-of-process plugin backends
//! - **Caches**: Memory and filesystem decorators around a store's fetch
//! - **Search Index**: Per-store record of discovered contexts with a TTL
//! - **Search**: Concurrent discovery across stores into one event stream
//! - **Switch**: Turning a selected context into a temporary kubeconfig

pub mod cache;
pub mod error;
pub mod factory;
pub mod index;
pub mod search;
pub mod store;
pub mod stores;
pub mod switch;

pub use cache::{FilesystemCache, MemoryCache, clear_cache_dir, filesystem_cache_dir, wrap_with_cache};
pub use error::{Result, StoreError};
pub use factory::{create_store, create_stores};
pub use index::{IndexEntry, SearchIndex};
pub use search::{
    DiscoveredContext, SearchEvent, SearchHandle, SearchSession, SearchStatus, search,
};
pub use store::{Previewer, SearchResult, Store, Tags, prefixed_name};
pub use stores::{
    DigitalOceanStore, EksStore, FilesystemStore, MockEntry, MockStore, OperationCounts,
    PluginStore, VaultStore,
};
pub use switch::{SwitchOptions, handshake_line, preview, switch_to};
