//! Kubeswitch Core - shared types of the kubeconfig switcher
//!
//! This crate provides the foundational types used throughout kubeswitch:
//! - `Kubeconfig`: Order-preserving kubeconfig model with targeted mutators
//! - `SwitchConfig`: User configuration and store definitions
//! - `StatePaths`: Locations of temp kubeconfigs, indices and history
//! - `History`, `AliasTable`, `NamespaceCache`: Small persisted state files

pub mod alias;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod history;
pub mod kubeconfig;
pub mod namespace_cache;
pub mod paths;

pub use alias::AliasTable;
pub use config::{CacheConfig, CacheKind, StoreConfig, StoreKind, SwitchConfig};
pub use error::{CoreError, Result};
pub use history::{History, HistoryEntry};
pub use kubeconfig::{ExecPlugin, Kubeconfig, SWITCH_CONTEXT_KEY, SyntheticCluster};
pub use namespace_cache::NamespaceCache;
pub use paths::StatePaths;
