//! Error types for kubeswitch-store

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for kubeswitch-store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by stores, the search orchestrator and the switch finalizer
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Kubeconfig, configuration or state file error
    #[error(transparent)]
    Core(#[from] kubeswitch_core::CoreError),

    /// Search path does not exist
    #[error("store '{store}': search path '{path}' does not exist")]
    PathNotFound { store: String, path: PathBuf },

    /// Entry cannot be fetched
    #[error("store '{store}': no kubeconfig found for '{key}'")]
    NotFound { store: String, key: String },

    /// Secret does not hold exactly one kubeconfig
    #[error("store '{store}': secret '{key}' is ambiguous: {message}\nHint: Set vaultKeyKubeconfig to the field holding the kubeconfig")]
    AmbiguousSecret {
        store: String,
        key: String,
        message: String,
    },

    /// Remote backend rejected or failed a request
    #[error("store '{store}': {message}")]
    Backend { store: String, message: String },

    /// Store configuration is unusable
    #[error("store '{store}': invalid configuration: {message}")]
    InvalidConfig { store: String, message: String },

    /// Tags required by fetch are missing
    #[error("store '{store}': entry '{key}' is missing tag '{tag}'")]
    MissingTag {
        store: String,
        key: String,
        tag: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Plugin process or protocol error
    #[error("plugin '{store}': {message}")]
    Plugin { store: String, message: String },

    /// gRPC status returned by a plugin
    #[error("plugin RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// The search was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error with the offending path
    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(e: serde_yaml::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    pub(crate) fn backend(store: &str, message: impl Into<String>) -> Self {
        StoreError::Backend {
            store: store.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn plugin(store: &str, message: impl Into<String>) -> Self {
        StoreError::Plugin {
            store: store.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::IoAt {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        StoreError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Check if the entry or file does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } | StoreError::PathNotFound { .. } => true,
            StoreError::Core(e) => e.is_not_found(),
            StoreError::Io(e) | StoreError::IoAt { source: e, .. } => {
                e.kind() == std::io::ErrorKind::NotFound
            }
            StoreError::Http(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// Check if the operation was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}
