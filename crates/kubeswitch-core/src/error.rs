//! Core error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid kubeconfig: {message}")]
    InvalidKubeconfig { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Context '{name}' not found in kubeconfig")]
    ContextNotFound { name: String },

    #[error("Kubeconfig has no current context")]
    NoCurrentContext,

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid alias definition '{input}': expected ALIAS=CONTEXT")]
    InvalidAlias { input: String },

    #[error("Alias '{alias}' not found")]
    AliasNotFound { alias: String },

    #[error("Could not determine home directory")]
    NoHomeDir,
}

impl CoreError {
    pub(crate) fn invalid_kubeconfig(message: impl Into<String>) -> Self {
        Self::InvalidKubeconfig {
            message: message.into(),
        }
    }

    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Check if this error is a missing-file error
    pub fn is_not_found(&self) -> bool {
        match self {
            CoreError::Io(e) | CoreError::IoAt { source: e, .. } => {
                e.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
