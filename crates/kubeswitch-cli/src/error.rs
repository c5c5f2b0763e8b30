//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use kubeswitch_core::CoreError;
use kubeswitch_store::StoreError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Configuration file unreadable or invalid
    #[error("Configuration error: {message}")]
    #[diagnostic(code(kubeswitch::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Requested context unknown, ambiguous or unusable
    #[error("{message}")]
    #[diagnostic(code(kubeswitch::cli::selection))]
    Selection {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Store initialization, search or fetch failed
    #[error("Store error: {message}")]
    #[diagnostic(code(kubeswitch::cli::store))]
    Store {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(kubeswitch::cli::io))]
    Io { message: String },

    /// Invalid arguments
    #[error("{message}")]
    #[diagnostic(code(kubeswitch::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Commands run by `exec` that exited unsuccessfully
    #[error("command failed for {failed} of {total} context(s)")]
    #[diagnostic(code(kubeswitch::cli::exec))]
    CommandFailed { failed: usize, total: usize },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(kubeswitch::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Selection { .. } => exit_codes::SELECTION_ERROR,
            CliError::Store { .. } => exit_codes::STORE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::CommandFailed { .. } => exit_codes::ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a selection error
    pub fn selection(message: impl Into<String>) -> Self {
        Self::Selection {
            message: message.into(),
            help: None,
        }
    }

    /// Create a selection error with help text
    pub fn selection_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Selection {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a usage error with help text
    pub fn usage_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a failure to load the configuration file
    pub fn from_config_load(err: CoreError) -> Self {
        match err {
            CoreError::Io(_) | CoreError::IoAt { .. } => Self::Config {
                message: err.to_string(),
                help: Some("Pass --config-path to use another configuration file".to_string()),
            },
            other => Self::Config {
                message: other.to_string(),
                help: Some(
                    "Each store needs a known kind (filesystem, vault, eks, digitalocean, plugin)"
                        .to_string(),
                ),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::InvalidConfig { .. } | CoreError::YamlParse(_) | CoreError::NoHomeDir => {
                CliError::config(message)
            }
            CoreError::Io(_) | CoreError::IoAt { .. } => CliError::Io { message },
            CoreError::InvalidAlias { .. } => CliError::usage_with_help(
                message,
                "Define aliases as `switcher alias NAME=CONTEXT`",
            ),
            CoreError::AliasNotFound { .. } => {
                CliError::selection_with_help(message, "List aliases with `switcher alias ls`")
            }
            CoreError::InvalidKubeconfig { .. }
            | CoreError::ContextNotFound { .. }
            | CoreError::NoCurrentContext => CliError::selection(message),
        }
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Core(core) => core.into(),
            StoreError::Io(e) => CliError::Io {
                message: e.to_string(),
            },
            e @ StoreError::IoAt { .. } => CliError::Io {
                message: e.to_string(),
            },
            e @ StoreError::PathNotFound { .. } => CliError::Store {
                message: e.to_string(),
                help: Some(
                    "Check the paths of the store in the configuration or --kubeconfig-path"
                        .to_string(),
                ),
            },
            e => CliError::Store {
                message: e.to_string(),
                help: None,
            },
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::config("x").exit_code(), exit_codes::CONFIG_ERROR);
        assert_eq!(
            CliError::selection("x").exit_code(),
            exit_codes::SELECTION_ERROR
        );
        assert_eq!(
            CliError::CommandFailed {
                failed: 1,
                total: 2
            }
            .exit_code(),
            exit_codes::ERROR
        );
    }

    #[test]
    fn test_core_error_mapping() {
        let err: CliError = CoreError::AliasNotFound {
            alias: "foo".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_codes::SELECTION_ERROR);

        let err: CliError = CoreError::InvalidAlias {
            input: "foo".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_codes::USAGE_ERROR);
    }

    #[test]
    fn test_store_error_mapping() {
        let err: CliError = StoreError::NotFound {
            store: "filesystem.default".into(),
            key: "/tmp/x".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_codes::STORE_ERROR);

        let err: CliError = StoreError::Core(CoreError::ContextNotFound {
            name: "ctx".into(),
        })
        .into();
        assert_eq!(err.exit_code(), exit_codes::SELECTION_ERROR);
    }
}
