//! Store trait for kubeconfig discovery backends
//!
//! A store enumerates opaque entry keys during a search and later resolves a
//! key (plus the tags it reported alongside) into kubeconfig bytes. Keys and
//! tags must be enough to fetch an entry without a prior search, since the
//! search index replays them in later invocations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kubeswitch_core::{StoreConfig, StoreKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Identifiers a store attaches to a discovered entry
pub type Tags = BTreeMap<String, String>;

/// One record streamed by [`Store::start_search`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    /// A discovered entry
    Entry { key: String, tags: Tags },
    /// A failure that did not end the search
    Error { message: String },
}

impl SearchResult {
    pub fn entry(key: impl Into<String>) -> Self {
        SearchResult::Entry {
            key: key.into(),
            tags: Tags::new(),
        }
    }

    pub fn with_tags(key: impl Into<String>, tags: Tags) -> Self {
        SearchResult::Entry {
            key: key.into(),
            tags,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        SearchResult::Error {
            message: message.into(),
        }
    }
}

/// Kubeconfig discovery backend
///
/// Implementations must be Send + Sync; the orchestrator drives each store
/// from its own task.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store id, `<kind>.<id>`
    fn id(&self) -> &str;

    fn kind(&self) -> StoreKind;

    fn config(&self) -> &StoreConfig;

    /// Span the orchestrator runs this store's tasks in
    fn span(&self) -> tracing::Span {
        tracing::info_span!("store", id = self.id())
    }

    /// Pre-flight check of the configured search paths
    async fn verify(&self) -> Result<()> {
        Ok(())
    }

    /// Prefix that disambiguates the contexts of one entry
    async fn prefix(&self, key: &str) -> Result<String>;

    /// Prefix applied to context names, empty when `showPrefix` is off
    async fn context_prefix(&self, key: &str) -> Result<String> {
        if !self.config().show_prefix() {
            return Ok(String::new());
        }
        self.prefix(key).await
    }

    /// Stream discovered entries into `out`. Returning drops the sender.
    ///
    /// Per-entry failures are sent as [`SearchResult::Error`]. Implementations
    /// stop at their next yield point once `cancel` is tripped.
    async fn start_search(&self, out: mpsc::Sender<SearchResult>, cancel: CancellationToken);

    /// Raw kubeconfig bytes of one entry
    async fn fetch(&self, key: &str, tags: &Tags) -> Result<Vec<u8>>;

    /// Optional richer preview capability
    fn previewer(&self) -> Option<&dyn Previewer> {
        None
    }
}

/// Store-supplied preview text for an entry
#[async_trait]
pub trait Previewer: Send + Sync {
    async fn preview(&self, key: &str, tags: &Tags) -> Result<String>;
}

/// Join a prefix and a context name the way discovered contexts are displayed
pub fn prefixed_name(prefix: &str, context: &str) -> String {
    if prefix.is_empty() {
        context.to_string()
    } else {
        format!("{}/{}", prefix, context)
    }
}

/// Read a required tag
pub(crate) fn required_tag<'a>(
    store: &str,
    key: &str,
    tags: &'a Tags,
    tag: &str,
) -> Result<&'a str> {
    tags.get(tag)
        .map(String::as_str)
        .ok_or_else(|| crate::error::StoreError::MissingTag {
            store: store.to_string(),
            key: key.to_string(),
            tag: tag.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_name() {
        assert_eq!(prefixed_name("a", "ctx-a"), "a/ctx-a");
        assert_eq!(prefixed_name("", "ctx-a"), "ctx-a");
    }

    #[test]
    fn test_required_tag() {
        let tags = Tags::from([("region".to_string(), "eu-west-1".to_string())]);
        assert_eq!(required_tag("s", "k", &tags, "region").unwrap(), "eu-west-1");
        assert!(required_tag("s", "k", &tags, "cluster").is_err());
    }
}
