//! Per-store search index
//!
//! Two sibling files in the state directory: `switch.<store-id>.index` maps
//! displayed context names to the entry they came from, and
//! `switch.<store-id>.index.state` records the store kind and write time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kubeswitch_core::{StatePaths, StoreKind, fsutil};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::Tags;

/// Where a context name was discovered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    /// Context name inside the kubeconfig, without prefix
    pub context: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile {
    kind: StoreKind,
    #[serde(default)]
    contexts: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexState {
    kind: StoreKind,
    last_update_time: DateTime<Utc>,
}

/// Search index of one store
#[derive(Debug, Clone)]
pub struct SearchIndex {
    kind: StoreKind,
    index_path: PathBuf,
    state_path: PathBuf,
}

impl SearchIndex {
    pub fn new(paths: &StatePaths, store_id: &str, kind: StoreKind) -> Self {
        Self {
            kind,
            index_path: paths.index_file(store_id),
            state_path: paths.index_state_file(store_id),
        }
    }

    /// Whether the index can replace a live search: both files exist, the
    /// kind matches and the last write is younger than `ttl`
    pub fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        if !self.index_path.exists() {
            return false;
        }

        let state: IndexState = match std::fs::read_to_string(&self.state_path)
            .ok()
            .and_then(|s| serde_yaml::from_str(&s).ok())
        {
            Some(state) => state,
            None => return false,
        };
        if state.kind != self.kind {
            debug!(path = %self.state_path.display(), "index kind mismatch");
            return false;
        }

        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        Utc::now().signed_duration_since(state.last_update_time) < ttl
    }

    /// Stored context names and their entries
    pub fn read(&self) -> Result<BTreeMap<String, IndexEntry>> {
        let content = std::fs::read_to_string(&self.index_path)
            .map_err(|e| StoreError::io_at(&self.index_path, e))?;
        let file: IndexFile = serde_yaml::from_str(&content)?;
        if file.kind != self.kind {
            return Err(StoreError::Serialization(format!(
                "index {} belongs to a {} store",
                self.index_path.display(),
                file.kind
            )));
        }
        Ok(file.contexts)
    }

    /// Replace the index and stamp it with the current time
    pub fn write(&self, contexts: BTreeMap<String, IndexEntry>) -> Result<()> {
        let file = IndexFile {
            kind: self.kind,
            contexts,
        };
        fsutil::write_atomic(&self.index_path, serde_yaml::to_string(&file)?.as_bytes())?;

        let state = IndexState {
            kind: self.kind,
            last_update_time: Utc::now(),
        };
        fsutil::write_atomic(&self.state_path, serde_yaml::to_string(&state)?.as_bytes())?;
        Ok(())
    }

    /// Remove both files; missing files are fine
    pub fn delete(&self) -> Result<()> {
        fsutil::remove_if_exists(&self.index_path)?;
        fsutil::remove_if_exists(&self.state_path)?;
        Ok(())
    }
}

/// Delete every index and index state file in the state directory.
/// Returns how many files were removed.
pub fn clear_indices(paths: &StatePaths) -> Result<usize> {
    let entries = match std::fs::read_dir(&paths.state_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io_at(&paths.state_dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry
            .map_err(|e| StoreError::io_at(&paths.state_dir, e))?
            .path();
        let is_index = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
            n.starts_with("switch.") && (n.ends_with(".index") || n.ends_with(".index.state"))
        });
        if is_index && fsutil::remove_if_exists(&path)? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StatePaths) {
        let tmp = TempDir::new().unwrap();
        let paths = StatePaths::new(tmp.path(), None);
        (tmp, paths)
    }

    fn entries() -> BTreeMap<String, IndexEntry> {
        BTreeMap::from([(
            "eks_default--eu-west-1/prod".to_string(),
            IndexEntry {
                key: "eks_default--eu-west-1--prod".to_string(),
                tags: Tags::from([("region".to_string(), "eu-west-1".to_string())]),
                context: "prod".to_string(),
            },
        )])
    }

    #[test]
    fn test_write_then_read() {
        let (_tmp, paths) = setup();
        let index = SearchIndex::new(&paths, "eks.default", StoreKind::Eks);

        assert!(!index.is_fresh(Some(Duration::from_secs(3600))));
        index.write(entries()).unwrap();

        assert!(index.is_fresh(Some(Duration::from_secs(3600))));
        assert_eq!(index.read().unwrap(), entries());
        assert!(paths.index_file("eks.default").exists());
        assert!(paths.index_state_file("eks.default").exists());
    }

    #[test]
    fn test_freshness_rules() {
        let (_tmp, paths) = setup();
        let index = SearchIndex::new(&paths, "eks.default", StoreKind::Eks);
        index.write(entries()).unwrap();

        // no TTL configured: never trusted
        assert!(!index.is_fresh(None));
        assert!(!index.is_fresh(Some(Duration::ZERO)));

        // written by a store of another kind
        let other = SearchIndex::new(&paths, "eks.default", StoreKind::Vault);
        assert!(!other.is_fresh(Some(Duration::from_secs(3600))));
        assert!(other.read().is_err());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_tmp, paths) = setup();
        let index = SearchIndex::new(&paths, "filesystem.default", StoreKind::Filesystem);
        index.write(BTreeMap::new()).unwrap();

        index.delete().unwrap();
        index.delete().unwrap();
        assert!(!paths.index_file("filesystem.default").exists());
    }

    #[test]
    fn test_clear_indices_keeps_other_state() {
        let (_tmp, paths) = setup();
        SearchIndex::new(&paths, "a.default", StoreKind::Filesystem)
            .write(BTreeMap::new())
            .unwrap();
        std::fs::write(paths.alias_file(), "contextToAliasMapping: {}\n").unwrap();

        assert_eq!(clear_indices(&paths).unwrap(), 2);
        assert!(paths.alias_file().exists());
    }
}
