//! Well-known locations under `~/.kube`

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Directory name of temporary kubeconfigs, relative to `~/.kube`
pub const TEMP_DIR_NAME: &str = ".switch_tmp";

/// Locations of state shared between invocations
#[derive(Debug, Clone)]
pub struct StatePaths {
    /// Holds search indices, the alias table and the namespace cache
    pub state_dir: PathBuf,
    /// Holds temporary kubeconfigs handed to the shell
    pub temp_dir: PathBuf,
    /// Context switch history
    pub history_file: PathBuf,
}

impl StatePaths {
    /// Layout rooted at `home`, with an optional state directory override
    pub fn new(home: &Path, state_dir: Option<PathBuf>) -> Self {
        let kube_dir = home.join(".kube");
        Self {
            state_dir: state_dir.unwrap_or_else(|| kube_dir.join("switch-state")),
            temp_dir: kube_dir.join(TEMP_DIR_NAME),
            history_file: kube_dir.join(".switch_history"),
        }
    }

    /// Layout rooted at the current user's home directory
    pub fn from_home(state_dir: Option<PathBuf>) -> Result<Self> {
        let home = dirs::home_dir().ok_or(CoreError::NoHomeDir)?;
        Ok(Self::new(&home, state_dir))
    }

    pub fn alias_file(&self) -> PathBuf {
        self.state_dir.join("switch.alias")
    }

    pub fn namespace_dir(&self) -> PathBuf {
        self.state_dir.join("namespace")
    }

    /// Search index of one store
    pub fn index_file(&self, store_id: &str) -> PathBuf {
        self.state_dir.join(format!("switch.{}.index", store_id))
    }

    /// Freshness record of one store's search index
    pub fn index_state_file(&self, store_id: &str) -> PathBuf {
        self.state_dir.join(format!("switch.{}.index.state", store_id))
    }
}

/// Default location of the filesystem cache
pub fn default_cache_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(CoreError::NoHomeDir)?;
    Ok(home.join(".kube").join("cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = StatePaths::new(Path::new("/home/u"), None);
        assert_eq!(paths.state_dir, PathBuf::from("/home/u/.kube/switch-state"));
        assert_eq!(paths.temp_dir, PathBuf::from("/home/u/.kube/.switch_tmp"));
        assert_eq!(paths.history_file, PathBuf::from("/home/u/.kube/.switch_history"));
        assert_eq!(
            paths.index_file("filesystem.default"),
            PathBuf::from("/home/u/.kube/switch-state/switch.filesystem.default.index")
        );
        assert_eq!(
            paths.index_state_file("vault.prod"),
            PathBuf::from("/home/u/.kube/switch-state/switch.vault.prod.index.state")
        );
    }

    #[test]
    fn test_state_dir_override() {
        let paths = StatePaths::new(Path::new("/home/u"), Some(PathBuf::from("/var/state")));
        assert_eq!(paths.alias_file(), PathBuf::from("/var/state/switch.alias"));
        assert_eq!(paths.namespace_dir(), PathBuf::from("/var/state/namespace"));
        // temp files stay under ~/.kube for the shell wrapper
        assert_eq!(paths.temp_dir, PathBuf::from("/home/u/.kube/.switch_tmp"));
    }
}
