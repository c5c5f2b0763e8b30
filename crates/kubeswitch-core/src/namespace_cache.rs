//! Last observed namespaces per context

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::fsutil;

/// Namespace cache directory, one file per context
#[derive(Debug, Clone)]
pub struct NamespaceCache {
    dir: PathBuf,
}

impl NamespaceCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cached namespaces of a context, empty when nothing was recorded yet
    pub fn read(&self, context: &str) -> Result<Vec<String>> {
        let path = self.path_for(context);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CoreError::io_at(&path, e)),
        }
    }

    /// Replace the cached namespaces of a context
    pub fn write(&self, context: &str, namespaces: &[String]) -> Result<()> {
        let mut content = namespaces.join("\n");
        content.push('\n');
        fsutil::write_atomic(&self.path_for(context), content.as_bytes())
    }

    fn path_for(&self, context: &str) -> PathBuf {
        self.dir.join(sanitize_file_name(context))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Map a context name onto a single safe file name component
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
