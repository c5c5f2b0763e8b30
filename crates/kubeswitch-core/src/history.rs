//! Context switch history
//!
//! One `CONTEXT :: NAMESPACE` line per switch, oldest first. A switch that
//! repeats the last line is not recorded again.

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::fsutil::write_atomic;

const SEPARATOR: &str = " :: ";

/// One recorded switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub context: String,
    pub namespace: Option<String>,
}

impl HistoryEntry {
    pub fn new(context: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            context: context.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
        }
    }

    /// Parse one history line. Lines without a separator are treated as a bare context.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        match line.split_once(SEPARATOR) {
            Some((context, namespace)) => Some(Self::new(
                context.trim(),
                Some(namespace.trim().to_string()),
            )),
            None => Some(Self::new(line.trim_end_matches(" ::").trim(), None)),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}{}{}",
            self.context,
            SEPARATOR,
            self.namespace.as_deref().unwrap_or_default()
        )
    }

    /// Label shown in the history picker
    pub fn label(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} ({})", self.context, ns),
            None => self.context.clone(),
        }
    }
}

/// History log. Every append rewrites the file through a rename.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, oldest first. A missing file is an empty history.
    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.read()?.lines().filter_map(HistoryEntry::parse).collect())
    }

    fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(c) => Ok(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(CoreError::io_at(&self.path, e)),
        }
    }

    /// Append an entry unless it equals the last recorded one.
    /// Returns whether a line was written.
    pub fn append(&self, entry: &HistoryEntry) -> Result<bool> {
        let mut content = self.read()?;
        let last = content.lines().filter_map(HistoryEntry::parse).last();
        if last.as_ref() == Some(entry) {
            return Ok(false);
        }

        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&entry.to_line());
        content.push('\n');
        write_atomic(&self.path, content.as_bytes())?;
        Ok(true)
    }

    /// Most recent entry
    pub fn last(&self) -> Result<Option<HistoryEntry>> {
        Ok(self.entries()?.pop())
    }

    /// Entry before the most recent one
    pub fn previous(&self) -> Result<Option<HistoryEntry>> {
        let mut entries = self.entries()?;
        let len = entries.len();
        if len < 2 {
            return Ok(None);
        }
        Ok(Some(entries.swap_remove(len - 2)))
    }

    /// Distinct entries, newest first
    pub fn recent_unique(&self) -> Result<Vec<HistoryEntry>> {
        let mut seen = std::collections::HashSet::new();
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .filter(|e| seen.insert(e.to_line()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn history() -> (TempDir, History) {
        let tmp = TempDir::new().unwrap();
        let history = History::new(tmp.path().join(".kube").join(".switch_history"));
        (tmp, history)
    }

    #[test]
    fn test_line_format() {
        let entry = HistoryEntry::new("a/ctx-a", Some("kube-system".into()));
        assert_eq!(entry.to_line(), "a/ctx-a :: kube-system");
        assert_eq!(HistoryEntry::new("a/ctx-a", None).to_line(), "a/ctx-a :: ");
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            HistoryEntry::parse("a/ctx-a :: team"),
            Some(HistoryEntry::new("a/ctx-a", Some("team".into())))
        );
        assert_eq!(
            HistoryEntry::parse("a/ctx-a :: "),
            Some(HistoryEntry::new("a/ctx-a", None))
        );
        assert_eq!(
            HistoryEntry::parse("legacy-context"),
            Some(HistoryEntry::new("legacy-context", None))
        );
        assert_eq!(HistoryEntry::parse("   "), None);
    }

    #[test]
    fn test_append_dedups_against_last_line() {
        let (_tmp, history) = history();
        let a = HistoryEntry::new("a/ctx-a", None);
        let b = HistoryEntry::new("b/ctx-b", None);

        assert!(history.append(&a).unwrap());
        assert!(!history.append(&a).unwrap());
        assert!(history.append(&b).unwrap());
        assert!(history.append(&a).unwrap());

        assert_eq!(history.entries().unwrap(), vec![a.clone(), b.clone(), a.clone()]);
    }

    #[test]
    fn test_last_and_previous() {
        let (_tmp, history) = history();
        assert_eq!(history.last().unwrap(), None);
        assert_eq!(history.previous().unwrap(), None);

        history.append(&HistoryEntry::new("a/ctx-a", None)).unwrap();
        assert_eq!(history.previous().unwrap(), None);

        history
            .append(&HistoryEntry::new("b/ctx-b", Some("ns".into())))
            .unwrap();
        assert_eq!(history.last().unwrap().unwrap().context, "b/ctx-b");
        assert_eq!(history.previous().unwrap().unwrap().context, "a/ctx-a");
    }

    #[test]
    fn test_recent_unique() {
        let (_tmp, history) = history();
        for ctx in ["a", "b", "a", "c"] {
            history.append(&HistoryEntry::new(ctx, None)).unwrap();
        }
        let contexts: Vec<_> = history
            .recent_unique()
            .unwrap()
            .into_iter()
            .map(|e| e.context)
            .collect();
        assert_eq!(contexts, vec!["c", "a", "b"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_append_replaces_file() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let (_tmp, history) = history();
        std::fs::create_dir_all(history.path().parent().unwrap()).unwrap();
        std::fs::write(history.path(), "legacy-context").unwrap();
        let before = std::fs::metadata(history.path()).unwrap().ino();

        history.append(&HistoryEntry::new("a/ctx-a", None)).unwrap();

        let metadata = std::fs::metadata(history.path()).unwrap();
        assert_ne!(metadata.ino(), before);
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        assert_eq!(
            std::fs::read_to_string(history.path()).unwrap(),
            "legacy-context\na/ctx-a :: \n"
        );
    }
}
