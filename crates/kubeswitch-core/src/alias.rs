//! Context aliases
//!
//! Stored as a context → alias mapping. An alias names exactly one context:
//! binding an existing alias to another context moves it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::fsutil;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AliasFile {
    #[serde(default)]
    context_to_alias_mapping: BTreeMap<String, String>,
}

/// Alias table persisted in the state directory
#[derive(Debug)]
pub struct AliasTable {
    path: PathBuf,
    context_to_alias: BTreeMap<String, String>,
}

impl AliasTable {
    /// Load the table, treating a missing file as empty
    pub fn load(path: &Path) -> Result<Self> {
        let file = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => AliasFile::default(),
            Ok(content) => serde_yaml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AliasFile::default(),
            Err(e) => return Err(CoreError::io_at(path, e)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            context_to_alias: file.context_to_alias_mapping,
        })
    }

    /// Persist the table
    pub fn save(&self) -> Result<()> {
        let file = AliasFile {
            context_to_alias_mapping: self.context_to_alias.clone(),
        };
        fsutil::write_atomic(&self.path, serde_yaml::to_string(&file)?.as_bytes())
    }

    /// Bind `alias` to `context`. Returns the context the alias pointed to before, if any.
    pub fn set(&mut self, alias: &str, context: &str) -> Option<String> {
        let previous = self.resolve(alias).map(str::to_string);
        if let Some(prev) = &previous {
            self.context_to_alias.remove(prev);
        }
        self.context_to_alias
            .insert(context.to_string(), alias.to_string());
        previous
    }

    /// Remove an alias, returning the context it was bound to
    pub fn remove(&mut self, alias: &str) -> Result<String> {
        let context = self
            .resolve(alias)
            .map(str::to_string)
            .ok_or_else(|| CoreError::AliasNotFound {
                alias: alias.to_string(),
            })?;
        self.context_to_alias.remove(&context);
        Ok(context)
    }

    /// Context bound to `alias`
    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.context_to_alias
            .iter()
            .find(|(_, a)| a.as_str() == alias)
            .map(|(ctx, _)| ctx.as_str())
    }

    /// Alias of a context
    pub fn alias_for(&self, context: &str) -> Option<&str> {
        self.context_to_alias.get(context).map(String::as_str)
    }

    /// All bindings as alias → context
    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.context_to_alias
            .iter()
            .map(|(ctx, alias)| (alias.clone(), ctx.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.context_to_alias.is_empty()
    }
}

/// Split an `ALIAS=CONTEXT` definition
pub fn parse_definition(input: &str) -> Result<(&str, &str)> {
    match input.split_once('=') {
        Some((alias, context)) if !alias.trim().is_empty() && !context.trim().is_empty() => {
            Ok((alias.trim(), context.trim()))
        }
        _ => Err(CoreError::InvalidAlias {
            input: input.to_string(),
        }),
    }
}
