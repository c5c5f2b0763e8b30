//! Exec command - run a command against every matching context
//!
//! Each match gets its own temporary kubeconfig, exported to the command as
//! `KUBECONFIG`. Contexts are processed one after another.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use console::style;
use kubeswitch_core::StatePaths;
use kubeswitch_store::{DiscoveredContext, SearchEvent, SwitchOptions, switch_to};
use tokio::process::Command;

use super::{print_warning, warn_timeout};
use crate::error::{CliError, Result};
use crate::settings::Settings;

/// Run the exec command
pub async fn run(settings: &Settings, pattern: &str, command: &[String]) -> Result<()> {
    let pattern = glob::Pattern::new(pattern).map_err(|e| {
        CliError::usage_with_help(
            format!("invalid pattern '{}': {}", pattern, e),
            "Patterns support `*`, `?` and `[...]`",
        )
    })?;
    let Some((program, args)) = command.split_first() else {
        return Err(CliError::usage_with_help(
            "no command given",
            "Pass the command after `--`, e.g. `switcher exec '*' -- kubectl get nodes`",
        ));
    };

    let mut handle = settings.search().await?;
    let mut contexts = Vec::new();
    while let Some(event) = handle.next().await {
        match event {
            SearchEvent::Context(context) => contexts.push(context),
            SearchEvent::Error { store_id, message } => {
                print_warning(&format!("{}: {}", store_id, message));
            }
        }
    }
    if handle.timed_out() {
        warn_timeout();
    }

    let matched = matching(contexts, &pattern);
    if matched.is_empty() {
        return Err(CliError::selection(format!(
            "no context matches '{}'",
            pattern.as_str()
        )));
    }

    let total = matched.len();
    let failed = fan_out(matched.values(), &settings.paths, program, args).await;

    if failed > 0 {
        return Err(CliError::CommandFailed { failed, total });
    }
    Ok(())
}

/// Run the command once per context. Returns the number of failed contexts.
async fn fan_out<'a>(
    contexts: impl Iterator<Item = &'a Arc<DiscoveredContext>>,
    paths: &StatePaths,
    program: &str,
    args: &[String],
) -> usize {
    let options = SwitchOptions::default();
    let mut failed = 0;

    for context in contexts {
        eprintln!("{}", style(format!("==> {}", context.name)).bold());

        let path = match switch_to(context, paths, &options).await {
            Ok(path) => path,
            Err(e) => {
                print_warning(&format!("{}: {}", context.name, e));
                failed += 1;
                continue;
            }
        };
        if !run_in(&context.name, &path, program, args).await {
            failed += 1;
        }
    }
    failed
}

/// Run the command with `KUBECONFIG` pointing at `path`. Returns whether it succeeded.
async fn run_in(name: &str, path: &Path, program: &str, args: &[String]) -> bool {
    match Command::new(program)
        .args(args)
        .env("KUBECONFIG", path)
        .status()
        .await
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            print_warning(&format!("{}: command exited with {}", name, status));
            false
        }
        Err(e) => {
            print_warning(&format!("{}: cannot run '{}': {}", name, program, e));
            false
        }
    }
}

/// Contexts whose displayed name matches, sorted and without duplicates
fn matching(
    contexts: Vec<Arc<DiscoveredContext>>,
    pattern: &glob::Pattern,
) -> BTreeMap<String, Arc<DiscoveredContext>> {
    let mut matched = BTreeMap::new();
    for context in contexts {
        if pattern.matches(&context.name) {
            matched.entry(context.name.clone()).or_insert(context);
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeswitch_core::StatePaths;
    use kubeswitch_store::{MockEntry, MockStore, Store, Tags};
    use tempfile::TempDir;

    fn context(name: &str) -> Arc<DiscoveredContext> {
        let store: Arc<dyn Store> = Arc::new(MockStore::new("test", Vec::new()));
        Arc::new(DiscoveredContext {
            name: name.to_string(),
            context: name.rsplit('/').next().unwrap().to_string(),
            key: name.to_string(),
            tags: Tags::new(),
            store,
            preview: None,
        })
    }

    #[test]
    fn test_matching_sorts_and_dedups() {
        let contexts = vec![
            context("b/ctx-b"),
            context("a/ctx-a"),
            context("prod/api"),
            context("a/ctx-a"),
        ];
        let pattern = glob::Pattern::new("?/ctx-*").unwrap();
        let names: Vec<String> = matching(contexts, &pattern).into_keys().collect();
        assert_eq!(names, vec!["a/ctx-a", "b/ctx-b"]);
    }

    #[test]
    fn test_star_matches_everything() {
        let contexts = vec![context("a/ctx-a"), context("prod/api")];
        let pattern = glob::Pattern::new("*").unwrap();
        assert_eq!(matching(contexts, &pattern).len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_context_does_not_stop_the_others() {
        let tmp = TempDir::new().unwrap();
        let paths = StatePaths::new(tmp.path(), None);
        let kubeconfig = "apiVersion: v1\nkind: Config\nclusters: []\nusers: []\ncontexts:\n- name: ctx-a\n  context:\n    cluster: c\n    user: u\n";
        let store: Arc<dyn Store> = Arc::new(MockStore::new(
            "test",
            vec![MockEntry::new("a/ctx-a", kubeconfig)],
        ));
        let contexts = vec![
            context_in(store.clone(), "a/ctx-a"),
            context_in(store, "gone/ctx-gone"),
        ];

        let failed = fan_out(contexts.iter(), &paths, "true", &[]).await;

        assert_eq!(failed, 1);
        let written = std::fs::read_dir(&paths.temp_dir).unwrap().count();
        assert_eq!(written, 1);
    }
}
