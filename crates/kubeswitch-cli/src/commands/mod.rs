//! CLI commands

pub mod alias;
pub mod clean;
pub mod exec;
pub mod history;
pub mod list_contexts;
pub mod namespace;
pub mod show;
pub mod switch;

use std::sync::Arc;

use console::style;
use kubeswitch_store::{DiscoveredContext, SearchEvent, SwitchOptions, handshake_line, switch_to};
use tracing::warn;

use crate::error::{CliError, Result};
use crate::settings::Settings;

/// Find one context by name
///
/// An exact match on the displayed name wins and stops the search right
/// away. Otherwise the context name without store prefix must be unique.
pub(crate) async fn lookup(settings: &Settings, name: &str) -> Result<Arc<DiscoveredContext>> {
    let mut handle = settings.search().await?;
    let mut candidates: Vec<Arc<DiscoveredContext>> = Vec::new();

    while let Some(event) = handle.next().await {
        match event {
            SearchEvent::Context(context) if context.name == name => {
                handle.cancel();
                return Ok(context);
            }
            SearchEvent::Context(context) => {
                if context.context == name && !candidates.iter().any(|c| c.name == context.name) {
                    candidates.push(context);
                }
            }
            SearchEvent::Error { store_id, message } => {
                warn!(store = %store_id, "{}", message);
            }
        }
    }
    if handle.timed_out() {
        warn_timeout();
    }

    match candidates.len() {
        0 => Err(CliError::selection_with_help(
            format!("context '{}' not found", name),
            "List available contexts with `switcher list-contexts`",
        )),
        1 => Ok(candidates.remove(0)),
        _ => {
            let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
            Err(CliError::selection_with_help(
                format!("context '{}' is ambiguous", name),
                format!("Use one of: {}", names.join(", ")),
            ))
        }
    }
}

/// Materialize a context and hand its path to the shell
pub(crate) async fn finalize(
    settings: &Settings,
    context: &DiscoveredContext,
    namespace: Option<String>,
) -> Result<()> {
    let options = SwitchOptions {
        namespace,
        record_history: true,
    };
    let path = switch_to(context, &settings.paths, &options).await?;
    println!("{}", handshake_line(&path));
    Ok(())
}

pub(crate) fn print_warning(message: &str) {
    eprintln!("{} {}", style("warning:").yellow().bold(), message);
}

pub(crate) fn warn_timeout() {
    print_warning("search timed out, results may be incomplete");
}
