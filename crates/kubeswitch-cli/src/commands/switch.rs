//! Switch command - pick a context, or switch to one by name

use std::sync::Arc;

use futures::FutureExt;
use kubeswitch_store::{DiscoveredContext, SearchEvent, preview};
use tokio::sync::mpsc;
use tracing::debug;

use super::{finalize, lookup};
use crate::error::{CliError, Result};
use crate::picker::{Feed, Outcome, PickItem, Picker, PreviewFn};
use crate::settings::Settings;

/// Switch to the previous history entry
pub const PREVIOUS: &str = "-";
/// Switch to the last history entry again
pub const LAST: &str = ".";

impl PickItem for Arc<DiscoveredContext> {
    fn label(&self) -> String {
        self.name.clone()
    }
}

/// Run the switch command
pub async fn run(settings: &Settings, name: Option<&str>) -> Result<()> {
    match name {
        None => interactive(settings).await,
        Some(PREVIOUS) => {
            let entry = settings.history().previous()?.ok_or_else(|| {
                CliError::selection("no previous context in history")
            })?;
            let context = lookup(settings, &entry.context).await?;
            finalize(settings, &context, entry.namespace).await
        }
        Some(LAST) => {
            let entry = settings
                .history()
                .last()?
                .ok_or_else(|| CliError::selection("history is empty"))?;
            let context = lookup(settings, &entry.context).await?;
            finalize(settings, &context, entry.namespace).await
        }
        Some(name) => {
            let aliases = settings.aliases()?;
            let target = match aliases.resolve(name) {
                Some(context) => {
                    debug!(alias = name, context, "resolved alias");
                    context
                }
                None => name,
            };
            let context = lookup(settings, target).await?;
            finalize(settings, &context, None).await
        }
    }
}

async fn interactive(settings: &Settings) -> Result<()> {
    let handle = settings.search().await?;
    let (mut events, status) = handle.into_parts();

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let feed = match event {
                SearchEvent::Context(context) => Feed::Item(context),
                SearchEvent::Error { store_id, message } => {
                    Feed::Error(format!("{}: {}", store_id, message))
                }
            };
            if tx.send(feed).await.is_err() {
                break;
            }
        }
    });

    let picker = Picker::new("context")
        .with_feed(rx)
        .with_preview(context_preview())
        .with_search_status(status);

    match picker.pick().await? {
        Outcome::Selected(context) => finalize(settings, &context, None).await,
        Outcome::Cancelled => Ok(()),
    }
}

/// Preview text of a context; failures show as an empty preview
pub(crate) fn context_preview() -> PreviewFn<Arc<DiscoveredContext>> {
    Arc::new(|context: Arc<DiscoveredContext>| {
        async move {
            preview(&context).await.unwrap_or_else(|e| {
                debug!(context = %context.name, error = %e, "preview failed");
                String::new()
            })
        }
        .boxed()
    })
}
