//! History command - pick a previously used context

use kubeswitch_core::HistoryEntry;

use super::{finalize, lookup, print_warning};
use crate::error::Result;
use crate::picker::{Outcome, PickItem, Picker};
use crate::settings::Settings;

impl PickItem for HistoryEntry {
    fn label(&self) -> String {
        HistoryEntry::label(self)
    }
}

/// Run the history command
pub async fn run(settings: &Settings) -> Result<()> {
    let entries = settings.history().recent_unique()?;
    if entries.is_empty() {
        print_warning("history is empty");
        return Ok(());
    }

    match Picker::new("history").with_items(entries).pick().await? {
        Outcome::Selected(entry) => {
            let context = lookup(settings, &entry.context).await?;
            finalize(settings, &context, entry.namespace).await
        }
        Outcome::Cancelled => Ok(()),
    }
}
