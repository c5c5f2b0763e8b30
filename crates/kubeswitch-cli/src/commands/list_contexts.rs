//! List-contexts command - print every discovered context

use kubeswitch_store::SearchEvent;

use super::{print_warning, warn_timeout};
use crate::error::Result;
use crate::settings::Settings;

/// Run the list-contexts command
pub async fn run(settings: &Settings) -> Result<()> {
    let mut handle = settings.search().await?;

    while let Some(event) = handle.next().await {
        match event {
            SearchEvent::Context(context) => println!("{}", context.name),
            SearchEvent::Error { store_id, message } => {
                print_warning(&format!("{}: {}", store_id, message));
            }
        }
    }

    if handle.timed_out() {
        warn_timeout();
    }
    Ok(())
}
