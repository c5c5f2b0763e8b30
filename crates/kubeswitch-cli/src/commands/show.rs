//! Show command - print the kubeconfig of one context

use std::io::Write;

use super::lookup;
use crate::error::Result;
use crate::settings::Settings;

/// Run the show command
pub async fn run(settings: &Settings, name: &str) -> Result<()> {
    let aliases = settings.aliases()?;
    let target = aliases.resolve(name).unwrap_or(name);

    let context = lookup(settings, target).await?;
    let bytes = context.store.fetch(&context.key, &context.tags).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    if !bytes.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
