//! Alias command - manage short names for contexts

use console::style;
use kubeswitch_core::alias::parse_definition;

use super::lookup;
use crate::error::Result;
use crate::settings::Settings;

/// Bind `ALIAS=CONTEXT`. The context must be discoverable.
pub async fn set(settings: &Settings, definition: &str) -> Result<()> {
    let (alias, context) = parse_definition(definition)?;
    let discovered = lookup(settings, context).await?;

    let mut table = settings.aliases()?;
    let previous = table.set(alias, &discovered.name);
    table.save()?;

    match previous {
        Some(previous) if previous != discovered.name => println!(
            "Set alias {} for context {} (previously {})",
            alias, discovered.name, previous
        ),
        _ => println!("Set alias {} for context {}", alias, discovered.name),
    }
    Ok(())
}

/// Print every alias as `ALIAS: CONTEXT`
pub fn list(settings: &Settings) -> Result<()> {
    let table = settings.aliases()?;
    if table.is_empty() {
        eprintln!("{}", style("No aliases defined").dim());
        return Ok(());
    }

    for (alias, context) in table.aliases() {
        println!("{}: {}", alias, context);
    }
    Ok(())
}

/// Remove an alias
pub fn remove(settings: &Settings, alias: &str) -> Result<()> {
    let mut table = settings.aliases()?;
    let context = table.remove(alias)?;
    table.save()?;
    println!("Removed alias {} for context {}", alias, context);
    Ok(())
}
