//! Clean command - remove temporary kubeconfigs, caches and search indices

use std::collections::BTreeSet;
use std::path::Path;

use kubeswitch_core::fsutil::remove_if_exists;
use kubeswitch_core::kubeconfig::is_temp_kubeconfig;
use kubeswitch_store::index::clear_indices;
use kubeswitch_store::{clear_cache_dir, filesystem_cache_dir};

use crate::error::Result;
use crate::settings::Settings;

/// Run the clean command
pub fn run(settings: &Settings) -> Result<()> {
    let temp_files = remove_temp_kubeconfigs(&settings.paths.temp_dir)?;

    let cache_dirs = settings
        .config
        .kubeconfig_stores
        .iter()
        .filter_map(|store| store.cache.as_ref())
        .filter_map(|cache| filesystem_cache_dir(cache).transpose())
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    let mut cached = 0;
    for dir in &cache_dirs {
        cached += clear_cache_dir(dir)?;
    }

    let indices = clear_indices(&settings.paths)?;

    println!(
        "Removed {} temporary kubeconfig(s), {} cached kubeconfig(s) and {} search index file(s)",
        temp_files, cached, indices
    );
    Ok(())
}

fn remove_temp_kubeconfigs(dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        if is_temp_kubeconfig(&path) && remove_if_exists(&path)? {
            removed += 1;
        }
    }
    Ok(removed)
}
