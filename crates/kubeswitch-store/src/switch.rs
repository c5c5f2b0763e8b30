//! Selection finalizer
//!
//! Materializes a chosen context as a temporary kubeconfig. The origin of the
//! kubeconfig is never written to.

use std::path::{Path, PathBuf};

use kubeswitch_core::{
    CoreError, History, HistoryEntry, Kubeconfig, SWITCH_CONTEXT_KEY, StatePaths,
};
use tracing::warn;

use crate::error::Result;
use crate::search::DiscoveredContext;

/// Line the shell wrapper looks for on stdout
pub fn handshake_line(path: &Path) -> String {
    format!("switched to context \"{}\".", path.display())
}

#[derive(Debug, Clone, Default)]
pub struct SwitchOptions {
    /// Namespace to set on the selected context
    pub namespace: Option<String>,
    /// Append the switch to the history log
    pub record_history: bool,
}

/// Write a temporary kubeconfig selecting `context`. Returns its absolute path.
pub async fn switch_to(
    context: &DiscoveredContext,
    paths: &StatePaths,
    options: &SwitchOptions,
) -> Result<PathBuf> {
    let bytes = context.store.fetch(&context.key, &context.tags).await?;
    let mut kubeconfig = Kubeconfig::parse(&bytes)?;

    if !kubeconfig.has_context(&context.context) {
        return Err(CoreError::ContextNotFound {
            name: context.context.clone(),
        }
        .into());
    }

    kubeconfig.set_current_context(&context.context);
    if let Some(namespace) = options.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        kubeconfig.set_namespace_for_current_context(namespace)?;
    }
    kubeconfig.set_switch_metadata(SWITCH_CONTEXT_KEY, &context.name);

    let path = kubeconfig.write_to_temp_file(&paths.temp_dir)?;

    if options.record_history {
        let entry = HistoryEntry::new(
            context.name.clone(),
            kubeconfig.current_namespace().map(str::to_string),
        );
        if let Err(e) = History::new(&paths.history_file).append(&entry) {
            warn!(error = %e, "failed to record history");
        }
    }

    Ok(path)
}

/// Preview text of a context: the cached sanitized kubeconfig, the store's own
/// preview, or a freshly fetched sanitized kubeconfig
pub async fn preview(context: &DiscoveredContext) -> Result<String> {
    if let Some(preview) = &context.preview {
        return Ok(preview.clone());
    }
    if let Some(previewer) = context.store.previewer() {
        return previewer.preview(&context.key, &context.tags).await;
    }

    let bytes = context.store.fetch(&context.key, &context.tags).await?;
    let sanitized = Kubeconfig::parse(&bytes)?.to_sanitized_bytes()?;
    Ok(String::from_utf8_lossy(&sanitized).into_owned())
}
