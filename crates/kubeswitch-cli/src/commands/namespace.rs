//! Namespace command - change the namespace of the current context
//!
//! Works on the kubeconfig named by `KUBECONFIG`. Cached namespaces are
//! offered right away while the cluster is asked for the current list.

use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig as KubeClientConfig};
use kubeswitch_core::kubeconfig::is_temp_kubeconfig;
use kubeswitch_core::{
    CoreError, History, HistoryEntry, Kubeconfig, NamespaceCache, SWITCH_CONTEXT_KEY,
};
use kubeswitch_store::handshake_line;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{CliError, Result};
use crate::picker::{Feed, Outcome, PickItem, Picker};
use crate::settings::Settings;

impl PickItem for String {
    fn label(&self) -> String {
        self.clone()
    }
}

/// Run the namespace command
pub async fn run(settings: &Settings, name: Option<&str>) -> Result<()> {
    let path = current_kubeconfig_path()?;
    let kubeconfig = Kubeconfig::from_path(&path)?;
    let context = kubeconfig.current_context().to_string();
    if context.is_empty() {
        return Err(CoreError::NoCurrentContext.into());
    }

    let namespace = match name {
        Some(name) => name.to_string(),
        None => match pick(settings, &path, &context).await? {
            Some(namespace) => namespace,
            None => return Ok(()),
        },
    };

    apply(settings, kubeconfig, &path, &namespace)
}

/// The single kubeconfig file named by `KUBECONFIG`
fn current_kubeconfig_path() -> Result<PathBuf> {
    let value = std::env::var_os("KUBECONFIG").unwrap_or_default();
    let mut paths = std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty());

    match (paths.next(), paths.next()) {
        (Some(path), None) => Ok(path),
        _ => Err(CliError::selection_with_help(
            "KUBECONFIG must point to exactly one kubeconfig file",
            "Switch to a context first, e.g. `switcher <context>`",
        )),
    }
}

async fn pick(settings: &Settings, path: &Path, context: &str) -> Result<Option<String>> {
    let cache = NamespaceCache::new(settings.namespace_dir());
    let cached = cache.read(context)?;

    let (tx, rx) = mpsc::channel(64);
    let refresh = tokio::spawn(refresh_namespaces(
        path.to_path_buf(),
        context.to_string(),
        cache,
        cached.clone(),
        tx,
    ));

    let outcome = Picker::new(format!("namespace ({})", context))
        .with_items(cached)
        .with_feed(rx)
        .pick()
        .await;
    refresh.abort();

    match outcome? {
        Outcome::Selected(namespace) => Ok(Some(namespace)),
        Outcome::Cancelled => Ok(None),
    }
}

/// List namespaces from the cluster, feed the new ones to the picker and
/// refresh the cache
async fn refresh_namespaces(
    path: PathBuf,
    context: String,
    cache: NamespaceCache,
    cached: Vec<String>,
    tx: mpsc::Sender<Feed<String>>,
) {
    let namespaces = match list_namespaces(&path).await {
        Ok(namespaces) => namespaces,
        Err(message) => {
            let _ = tx.send(Feed::Error(message)).await;
            return;
        }
    };

    if let Err(e) = cache.write(&context, &namespaces) {
        warn!(error = %e, "failed to update namespace cache");
    }

    for namespace in namespaces {
        if !cached.contains(&namespace) && tx.send(Feed::Item(namespace)).await.is_err() {
            return;
        }
    }
}

async fn list_namespaces(path: &Path) -> std::result::Result<Vec<String>, String> {
    let kubeconfig = KubeClientConfig::read_from(path).map_err(|e| e.to_string())?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| e.to_string())?;
    let client = kube::Client::try_from(config).map_err(|e| e.to_string())?;

    let api: Api<Namespace> = Api::all(client);
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(|e| format!("listing namespaces: {}", e))?;
    debug!(count = list.items.len(), "listed namespaces");

    Ok(list
        .items
        .into_iter()
        .filter_map(|ns| ns.metadata.name)
        .collect())
}

/// Set the namespace. A switch temp file is updated in place, any other
/// kubeconfig is copied into a new temp file handed to the shell.
fn apply(
    settings: &Settings,
    mut kubeconfig: Kubeconfig,
    path: &Path,
    namespace: &str,
) -> Result<()> {
    kubeconfig.set_namespace_for_current_context(namespace)?;

    let name = kubeconfig
        .switch_metadata(SWITCH_CONTEXT_KEY)
        .unwrap_or(kubeconfig.current_context())
        .to_string();

    if is_temp_kubeconfig(path) {
        kubeconfig.write_to_file(path)?;
        eprintln!("Switched to namespace {}", namespace);
    } else {
        kubeconfig.set_switch_metadata(SWITCH_CONTEXT_KEY, &name);
        let temp = kubeconfig.write_to_temp_file(&settings.paths.temp_dir)?;
        println!("{}", handshake_line(&temp));
    }

    let entry = HistoryEntry::new(name, Some(namespace.to_string()));
    if let Err(e) = History::new(&settings.paths.history_file).append(&entry) {
        warn!(error = %e, "failed to record history");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeswitch_core::{StatePaths, SwitchConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
current-context: ctx-a
clusters:
- name: c
  cluster:
    server: https://k8s.example.com
users:
- name: u
  user:
    token: secret
contexts:
- name: ctx-a
  context:
    cluster: c
    user: u
"#;

    fn settings(tmp: &TempDir) -> Settings {
        Settings {
            config: SwitchConfig::default(),
            paths: StatePaths::new(tmp.path(), None),
            no_index: true,
            search_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_apply_updates_temp_file_in_place() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(&tmp);
        let kubeconfig = Kubeconfig::parse(KUBECONFIG.as_bytes()).unwrap();
        let path = kubeconfig.write_to_temp_file(&settings.paths.temp_dir).unwrap();

        apply(&settings, Kubeconfig::from_path(&path).unwrap(), &path, "team-a").unwrap();

        let updated = Kubeconfig::from_path(&path).unwrap();
        assert_eq!(updated.current_namespace(), Some("team-a"));
        let last = settings.history().last().unwrap().unwrap();
        assert_eq!(last.context, "ctx-a");
        assert_eq!(last.namespace.as_deref(), Some("team-a"));
    }

    #[test]
    fn test_apply_never_touches_other_kubeconfigs() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(&tmp);
        let origin = tmp.path().join("config");
        std::fs::write(&origin, KUBECONFIG).unwrap();

        apply(&settings, Kubeconfig::from_path(&origin).unwrap(), &origin, "team-b").unwrap();

        assert_eq!(std::fs::read_to_string(&origin).unwrap(), KUBECONFIG);
        let written: Vec<_> = std::fs::read_dir(&settings.paths.temp_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(written.len(), 1);
        let copy = Kubeconfig::from_path(&written[0]).unwrap();
        assert_eq!(copy.current_namespace(), Some("team-b"));
    }
}
