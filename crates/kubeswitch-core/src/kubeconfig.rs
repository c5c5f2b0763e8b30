//! Kubeconfig document model
//!
//! The document is kept as an ordered YAML mapping so that fields this crate
//! never touches (extensions, preferences, vendor keys) survive a
//! parse/serialize cycle in their original order. Mutators only rewrite the
//! nodes they are responsible for.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::distr::{Alphanumeric, SampleString};
use serde_yaml::{Mapping, Value};

use crate::error::{CoreError, Result};
use crate::fsutil;

/// Top-level key recording the prefixed context name a temp kubeconfig was created for
pub const SWITCH_CONTEXT_KEY: &str = "kubeswitch-context";

/// Prefix of temporary kubeconfig file names
pub const TEMP_FILE_PREFIX: &str = "config.";

/// Suffix of temporary kubeconfig file names
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

const REDACTED: &str = "REDACTED";

/// User fields that carry credentials
const SENSITIVE_USER_FIELDS: &[&str] = &[
    "token",
    "password",
    "client-key-data",
    "client-certificate-data",
    "client-key",
    "client-certificate",
];

/// Auth-provider config fields that carry credentials
const SENSITIVE_AUTH_PROVIDER_FIELDS: &[&str] =
    &["access-token", "id-token", "refresh-token", "client-secret"];

/// A parsed kubeconfig document
#[derive(Debug, Clone, PartialEq)]
pub struct Kubeconfig {
    doc: Mapping,
}

/// Exec credential plugin description used when a kubeconfig has to be synthesized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPlugin {
    pub api_version: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Input for [`Kubeconfig::synthesize`]: one cluster/user/context triple
#[derive(Debug, Clone)]
pub struct SyntheticCluster {
    pub name: String,
    pub server: String,
    pub certificate_authority_data: Option<String>,
    pub exec: ExecPlugin,
}

impl Kubeconfig {
    /// Parse a kubeconfig from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(bytes)?;
        let Value::Mapping(doc) = value else {
            return Err(CoreError::invalid_kubeconfig(
                "top-level document is not a mapping",
            ));
        };

        for section in ["contexts", "clusters", "users"] {
            match doc.get(section) {
                None | Some(Value::Null) | Some(Value::Sequence(_)) => {}
                Some(_) => {
                    return Err(CoreError::invalid_kubeconfig(format!(
                        "'{}' must be a sequence",
                        section
                    )));
                }
            }
        }

        Ok(Self { doc })
    }

    /// Read and parse a kubeconfig file
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| CoreError::io_at(path, e))?;
        Self::parse(&bytes)
    }

    /// Build a kubeconfig holding a single context whose user authenticates
    /// through an exec credential plugin
    pub fn synthesize(cluster: SyntheticCluster) -> Self {
        let mut cluster_body = Mapping::new();
        cluster_body.insert("server".into(), cluster.server.into());
        if let Some(ca) = cluster.certificate_authority_data {
            cluster_body.insert("certificate-authority-data".into(), ca.into());
        }

        let mut exec = Mapping::new();
        exec.insert("apiVersion".into(), cluster.exec.api_version.into());
        exec.insert("command".into(), cluster.exec.command.into());
        exec.insert(
            "args".into(),
            Value::Sequence(cluster.exec.args.into_iter().map(Value::from).collect()),
        );
        if !cluster.exec.env.is_empty() {
            let env = cluster
                .exec
                .env
                .into_iter()
                .map(|(name, value)| {
                    let mut var = Mapping::new();
                    var.insert("name".into(), name.into());
                    var.insert("value".into(), value.into());
                    Value::Mapping(var)
                })
                .collect();
            exec.insert("env".into(), Value::Sequence(env));
        }
        exec.insert("interactiveMode".into(), "IfAvailable".into());

        let mut user_body = Mapping::new();
        user_body.insert("exec".into(), Value::Mapping(exec));

        let mut context_body = Mapping::new();
        context_body.insert("cluster".into(), cluster.name.clone().into());
        context_body.insert("user".into(), cluster.name.clone().into());

        let mut doc = Mapping::new();
        doc.insert("apiVersion".into(), "v1".into());
        doc.insert("kind".into(), "Config".into());
        doc.insert(
            "clusters".into(),
            Value::Sequence(vec![named(&cluster.name, "cluster", cluster_body)]),
        );
        doc.insert(
            "users".into(),
            Value::Sequence(vec![named(&cluster.name, "user", user_body)]),
        );
        doc.insert(
            "contexts".into(),
            Value::Sequence(vec![named(&cluster.name, "context", context_body)]),
        );
        doc.insert("current-context".into(), cluster.name.into());

        Self { doc }
    }

    /// Serialize the document
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(&self.doc)?.into_bytes())
    }

    /// Name of the current context, empty when unset
    pub fn current_context(&self) -> &str {
        self.doc
            .get("current-context")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Set the current context. Existence is not checked.
    pub fn set_current_context(&mut self, name: &str) {
        self.doc.insert("current-context".into(), name.into());
    }

    /// Rename a context, following the current-context pointer if it referenced it
    pub fn rename_context(&mut self, old: &str, new: &str) -> Result<()> {
        let entry = self
            .find_entry_mut("contexts", old)
            .ok_or_else(|| CoreError::ContextNotFound {
                name: old.to_string(),
            })?;
        entry.insert("name".into(), new.into());

        if self.current_context() == old {
            self.set_current_context(new);
        }
        Ok(())
    }

    /// Set the default namespace of the current context
    pub fn set_namespace_for_current_context(&mut self, namespace: &str) -> Result<()> {
        let current = self.current_context().to_string();
        if current.is_empty() {
            return Err(CoreError::NoCurrentContext);
        }

        let entry = self
            .find_entry_mut("contexts", &current)
            .ok_or(CoreError::ContextNotFound { name: current })?;

        match entry.get_mut("context") {
            Some(Value::Mapping(body)) => {
                body.insert("namespace".into(), namespace.into());
            }
            _ => {
                let mut body = Mapping::new();
                body.insert("namespace".into(), namespace.into());
                entry.insert("context".into(), Value::Mapping(body));
            }
        }
        Ok(())
    }

    /// Default namespace of a context, if one is set
    pub fn namespace_for_context(&self, name: &str) -> Option<&str> {
        self.entries("contexts")
            .find(|entry| entry_name(entry) == Some(name))
            .and_then(|entry| entry.get("context"))
            .and_then(|body| body.get("namespace"))
            .and_then(Value::as_str)
    }

    /// Default namespace of the current context, if one is set
    pub fn current_namespace(&self) -> Option<&str> {
        self.namespace_for_context(self.current_context())
    }

    /// Remove a context entry. Clusters and users are left untouched.
    pub fn remove_context(&mut self, name: &str) {
        if let Some(Value::Sequence(contexts)) = self.doc.get_mut("contexts") {
            contexts.retain(|entry| entry.get("name").and_then(Value::as_str) != Some(name));
        }
    }

    /// Names of all contexts in document order
    pub fn context_names(&self) -> Vec<String> {
        self.entries("contexts")
            .filter_map(entry_name)
            .map(str::to_string)
            .collect()
    }

    /// Check if a context exists
    pub fn has_context(&self, name: &str) -> bool {
        self.entries("contexts")
            .any(|entry| entry_name(entry) == Some(name))
    }

    /// Set a top-level scalar used for switch bookkeeping
    pub fn set_switch_metadata(&mut self, key: &str, value: &str) {
        self.doc.insert(key.into(), value.into());
    }

    /// Read a top-level scalar written by [`Kubeconfig::set_switch_metadata`]
    pub fn switch_metadata(&self, key: &str) -> Option<&str> {
        self.doc.get(key).and_then(Value::as_str)
    }

    /// Serialize a copy with credentials replaced, for display only
    pub fn to_sanitized_bytes(&self) -> Result<Vec<u8>> {
        let mut copy = self.doc.clone();

        if let Some(Value::Sequence(users)) = copy.get_mut("users") {
            for user in users.iter_mut() {
                let Some(body) = user.get_mut("user").and_then(Value::as_mapping_mut) else {
                    continue;
                };

                for field in SENSITIVE_USER_FIELDS {
                    if let Some(value) = body.get_mut(*field) {
                        *value = REDACTED.into();
                    }
                }

                if let Some(config) = body
                    .get_mut("auth-provider")
                    .and_then(|p| p.get_mut("config"))
                    .and_then(Value::as_mapping_mut)
                {
                    for field in SENSITIVE_AUTH_PROVIDER_FIELDS {
                        if let Some(value) = config.get_mut(*field) {
                            *value = REDACTED.into();
                        }
                    }
                }
            }
        }

        Ok(serde_yaml::to_string(&copy)?.into_bytes())
    }

    /// Write the document to a new uniquely named file in `dir`
    ///
    /// The directory is created owner-only if missing, the file is created
    /// with owner read/write permissions. Returns the absolute file path.
    pub fn write_to_temp_file(&self, dir: &Path) -> Result<PathBuf> {
        fsutil::create_private_dir(dir)?;
        let dir = std::path::absolute(dir).map_err(|e| CoreError::io_at(dir, e))?;
        let bytes = self.to_bytes()?;

        loop {
            let name = format!(
                "{}{}{}",
                TEMP_FILE_PREFIX,
                Alphanumeric.sample_string(&mut rand::rng(), 16),
                TEMP_FILE_SUFFIX
            );
            let path = dir.join(name);

            let mut options = OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }

            match options.open(&path) {
                Ok(mut file) => {
                    file.write_all(&bytes)
                        .map_err(|e| CoreError::io_at(&path, e))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CoreError::io_at(&path, e)),
            }
        }
    }

    /// Write the document back to an existing location, replacing it atomically
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        fsutil::write_atomic(path, &self.to_bytes()?)
    }

    fn entries(&self, section: &str) -> impl Iterator<Item = &Value> {
        self.doc
            .get(section)
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
    }

    fn find_entry_mut(&mut self, section: &str, name: &str) -> Option<&mut Mapping> {
        self.doc
            .get_mut(section)
            .and_then(Value::as_sequence_mut)?
            .iter_mut()
            .filter_map(Value::as_mapping_mut)
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
    }
}

fn entry_name(entry: &Value) -> Option<&str> {
    entry.get("name").and_then(Value::as_str)
}

fn named(name: &str, body_key: &str, body: Mapping) -> Value {
    let mut entry = Mapping::new();
    entry.insert("name".into(), name.into());
    entry.insert(body_key.into(), Value::Mapping(body));
    Value::Mapping(entry)
}

/// Check whether a path looks like a temporary kubeconfig written by this tool
pub fn is_temp_kubeconfig(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_FILE_PREFIX) && n.ends_with(TEMP_FILE_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"apiVersion: v1
kind: Config
preferences:
  colors: true
clusters:
- name: dev
  cluster:
    server: https://dev.example.com
    certificate-authority-data: Q0EK
users:
- name: dev-admin
  user:
    token: s3cr3t
    client-key-data: a2V5
- name: oidc
  user:
    auth-provider:
      name: oidc
      config:
        id-token: abc
        client-id: kubectl
contexts:
- name: dev
  context:
    cluster: dev
    user: dev-admin
    namespace: team-a
- name: dev-oidc
  context:
    cluster: dev
    user: oidc
current-context: dev
x-vendor-extension:
  keep: me
"#;

    fn sample() -> Kubeconfig {
        Kubeconfig::parse(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_reads_contexts() {
        let kc = sample();
        assert_eq!(kc.context_names(), vec!["dev", "dev-oidc"]);
        assert_eq!(kc.current_context(), "dev");
        assert_eq!(kc.current_namespace(), Some("team-a"));
        assert_eq!(kc.namespace_for_context("dev-oidc"), None);
    }

    #[test]
    fn test_parse_rejects_non_mapping() {
        assert!(Kubeconfig::parse(b"- a\n- b\n").is_err());
        assert!(Kubeconfig::parse(b"just a string").is_err());
    }

    #[test]
    fn test_parse_rejects_non_sequence_sections() {
        let err = Kubeconfig::parse(b"contexts: {name: dev}\n").unwrap_err();
        assert!(err.to_string().contains("contexts"));
        assert!(Kubeconfig::parse(b"users: 3\n").is_err());
    }

    #[test]
    fn test_parse_accepts_null_sections() {
        let kc = Kubeconfig::parse(b"apiVersion: v1\ncontexts: null\n").unwrap();
        assert!(kc.context_names().is_empty());
        assert_eq!(kc.current_context(), "");
    }

    #[test]
    fn test_roundtrip_preserves_unknown_keys_and_order() {
        let kc = sample();
        let bytes = kc.to_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();

        let reparsed = Kubeconfig::parse(&bytes).unwrap();
        assert_eq!(kc, reparsed);

        let preferences = text.find("preferences").unwrap();
        let clusters = text.find("clusters").unwrap();
        let vendor = text.find("x-vendor-extension").unwrap();
        assert!(preferences < clusters && clusters < vendor);
        assert!(text.contains("keep: me"));
    }

    #[test]
    fn test_set_current_context_does_not_verify() {
        let mut kc = sample();
        kc.set_current_context("missing");
        assert_eq!(kc.current_context(), "missing");
    }

    #[test]
    fn test_rename_context_updates_current() {
        let mut kc = sample();
        kc.rename_context("dev", "development").unwrap();
        assert_eq!(kc.context_names(), vec!["development", "dev-oidc"]);
        assert_eq!(kc.current_context(), "development");

        assert!(matches!(
            kc.rename_context("nope", "x"),
            Err(CoreError::ContextNotFound { .. })
        ));
    }

    #[test]
    fn test_set_namespace_for_current_context() {
        let mut kc = sample();
        kc.set_current_context("dev-oidc");
        kc.set_namespace_for_current_context("kube-system").unwrap();
        assert_eq!(kc.current_namespace(), Some("kube-system"));
        // unrelated context untouched
        assert_eq!(kc.namespace_for_context("dev"), Some("team-a"));
    }

    #[test]
    fn test_set_namespace_requires_valid_current_context() {
        let mut kc = sample();
        kc.set_current_context("");
        assert!(matches!(
            kc.set_namespace_for_current_context("x"),
            Err(CoreError::NoCurrentContext)
        ));

        kc.set_current_context("ghost");
        assert!(matches!(
            kc.set_namespace_for_current_context("x"),
            Err(CoreError::ContextNotFound { .. })
        ));
    }

    #[test]
    fn test_remove_context_keeps_clusters_and_users() {
        let mut kc = sample();
        kc.remove_context("dev");
        assert_eq!(kc.context_names(), vec!["dev-oidc"]);
        let text = String::from_utf8(kc.to_bytes().unwrap()).unwrap();
        assert!(text.contains("dev-admin"));
        assert!(text.contains("https://dev.example.com"));
    }

    #[test]
    fn test_sanitized_output_hides_credentials() {
        let kc = sample();
        let text = String::from_utf8(kc.to_sanitized_bytes().unwrap()).unwrap();

        assert!(!text.contains("s3cr3t"));
        assert!(!text.contains("a2V5"));
        assert!(!text.contains("id-token: abc"));
        assert!(text.contains("client-id: kubectl"));
        assert!(text.contains("https://dev.example.com"));

        // original is untouched
        let original = String::from_utf8(kc.to_bytes().unwrap()).unwrap();
        assert!(original.contains("s3cr3t"));
    }

    #[test]
    fn test_switch_metadata() {
        let mut kc = sample();
        kc.set_switch_metadata(SWITCH_CONTEXT_KEY, "a/dev");
        assert_eq!(kc.switch_metadata(SWITCH_CONTEXT_KEY), Some("a/dev"));

        let reparsed = Kubeconfig::parse(&kc.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed.switch_metadata(SWITCH_CONTEXT_KEY), Some("a/dev"));
    }

    #[test]
    fn test_write_to_temp_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join(".switch_tmp");

        let kc = sample();
        let first = kc.write_to_temp_file(&dir).unwrap();
        let second = kc.write_to_temp_file(&dir).unwrap();

        assert_ne!(first, second);
        assert!(first.is_absolute());
        assert!(is_temp_kubeconfig(&first));
        assert_eq!(Kubeconfig::from_path(&first).unwrap(), kc);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&first).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0, "file must be owner-only, got {:o}", mode);
            let dir_mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(dir_mode & 0o077, 0);
        }
    }

    #[test]
    fn test_temp_file_does_not_touch_origin() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("config");
        std::fs::write(&origin, SAMPLE).unwrap();

        let mut kc = Kubeconfig::from_path(&origin).unwrap();
        kc.set_current_context("dev-oidc");
        kc.write_to_temp_file(&tmp.path().join("tmp")).unwrap();

        assert_eq!(std::fs::read_to_string(&origin).unwrap(), SAMPLE);
    }

    #[test]
    fn test_synthesize_exec_user() {
        let kc = Kubeconfig::synthesize(SyntheticCluster {
            name: "prod".to_string(),
            server: "https://prod.example.com".to_string(),
            certificate_authority_data: Some("Q0EK".to_string()),
            exec: ExecPlugin {
                api_version: "client.authentication.k8s.io/v1beta1".to_string(),
                command: "aws".to_string(),
                args: vec!["eks".to_string(), "get-token".to_string()],
                env: vec![("AWS_PROFILE".to_string(), "ops".to_string())],
            },
        });

        assert_eq!(kc.context_names(), vec!["prod"]);
        assert_eq!(kc.current_context(), "prod");

        let reparsed = Kubeconfig::parse(&kc.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed, kc);
        let text = String::from_utf8(kc.to_bytes().unwrap()).unwrap();
        assert!(text.contains("command: aws"));
        assert!(text.contains("AWS_PROFILE"));
    }
}
