use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};

use crate::errors::{Error, Result};
use crate::files;

pub const DEFAULT_NAMESPACE: &str = "default";

/// File references that kubeconfig allows to be relative to the file itself.
const CLUSTER_FILE_KEYS: &[&str] = &["certificate-authority"];
const USER_FILE_KEYS: &[&str] = &["client-certificate", "client-key", "tokenFile"];

/// A kubeconfig document. Only contexts and the current context pointer are
/// interpreted, everything else is carried through untouched so that writing
/// the document back does not lose data.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct KubeConfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub clusters: Vec<NamedEntry>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub contexts: Vec<NamedContext>,

    #[serde(
        rename = "current-context",
        default,
        deserialize_with = "null_as_default"
    )]
    pub current_context: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<NamedEntry>,

    #[serde(flatten)]
    pub extra: Mapping,
}

/// A named cluster or user entry, opaque apart from its name.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NamedEntry {
    pub name: String,

    #[serde(flatten)]
    pub rest: Mapping,

    /// Directory of the kubeconfig file the entry was read from.
    #[serde(skip)]
    source_dir: Option<PathBuf>,
}

impl NamedEntry {
    /// Rebase relative file references under `section` onto the directory of
    /// the kubeconfig that declared this entry.
    fn rebase_files(&mut self, section: &str, keys: &[&str]) {
        let Some(dir) = self.source_dir.as_deref() else {
            return;
        };
        let Some(Value::Mapping(fields)) = self.rest.get_mut(section) else {
            return;
        };
        for key in keys {
            if let Some(Value::String(file)) = fields.get_mut(*key) {
                if !file.is_empty() && Path::new(file.as_str()).is_relative() {
                    *file = dir.join(file.as_str()).to_string_lossy().into_owned();
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub context: ContextSpec,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ContextSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Cluster and user references, extensions.
    #[serde(flatten)]
    pub rest: Mapping,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

trait Named {
    fn name(&self) -> &str;
}

impl Named for NamedEntry {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedContext {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Entries of `src` replace same-named entries of `dst` in place, new names
/// are appended.
fn merge_named<T: Named>(dst: &mut Vec<T>, src: Vec<T>) {
    for item in src {
        match dst.iter().position(|exist| exist.name() == item.name()) {
            Some(idx) => {
                debug!("Replace entry '{}'", item.name());
                dst[idx] = item;
            }
            None => dst.push(item),
        }
    }
}

impl KubeConfig {
    fn read(path: &Path) -> Result<Option<KubeConfig>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::ConfigUnreadable {
                    path: PathBuf::from(path),
                    source: err.into(),
                })
            }
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(KubeConfig::default()));
        }
        serde_yaml::from_slice(&data)
            .map(Some)
            .map_err(|err| Error::ConfigUnreadable {
                path: PathBuf::from(path),
                source: err.into(),
            })
    }

    fn mark_source(&mut self, path: &Path) {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for entry in self.clusters.iter_mut().chain(self.users.iter_mut()) {
            entry.source_dir = Some(dir.clone());
        }
    }

    /// Fold `other` into `self`, `other` taking precedence.
    fn merge(&mut self, other: KubeConfig) {
        if other.api_version.is_some() {
            self.api_version = other.api_version;
        }
        if other.kind.is_some() {
            self.kind = other.kind;
        }
        merge_named(&mut self.clusters, other.clusters);
        merge_named(&mut self.contexts, other.contexts);
        merge_named(&mut self.users, other.users);
        if !other.current_context.is_empty() {
            self.current_context = other.current_context;
        }
        for (key, value) in other.extra {
            self.extra.insert(key, value);
        }
    }

    fn find_context(&self, name: &str) -> Option<&NamedContext> {
        self.contexts.iter().find(|ctx| ctx.name == name)
    }

    fn find_context_mut(&mut self, name: &str) -> Option<&mut NamedContext> {
        self.contexts.iter_mut().find(|ctx| ctx.name == name)
    }
}

/// The merged view over every kubeconfig in the search path.
///
/// Sources merge in declaration order with later ones winning, so the last
/// declared path is the primary: it is the only file written, and what it
/// holds wins again on the next load. Writing rewrites the primary's own
/// document with the current context and every context changed through this
/// store, never the entries merged in from other files.
pub struct KubeConfigStore {
    path: PathBuf,
    primary: KubeConfig,
    config: KubeConfig,

    /// Contexts whose definition changed since load.
    changed: BTreeSet<String>,
}

impl KubeConfigStore {
    pub fn load(paths: &[PathBuf]) -> Result<KubeConfigStore> {
        let Some(primary_path) = paths.last() else {
            return Err(Error::ConfigUnreadable {
                path: PathBuf::new(),
                source: "kubeconfig search path is empty".into(),
            });
        };

        let mut config = KubeConfig::default();
        let mut primary = KubeConfig::default();
        for path in paths {
            match KubeConfig::read(path)? {
                Some(mut next) => {
                    debug!("Load kubeconfig '{}'", path.display());
                    next.mark_source(path);
                    if path == primary_path {
                        primary = next.clone();
                    }
                    config.merge(next);
                }
                None => debug!("Skip missing kubeconfig '{}'", path.display()),
            }
        }

        Ok(KubeConfigStore {
            path: primary_path.clone(),
            primary,
            config,
            changed: BTreeSet::new(),
        })
    }

    #[cfg(test)]
    pub fn new(path: PathBuf, config: KubeConfig) -> KubeConfigStore {
        KubeConfigStore {
            path,
            primary: config.clone(),
            config,
            changed: BTreeSet::new(),
        }
    }

    pub fn list_context_names(&self) -> Vec<String> {
        self.config
            .contexts
            .iter()
            .map(|ctx| ctx.name.clone())
            .collect()
    }

    pub fn current_context(&self) -> Result<&str> {
        if self.config.current_context.is_empty() {
            return Err(Error::NoCurrentContext);
        }
        Ok(&self.config.current_context)
    }

    pub fn current_namespace(&self) -> Result<&str> {
        let name = self.current_context()?;
        let ctx = self
            .config
            .find_context(name)
            .ok_or_else(|| Error::ContextNotFound(name.to_string()))?;
        Ok(ctx
            .context
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE))
    }

    /// Make `name` the current context. A context without a namespace gets
    /// the default one now, so a later namespace switch has a base.
    pub fn set_context(&mut self, name: &str) -> Result<()> {
        let ctx = self
            .config
            .find_context_mut(name)
            .ok_or_else(|| Error::ContextNotFound(name.to_string()))?;
        let namespace = &mut ctx.context.namespace;
        if namespace.as_deref().map_or(true, str::is_empty) {
            *namespace = Some(String::from(DEFAULT_NAMESPACE));
            self.changed.insert(String::from(name));
        }
        self.config.current_context = String::from(name);
        Ok(())
    }

    /// Set the namespace of the current context. The namespace is not checked
    /// against the cluster.
    pub fn set_namespace(&mut self, namespace: &str) -> Result<()> {
        let name = self.current_context()?.to_string();
        let ctx = self
            .config
            .find_context_mut(&name)
            .ok_or_else(|| Error::ContextNotFound(name.clone()))?;
        ctx.context.namespace = Some(String::from(namespace));
        self.changed.insert(name);
        Ok(())
    }

    /// Persist the current context and changed contexts to the primary file.
    pub fn write(&self) -> Result<()> {
        let mut doc = self.primary.clone();
        if doc.api_version.is_none() {
            doc.api_version.clone_from(&self.config.api_version);
        }
        if doc.kind.is_none() {
            doc.kind.clone_from(&self.config.kind);
        }
        doc.current_context = self.config.current_context.clone();
        let changed: Vec<NamedContext> = self
            .config
            .contexts
            .iter()
            .filter(|ctx| self.changed.contains(&ctx.name))
            .cloned()
            .collect();
        merge_named(&mut doc.contexts, changed);

        let data = serde_yaml::to_string(&doc).map_err(|err| Error::WriteFailed {
            path: self.path.clone(),
            source: err.into(),
        })?;
        files::write_atomic(&self.path, data.as_bytes()).map_err(|err| Error::WriteFailed {
            path: self.path.clone(),
            source: err.into(),
        })
    }

    /// The merged model with relative certificate, key and token file
    /// references joined onto the directory of the file that declared them,
    /// ready for a kube client running from any directory.
    pub fn resolved_config(&self) -> KubeConfig {
        let mut config = self.config.clone();
        for cluster in config.clusters.iter_mut() {
            cluster.rebase_files("cluster", CLUSTER_FILE_KEYS);
        }
        for user in config.users.iter_mut() {
            user.rebase_files("user", USER_FILE_KEYS);
        }
        config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
