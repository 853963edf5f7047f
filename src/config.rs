use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::history::HistoryOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "KubeOptions::default")]
    pub kube: KubeOptions,

    #[serde(default = "HistoryConfig::default")]
    pub history: HistoryConfig,

    #[serde(default = "FzfConfig::default")]
    pub fzf: FzfConfig,

    pub ns_alias: Option<Vec<NsAlias>>,

    #[serde(skip)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KubeOptions {
    /// Colon separated kubeconfig search list, used when neither the
    /// `--kubeconfig` flag nor `$KUBECONFIG` is given.
    #[serde(default = "KubeOptions::default_config")]
    pub config: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "HistoryConfig::default_path")]
    pub path: String,

    #[serde(default = "HistoryConfig::default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FzfConfig {
    #[serde(default = "FzfConfig::default_exec")]
    pub exec: String,

    #[serde(default = "FzfConfig::default_prompt_suffix")]
    pub prompt_suffix: String,
}

/// Static namespace list for contexts whose name matches `regex` or is one
/// of `names`. Such contexts are never listed from the cluster.
#[derive(Debug, Deserialize, Clone)]
pub struct NsAlias {
    pub regex: Option<String>,

    pub names: Option<HashSet<String>>,

    pub alias: Vec<String>,

    #[serde(skip)]
    parsed_regex: Option<Regex>,
}

impl Config {
    const CONFIG_PATH_ENV: &'static str = "KUBEHOP_CONFIG_PATH";

    /// Read the kubehop config file, falling back to the defaults when there
    /// is none.
    pub fn load() -> Result<Config> {
        let path = Self::locate()?;
        let mut cfg = match path.as_deref() {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        cfg.path = path;
        cfg.validate().context("invalid kubehop config")?;
        Ok(cfg)
    }

    /// Static namespaces of the first `ns_alias` entry picking `context`.
    pub fn match_ns_alias<S: AsRef<str>>(&self, context: S) -> Option<Vec<String>> {
        self.ns_alias
            .iter()
            .flatten()
            .find_map(|alias| alias.match_alias(context.as_ref()))
    }

    /// Resolve the kubeconfig search list. The first non-empty source wins:
    /// the command line flag, then `$KUBECONFIG`, then `kube.config`.
    pub fn kubeconfig_paths(
        &self,
        flag: Option<&str>,
        env_value: Option<OsString>,
    ) -> Result<Vec<PathBuf>> {
        if let Some(flag) = flag.filter(|s| !s.is_empty()) {
            return split_search_list(flag).context("expand `--kubeconfig`");
        }
        if let Some(value) = env_value.filter(|s| !s.is_empty()) {
            let value = value.to_string_lossy();
            return split_search_list(&value).context("expand $KUBECONFIG");
        }
        split_search_list(&self.kube.config).context("expand `kube.config`")
    }

    pub fn history_options(&self) -> HistoryOptions {
        HistoryOptions {
            path: PathBuf::from(&self.history.path),
            max_entries: self.history.max_entries,
        }
    }

    /// `$KUBEHOP_CONFIG_PATH`, else `~/.config/kubehop.toml`. `None` when the
    /// file does not exist.
    fn locate() -> Result<Option<PathBuf>> {
        let path = match env::var_os(Self::CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => home_dir()?.join(".config/kubehop.toml"),
        };

        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("inspect kubehop config '{}'", path.display()))
            }
        };
        if meta.is_dir() {
            bail!(
                "kubehop config '{}' must be a file, found a directory",
                path.display()
            );
        }
        Ok(Some(path))
    }

    fn read(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read kubehop config '{}'", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parse kubehop config '{}'", path.display()))
    }

    pub(crate) fn validate(&mut self) -> Result<()> {
        self.kube.validate().context("section [kube]")?;
        self.history.validate().context("section [history]")?;
        self.fzf.validate().context("section [fzf]")?;

        for (idx, alias) in self.ns_alias.iter_mut().flatten().enumerate() {
            alias
                .validate()
                .with_context(|| format!("entry #{} of [[ns_alias]]", idx + 1))?;
        }
        Ok(())
    }

    fn default() -> Config {
        Config {
            kube: KubeOptions::default(),
            history: HistoryConfig::default(),
            fzf: FzfConfig::default(),
            ns_alias: None,
            path: None,
        }
    }
}

impl KubeOptions {
    fn validate(&mut self) -> Result<()> {
        if self.config.is_empty() {
            bail!("`kube.config` cannot be empty");
        }
        Ok(())
    }

    fn default() -> KubeOptions {
        KubeOptions {
            config: Self::default_config(),
        }
    }

    fn default_config() -> String {
        String::from("~/.kube/config")
    }
}

impl HistoryConfig {
    fn validate(&mut self) -> Result<()> {
        if self.path.is_empty() {
            bail!("`history.path` cannot be empty");
        }
        self.path = expand_env(&self.path).context("expand `history.path`")?;

        if self.max_entries == 0 {
            bail!("`history.max_entries` must be greater than 0");
        }
        Ok(())
    }

    fn default() -> HistoryConfig {
        HistoryConfig {
            path: Self::default_path(),
            max_entries: Self::default_max_entries(),
        }
    }

    fn default_path() -> String {
        String::from("~/.local/share/kubehop/history.yaml")
    }

    fn default_max_entries() -> usize {
        100
    }
}

impl FzfConfig {
    fn validate(&mut self) -> Result<()> {
        if self.exec.is_empty() {
            bail!("`fzf.exec` cannot be empty");
        }
        self.exec = expand_env(&self.exec).context("expand `fzf.exec`")?;
        Ok(())
    }

    fn default() -> FzfConfig {
        FzfConfig {
            exec: Self::default_exec(),
            prompt_suffix: Self::default_prompt_suffix(),
        }
    }

    fn default_exec() -> String {
        String::from("fzf")
    }

    fn default_prompt_suffix() -> String {
        String::from("> ")
    }
}

impl NsAlias {
    fn match_alias(&self, context: &str) -> Option<Vec<String>> {
        let by_regex = self
            .parsed_regex
            .as_ref()
            .is_some_and(|regex| regex.is_match(context));
        let by_name = self
            .names
            .as_ref()
            .is_some_and(|names| names.contains(context));
        (by_regex || by_name).then(|| self.alias.clone())
    }

    fn validate(&mut self) -> Result<()> {
        if self.alias.is_empty() {
            bail!("`alias` must list at least one namespace");
        }

        if let Some(pattern) = self.regex.as_deref() {
            let regex = Regex::new(pattern)
                .with_context(|| format!("`regex` '{pattern}' does not compile"))?;
            self.parsed_regex = Some(regex);
        }

        let has_names = self.names.as_ref().is_some_and(|names| !names.is_empty());
        if self.parsed_regex.is_none() && !has_names {
            bail!("set `regex` or `names` to pick the contexts this entry applies to");
        }
        Ok(())
    }
}

fn split_search_list(list: &str) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for item in env::split_paths(list) {
        let item = item.to_string_lossy();
        if item.trim().is_empty() {
            continue;
        }
        paths.push(PathBuf::from(expand_env(&item)?));
    }
    if paths.is_empty() {
        bail!("kubeconfig search list '{list}' has no path");
    }
    Ok(paths)
}

/// Expand `~` and `$VAR` references.
fn expand_env(value: &str) -> Result<String> {
    shellexpand::full(value)
        .map(|expanded| expanded.into_owned())
        .with_context(|| format!("cannot expand '{value}'"))
}

fn home_dir() -> Result<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .context("$HOME is not set, cannot locate the kubehop config")
}
