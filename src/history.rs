use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::{Error, Result};
use crate::files;

/// What a history sequence records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Context,
    Namespace,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Context => "context",
            Category::Namespace => "namespace",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the history lives and how much of it is kept per category.
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    pub path: PathBuf,
    pub max_entries: usize,
}

/// Bounded, most-recent-first selection history, one sequence per category.
///
/// The file is a YAML mapping from category name to a list of values.
/// Categories this binary does not know about are kept as they are.
pub struct History {
    path: PathBuf,
    max_entries: usize,

    data: BTreeMap<String, Vec<String>>,
}

impl History {
    pub fn load(opts: &HistoryOptions) -> Result<History> {
        let data = match fs::read(&opts.path) {
            Ok(data) => Self::parse(&opts.path, &data)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("History file '{}' not found", opts.path.display());
                BTreeMap::new()
            }
            Err(err) => {
                return Err(Error::HistoryUnreadable {
                    path: opts.path.clone(),
                    source: err.into(),
                })
            }
        };

        Ok(History {
            path: opts.path.clone(),
            max_entries: opts.max_entries,
            data,
        })
    }

    fn parse(path: &Path, data: &[u8]) -> Result<BTreeMap<String, Vec<String>>> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        let data: Option<BTreeMap<String, Vec<String>>> =
            serde_yaml::from_slice(data).map_err(|err| Error::HistoryUnreadable {
                path: PathBuf::from(path),
                source: err.into(),
            })?;
        Ok(data.unwrap_or_default())
    }

    /// Return the `n`-th most recent value of the category, `1` being the
    /// front of the sequence.
    pub fn get(&self, category: Category, n: usize) -> Result<&str> {
        n.checked_sub(1)
            .and_then(|idx| self.entries(category).get(idx))
            .map(String::as_str)
            .ok_or(Error::InsufficientHistory { category, depth: n })
    }

    /// Put `value` at the front of the category. An existing occurrence is
    /// moved rather than duplicated, and the oldest entries beyond the limit
    /// are dropped.
    pub fn add<S: AsRef<str>>(&mut self, category: Category, value: S) {
        let value = value.as_ref();
        let entries = self.data.entry(category.as_str().to_string()).or_default();
        entries.retain(|item| item != value);
        entries.insert(0, value.to_string());
        entries.truncate(self.max_entries);
    }

    pub fn entries(&self, category: Category) -> &[String] {
        self.data
            .get(category.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn write(&self) -> Result<()> {
        let data = serde_yaml::to_string(&self.data).map_err(|err| Error::WriteFailed {
            path: self.path.clone(),
            source: err.into(),
        })?;
        files::write_atomic(&self.path, data.as_bytes()).map_err(|err| Error::WriteFailed {
            path: self.path.clone(),
            source: err.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
