use std::path::PathBuf;

use thiserror::Error;

use crate::history::Category;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("read kubeconfig file '{}'", path.display())]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("context '{0}' not found")]
    ContextNotFound(String),

    #[error("current context not set")]
    NoCurrentContext,

    #[error("read history file '{}'", path.display())]
    HistoryUnreadable {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("no {category} history at depth {depth}")]
    InsufficientHistory { category: Category, depth: usize },

    #[error("{0}")]
    SelectionAborted(String),

    #[error("list namespaces for context '{context}'")]
    ListFailed {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("write file '{}'", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
}
