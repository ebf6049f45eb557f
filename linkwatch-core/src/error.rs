//! Error types for linkwatch-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::LinkId;

/// All errors that can arise from reading or editing the link configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the file it happened on.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write/save path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load, with the file path and line context from serde_json.
    #[error("failed to parse links at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The links file did not exist at the expected path.
    #[error("links file not found at {path}")]
    NotFound { path: PathBuf },

    /// A link record is structurally valid JSON but unusable.
    #[error("invalid link '{id}': {reason}")]
    InvalidLink { id: String, reason: String },

    #[error("link '{0}' already exists")]
    DuplicateLink(LinkId),

    #[error("no link named '{0}'")]
    UnknownLink(LinkId),

    /// `dirs::home_dir()` returned `None`, so `~/.linkwatch/` cannot be located.
    #[error("cannot determine home directory; set $HOME or pass --config")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
