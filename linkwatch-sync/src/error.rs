//! Error types for linkwatch-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while mirroring one changed file.
#[derive(Debug, Error)]
pub enum CopyError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The changed name would resolve outside the link's source or destination.
    #[error("refusing to copy {name}: {reason}")]
    InvalidPath { name: PathBuf, reason: &'static str },
}

/// Convenience constructor for [`CopyError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CopyError {
    CopyError::Io {
        path: path.into(),
        source,
    }
}
