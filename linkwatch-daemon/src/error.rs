use std::path::PathBuf;

use thiserror::Error;

use crate::client::Capability;

/// Error surface for the notification client, the handshake, the supervisor
/// and the daemon runtime.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("notification service lacks required capabilities: {missing:?}")]
    Capability { missing: Vec<Capability> },

    #[error("cannot watch {path}: {reason}")]
    Registration { path: PathBuf, reason: String },

    #[error("failed to read watch config for {path}: {reason}")]
    WatchConfig { path: PathBuf, reason: String },

    #[error("cannot subscribe to {path}: {reason}")]
    Subscription { path: PathBuf, reason: String },

    #[error("connection to notification service is closed")]
    Closed,

    #[error("links configuration error: {0}")]
    Config(#[from] linkwatch_core::ConfigError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{task} task join failure: {reason}")]
    Join { task: &'static str, reason: String },

    /// The configuration directory watch could not be established; the
    /// daemon would never see later edits to the links file.
    #[error("cannot watch links configuration at {path}: {source}")]
    SelfWatch {
        path: PathBuf,
        #[source]
        source: Box<WatchError>,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WatchError {
    WatchError::Io {
        path: path.into(),
        source,
    }
}
