//! Boundary to the change-notification service.
//!
//! One [`NotificationClient`] is one connection. The handshake drives it
//! through `check_capabilities → register_watch → get_config → subscribe`;
//! `end` closes it. A [`ClientFactory`] opens a fresh connection per watcher.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use linkwatch_core::ChangeHandler;

use crate::error::WatchError;

/// Features a watch needs from the notification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Changes anywhere below the subscribed directory are reported.
    RecursiveWatch,
    /// A subscription can be scoped to a path below the watch root.
    RelativeRoot,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::RecursiveWatch => f.write_str("recursive-watch"),
            Capability::RelativeRoot => f.write_str("relative-root"),
        }
    }
}

/// Capabilities every link watcher requires.
pub const REQUIRED_CAPABILITIES: &[Capability] =
    &[Capability::RecursiveWatch, Capability::RelativeRoot];

/// Result of resolving a source path against the service's watch roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRegistration {
    pub watch_root: PathBuf,
    /// Source path relative to `watch_root`; empty when they coincide.
    pub relative_path: PathBuf,
    pub warning: Option<String>,
}

impl WatchRegistration {
    /// The directory a subscription on this registration actually covers.
    pub fn scope(&self) -> PathBuf {
        scope_of(&self.watch_root, &self.relative_path)
    }
}

pub(crate) fn scope_of(watch_root: &Path, relative_path: &Path) -> PathBuf {
    if relative_path.as_os_str().is_empty() {
        watch_root.to_path_buf()
    } else {
        watch_root.join(relative_path)
    }
}

#[async_trait]
pub trait NotificationClient: Send + Sync {
    /// Fails with [`WatchError::Capability`] when any of `required` is
    /// unsupported; a non-fatal warning may be returned instead.
    async fn check_capabilities(
        &self,
        required: &[Capability],
    ) -> Result<Option<String>, WatchError>;

    async fn register_watch(&self, path: &Path) -> Result<WatchRegistration, WatchError>;

    /// Per-watch configuration for diagnostics only.
    async fn get_config(&self, watch_root: &Path) -> Result<Value, WatchError>;

    /// Start delivering change batches for `watch_root/relative_path` to `handler`.
    async fn subscribe(
        &self,
        watch_root: &Path,
        relative_path: &Path,
        handler: ChangeHandler,
    ) -> Result<(), WatchError>;

    /// Close the connection. Idempotent.
    fn end(&self);
}

pub trait ClientFactory: Send + Sync {
    fn connect(&self) -> Result<Box<dyn NotificationClient>, WatchError>;
}
