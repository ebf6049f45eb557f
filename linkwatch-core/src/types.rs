//! Domain types shared by every linkwatch crate.
//!
//! All path fields use `PathBuf`. Link snapshots are `BTreeMap`s so that
//! iteration (and therefore reconciliation) runs in ascending id order.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable key of a link in `links.json`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub String);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for LinkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LinkId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// A configured pairing of a source directory and the destination it is
/// mirrored into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub src: PathBuf,
    pub dest: PathBuf,
    #[serde(default)]
    pub enabled: bool,
}

impl Link {
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            enabled,
        }
    }

    /// Copy of this link with relative `src`/`dest` anchored at `base`.
    pub fn anchored_at(&self, base: &Path) -> Self {
        let anchor = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        Self {
            src: anchor(&self.src),
            dest: anchor(&self.dest),
            enabled: self.enabled,
        }
    }
}

/// The configuration at one reload instant.
pub type LinkSnapshot = BTreeMap<LinkId, Link>;

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// One changed path inside a subscription, relative to the subscribed scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub name: PathBuf,
    pub exists: bool,
}

/// A batch of file changes delivered to a subscription handler.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub files: Vec<ChangedFile>,
}

impl ChangeEvent {
    /// Whether any changed entry is exactly `name` (relative to the scope).
    pub fn touches(&self, name: impl AsRef<Path>) -> bool {
        let name = name.as_ref();
        self.files.iter().any(|file| file.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Receiver of change batches for one subscription.
pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;
