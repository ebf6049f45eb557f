//! `links.json` persistence and the in-memory [`LinkRegistry`].
//!
//! # Storage layout
//!
//! ```text
//! ~/.linkwatch/
//!   links.json      (mode 0600, one JSON object keyed by link id)
//! ```
//!
//! ```json
//! { "docs": { "src": "/work/docs", "dest": "/mnt/docs", "enabled": true } }
//! ```
//!
//! # API pattern
//!
//! Every function takes the explicit path of the links file (`_at`); only
//! [`default_config_path`] consults `dirs::home_dir()`. Tests must always
//! pass a `TempDir` path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{io_err, ConfigError};
use crate::types::{Link, LinkId, LinkSnapshot};

/// File name of the links store; the self-watch trigger matches on it.
pub const LINKS_FILE: &str = "links.json";

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.linkwatch/`
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".linkwatch")
}

/// `<home>/.linkwatch/links.json`
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join(LINKS_FILE)
}

/// `config_path_at` for the current user's home directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| config_path_at(&home))
        .ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate the links file exactly as stored (paths unresolved).
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path +
/// line context) if malformed, `ConfigError::InvalidLink` for empty ids or paths.
pub fn load_links_at(path: &Path) -> Result<LinkSnapshot, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let links: LinkSnapshot = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    for (id, link) in &links {
        validate(id, link)?;
    }
    Ok(links)
}

/// Load the links file and anchor relative `src`/`dest` at the file's directory.
///
/// This is the snapshot the watcher engine runs against.
pub fn load_snapshot_at(path: &Path) -> Result<LinkSnapshot, ConfigError> {
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(load_links_at(path)?
        .into_iter()
        .map(|(id, link)| {
            let anchored = link.anchored_at(base);
            (id, anchored)
        })
        .collect())
}

fn validate(id: &LinkId, link: &Link) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidLink {
        id: id.0.clone(),
        reason: reason.to_string(),
    };
    if id.0.trim().is_empty() {
        return Err(invalid("link id must not be empty"));
    }
    if link.src.as_os_str().is_empty() {
        return Err(invalid("src must not be empty"));
    }
    if link.dest.as_os_str().is_empty() {
        return Err(invalid("dest must not be empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `links` to `path`.
///
/// Write flow: serialize → `links.json.tmp` sibling → `chmod 0600` → `rename`.
/// The `.tmp` file lives in the same directory as the target, so the rename
/// never crosses filesystems.
pub fn save_links_at(path: &Path, links: &LinkSnapshot) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            set_dir_permissions(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| LINKS_FILE.to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let mut json = serde_json::to_string_pretty(links)?;
    json.push('\n');
    std::fs::write(&tmp_path, json).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Edit operations
// ---------------------------------------------------------------------------

/// Add a new link. A missing links file is treated as empty and created.
pub fn add_link_at(path: &Path, id: LinkId, link: Link) -> Result<Link, ConfigError> {
    validate(&id, &link)?;
    let mut links = match load_links_at(path) {
        Ok(links) => links,
        Err(ConfigError::NotFound { .. }) => LinkSnapshot::new(),
        Err(err) => return Err(err),
    };
    if links.contains_key(&id) {
        return Err(ConfigError::DuplicateLink(id));
    }
    links.insert(id, link.clone());
    save_links_at(path, &links)?;
    Ok(link)
}

/// Remove a link, returning the record that was stored.
pub fn remove_link_at(path: &Path, id: &LinkId) -> Result<Link, ConfigError> {
    let mut links = load_links_at(path)?;
    let removed = links
        .remove(id)
        .ok_or_else(|| ConfigError::UnknownLink(id.clone()))?;
    save_links_at(path, &links)?;
    Ok(removed)
}

/// Flip a link's enabled flag. Rewrites the file only if the flag changes.
pub fn set_enabled_at(path: &Path, id: &LinkId, enabled: bool) -> Result<Link, ConfigError> {
    let mut links = load_links_at(path)?;
    let link = links
        .get_mut(id)
        .ok_or_else(|| ConfigError::UnknownLink(id.clone()))?;
    if link.enabled == enabled {
        return Ok(link.clone());
    }
    link.enabled = enabled;
    let updated = link.clone();
    save_links_at(path, &links)?;
    Ok(updated)
}

// ---------------------------------------------------------------------------
// 5. Registry
// ---------------------------------------------------------------------------

/// Current link snapshot plus the file it is reloaded from.
///
/// Snapshots are shared as `Arc`s and never mutated; a reload swaps in a new
/// one and hands back the old one untouched.
#[derive(Debug, Clone)]
pub struct LinkRegistry {
    path: PathBuf,
    current: Arc<LinkSnapshot>,
}

impl LinkRegistry {
    /// Registry for `path`, starting from an empty snapshot.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: Arc::new(LinkSnapshot::new()),
        }
    }

    pub fn current(&self) -> Arc<LinkSnapshot> {
        self.current.clone()
    }

    /// Re-read the links file and return `(previous, current)`.
    ///
    /// On error the current snapshot is left in place.
    pub fn reload(&mut self) -> Result<(Arc<LinkSnapshot>, Arc<LinkSnapshot>), ConfigError> {
        let next = load_snapshot_at(&self.path)?;
        Ok(self.install(next))
    }

    /// Swap in an already loaded snapshot and return `(previous, current)`.
    fn install(&mut self, next: LinkSnapshot) -> (Arc<LinkSnapshot>, Arc<LinkSnapshot>) {
        let next = Arc::new(next);
        let previous = std::mem::replace(&mut self.current, next.clone());
        (previous, next)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
