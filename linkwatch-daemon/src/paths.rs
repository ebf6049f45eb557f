use std::time::Duration;

/// Window over which raw filesystem events are coalesced into one batch.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Per-watch configuration file read by `get_config`; also a root marker.
pub const WATCH_CONFIG_FILE: &str = ".linkwatchconfig";

/// Files whose presence marks a directory as a project root, nearest wins.
pub const ROOT_MARKERS: &[&str] = &[WATCH_CONFIG_FILE, ".git", ".hg", ".svn"];
