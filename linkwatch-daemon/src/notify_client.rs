//! [`NotificationClient`] backed by the `notify` crate.
//!
//! Watch roots are logical: `register_watch` resolves the project root of a
//! source directory and ref-counts it in a [`WatchRoots`] table shared by all
//! clients of one factory. The OS-level watch is installed on the subscribed
//! scope only (`watch_root/relative_path`).

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use linkwatch_core::{ChangeEvent, ChangeHandler, ChangedFile};

use crate::client::{scope_of, Capability, ClientFactory, NotificationClient, WatchRegistration};
use crate::error::WatchError;
use crate::paths::{DEBOUNCE_WINDOW, ROOT_MARKERS, WATCH_CONFIG_FILE};

const SUPPORTED: &[Capability] = &[Capability::RecursiveWatch, Capability::RelativeRoot];

// ---------------------------------------------------------------------------
// Factory + shared roots
// ---------------------------------------------------------------------------

/// Opens [`NotifyClient`]s that share one watch-root table.
#[derive(Debug, Clone, Default)]
pub struct NotifyClientFactory {
    roots: WatchRoots,
}

impl NotifyClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently registered watch roots, ascending.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.roots.snapshot()
    }
}

impl ClientFactory for NotifyClientFactory {
    fn connect(&self) -> Result<Box<dyn NotificationClient>, WatchError> {
        Ok(Box::new(NotifyClient::new(self.roots.clone())))
    }
}

/// Ref-counted set of watch roots.
#[derive(Debug, Clone, Default)]
struct WatchRoots(Arc<Mutex<BTreeMap<PathBuf, usize>>>);

impl WatchRoots {
    /// Take a reference on `root`, or on an already registered root that
    /// strictly contains it. Returns the root used and whether it was an
    /// enclosing one.
    fn acquire(&self, root: PathBuf) -> (PathBuf, bool) {
        let mut roots = self.lock();
        let enclosing = roots
            .keys()
            .find(|existing| root.starts_with(existing) && **existing != root)
            .cloned();
        let (chosen, nested) = match enclosing {
            Some(outer) => (outer, true),
            None => (root, false),
        };
        *roots.entry(chosen.clone()).or_insert(0) += 1;
        (chosen, nested)
    }

    fn release(&self, root: &Path) {
        let mut roots = self.lock();
        if let Some(count) = roots.get_mut(root) {
            *count -= 1;
            if *count == 0 {
                roots.remove(root);
            }
        }
    }

    fn snapshot(&self) -> Vec<PathBuf> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, usize>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct NotifyClient {
    roots: WatchRoots,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    ended: bool,
    root: Option<PathBuf>,
    subscription: Option<Subscription>,
}

struct Subscription {
    _watcher: RecommendedWatcher,
    delivery: JoinHandle<()>,
}

impl NotifyClient {
    fn new(roots: WatchRoots) -> Self {
        Self {
            roots,
            state: Mutex::new(ClientState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self) -> Result<(), WatchError> {
        if self.lock().ended {
            return Err(WatchError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationClient for NotifyClient {
    async fn check_capabilities(
        &self,
        required: &[Capability],
    ) -> Result<Option<String>, WatchError> {
        self.ensure_open()?;
        let missing: Vec<Capability> = required
            .iter()
            .copied()
            .filter(|capability| !SUPPORTED.contains(capability))
            .collect();
        if !missing.is_empty() {
            return Err(WatchError::Capability { missing });
        }
        Ok(None)
    }

    async fn register_watch(&self, path: &Path) -> Result<WatchRegistration, WatchError> {
        self.ensure_open()?;
        let requested = path.to_path_buf();
        let (canonical, project_root) =
            tokio::task::spawn_blocking(move || resolve_project_root(&requested))
                .await
                .map_err(|err| WatchError::Join {
                    task: "register_watch",
                    reason: err.to_string(),
                })??;

        let (watch_root, nested) = self.roots.acquire(project_root);
        {
            let mut state = self.lock();
            if state.ended {
                drop(state);
                self.roots.release(&watch_root);
                return Err(WatchError::Closed);
            }
            if let Some(previous) = state.root.replace(watch_root.clone()) {
                self.roots.release(&previous);
            }
        }

        let relative_path = canonical
            .strip_prefix(&watch_root)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let warning = nested.then(|| {
            format!(
                "{} is nested inside existing watch {}; reusing it",
                canonical.display(),
                watch_root.display()
            )
        });
        tracing::debug!(
            root = %watch_root.display(),
            relative = %relative_path.display(),
            "resolved watch root",
        );

        Ok(WatchRegistration {
            watch_root,
            relative_path,
            warning,
        })
    }

    async fn get_config(&self, watch_root: &Path) -> Result<Value, WatchError> {
        self.ensure_open()?;
        let file = watch_root.join(WATCH_CONFIG_FILE);
        let config_err = |reason: String| WatchError::WatchConfig {
            path: file.clone(),
            reason,
        };
        match tokio::fs::read_to_string(&file).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Value::Object(Default::default())),
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|err| config_err(err.to_string()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Value::Object(Default::default())),
            Err(err) => Err(config_err(err.to_string())),
        }
    }

    async fn subscribe(
        &self,
        watch_root: &Path,
        relative_path: &Path,
        handler: ChangeHandler,
    ) -> Result<(), WatchError> {
        self.ensure_open()?;
        let scope = scope_of(watch_root, relative_path);
        let subscription_err = |err: notify::Error| WatchError::Subscription {
            path: scope.clone(),
            reason: err.to_string(),
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })
        .map_err(subscription_err)?;
        watcher
            .watch(&scope, RecursiveMode::Recursive)
            .map_err(subscription_err)?;

        let delivery = tokio::spawn(deliver(scope.clone(), event_rx, handler));

        let mut state = self.lock();
        if state.ended {
            delivery.abort();
            return Err(WatchError::Closed);
        }
        if let Some(previous) = state.subscription.replace(Subscription {
            _watcher: watcher,
            delivery,
        }) {
            previous.delivery.abort();
        }
        tracing::debug!(scope = %scope.display(), "subscription installed");
        Ok(())
    }

    fn end(&self) {
        let mut state = self.lock();
        if state.ended {
            return;
        }
        state.ended = true;
        if let Some(subscription) = state.subscription.take() {
            subscription.delivery.abort();
        }
        if let Some(root) = state.root.take() {
            self.roots.release(&root);
        }
    }
}

impl Drop for NotifyClient {
    fn drop(&mut self) {
        self.end();
    }
}

// ---------------------------------------------------------------------------
// Root resolution
// ---------------------------------------------------------------------------

/// Canonicalize `path` and find its project root: the nearest ancestor
/// (inclusive) holding a root marker, else the directory itself.
fn resolve_project_root(path: &Path) -> Result<(PathBuf, PathBuf), WatchError> {
    let registration_err = |reason: String| WatchError::Registration {
        path: path.to_path_buf(),
        reason,
    };
    let canonical = std::fs::canonicalize(path).map_err(|err| registration_err(err.to_string()))?;
    if !canonical.is_dir() {
        return Err(registration_err("not a directory".to_string()));
    }
    let root = canonical
        .ancestors()
        .find(|dir| ROOT_MARKERS.iter().any(|marker| dir.join(marker).exists()))
        .unwrap_or(&canonical)
        .to_path_buf();
    Ok((canonical, root))
}

// ---------------------------------------------------------------------------
// Event delivery
// ---------------------------------------------------------------------------

/// Coalesce raw events into batches and hand each batch to `handler`,
/// awaiting it before the next so batches stay in emission order.
async fn deliver(
    scope: PathBuf,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    handler: ChangeHandler,
) {
    while let Some(first) = events.recv().await {
        let mut batch = BTreeSet::new();
        collect(&scope, first, &mut batch);

        let deadline = Instant::now() + DEBOUNCE_WINDOW;
        let mut closed = false;
        loop {
            match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => collect(&scope, event, &mut batch),
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            let scope_for_batch = scope.clone();
            let handler = handler.clone();
            let delivered = tokio::task::spawn_blocking(move || {
                let files = batch
                    .into_iter()
                    .map(|name| {
                        let exists = scope_for_batch.join(&name).exists();
                        ChangedFile { name, exists }
                    })
                    .collect();
                handler(ChangeEvent { files });
            })
            .await;
            if let Err(err) = delivered {
                tracing::error!(scope = %scope.display(), error = %err, "change handler failed");
            }
        }

        if closed {
            break;
        }
    }
}

fn collect(scope: &Path, event: notify::Result<Event>, batch: &mut BTreeSet<PathBuf>) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "watcher event error");
            return;
        }
    };
    if !is_relevant_event_kind(&event.kind) {
        return;
    }
    for path in event.paths {
        if let Ok(relative) = path.strip_prefix(scope) {
            if !relative.as_os_str().is_empty() {
                batch.insert(relative.to_path_buf());
            }
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
