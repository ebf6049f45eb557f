//! Scripted in-memory notification service for engine tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use linkwatch_core::{ChangeEvent, ChangeHandler};

use crate::client::{Capability, ClientFactory, NotificationClient, WatchRegistration};
use crate::error::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Capabilities,
    Register,
    Config,
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Register(PathBuf),
    Subscribe(PathBuf),
    End(Option<PathBuf>),
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    connections: usize,
    failures_by_connection: HashMap<usize, Step>,
    failures_by_src: HashMap<PathBuf, Step>,
    warnings: Vec<PathBuf>,
    gates: HashMap<PathBuf, Arc<Semaphore>>,
    handlers: HashMap<PathBuf, (usize, ChangeHandler)>,
}

/// Cloneable handle on the fake service; also its [`ClientFactory`].
#[derive(Clone, Default)]
pub(crate) struct FakeService {
    inner: Arc<Mutex<Inner>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }

    /// The `n`-th connection (0-based) fails at `step`.
    pub fn fail_connection(&self, n: usize, step: Step) {
        self.with(|inner| inner.failures_by_connection.insert(n, step));
    }

    /// Every handshake for `src` fails at `step` (register or later).
    pub fn fail_at(&self, src: impl Into<PathBuf>, step: Step) {
        self.with(|inner| inner.failures_by_src.insert(src.into(), step));
    }

    pub fn warn_on(&self, src: impl Into<PathBuf>) {
        self.with(|inner| inner.warnings.push(src.into()));
    }

    /// Hold every `register_watch` for `src` until [`Gate::open`].
    pub fn gate(&self, src: impl Into<PathBuf>) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.with(|inner| inner.gates.insert(src.into(), semaphore.clone()));
        Gate(semaphore)
    }

    pub fn connections(&self) -> usize {
        self.with(|inner| inner.connections)
    }

    pub fn registrations(&self) -> usize {
        self.with(|inner| {
            inner
                .calls
                .iter()
                .filter(|call| matches!(call, Call::Register(_)))
                .count()
        })
    }

    pub fn subscribes(&self, src: impl AsRef<Path>) -> usize {
        let src = src.as_ref().to_path_buf();
        self.count(Call::Subscribe(src))
    }

    pub fn ends(&self, src: impl AsRef<Path>) -> usize {
        let src = src.as_ref().to_path_buf();
        self.count(Call::End(Some(src)))
    }

    /// Connections closed before any watch was registered on them.
    pub fn unregistered_ends(&self) -> usize {
        self.count(Call::End(None))
    }

    /// Deliver `event` to the subscription on `src`, as the service would.
    pub fn fire(&self, src: impl AsRef<Path>, event: ChangeEvent) -> bool {
        let handler = self.with(|inner| inner.handlers.get(src.as_ref()).map(|(_, h)| h.clone()));
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    fn count(&self, wanted: Call) -> usize {
        self.with(|inner| inner.calls.iter().filter(|call| **call == wanted).count())
    }
}

impl ClientFactory for FakeService {
    fn connect(&self) -> Result<Box<dyn NotificationClient>, WatchError> {
        let index = self.with(|inner| {
            inner.connections += 1;
            inner.connections - 1
        });
        Ok(Box::new(FakeClient {
            service: self.clone(),
            index,
            src: Mutex::new(None),
            ended: AtomicBool::new(false),
        }))
    }
}

pub(crate) struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn open(&self) {
        self.0.close();
    }
}

struct FakeClient {
    service: FakeService,
    index: usize,
    src: Mutex<Option<PathBuf>>,
    ended: AtomicBool,
}

impl FakeClient {
    fn fails_at(&self, step: Step) -> bool {
        let src = self.src.lock().unwrap().clone();
        self.service.with(|inner| {
            inner.failures_by_connection.get(&self.index) == Some(&step)
                || src
                    .and_then(|src| inner.failures_by_src.get(&src).copied())
                    .map_or(false, |failing| failing == step)
        })
    }

    fn injected(&self, step: Step, path: &Path) -> WatchError {
        let reason = format!("injected {step:?} failure");
        match step {
            Step::Capabilities => WatchError::Capability {
                missing: vec![Capability::RecursiveWatch],
            },
            Step::Register => WatchError::Registration {
                path: path.to_path_buf(),
                reason,
            },
            Step::Config => WatchError::WatchConfig {
                path: path.to_path_buf(),
                reason,
            },
            Step::Subscribe => WatchError::Subscription {
                path: path.to_path_buf(),
                reason,
            },
        }
    }
}

#[async_trait]
impl NotificationClient for FakeClient {
    async fn check_capabilities(
        &self,
        _required: &[Capability],
    ) -> Result<Option<String>, WatchError> {
        if self.fails_at(Step::Capabilities) {
            return Err(self.injected(Step::Capabilities, Path::new("")));
        }
        Ok(None)
    }

    async fn register_watch(&self, path: &Path) -> Result<WatchRegistration, WatchError> {
        *self.src.lock().unwrap() = Some(path.to_path_buf());
        let (gate, warn) = self.service.with(|inner| {
            inner.calls.push(Call::Register(path.to_path_buf()));
            (
                inner.gates.get(path).cloned(),
                inner.warnings.iter().any(|w| w == path),
            )
        });
        if let Some(gate) = gate {
            // A closed semaphore means the gate is open.
            let _ = gate.acquire().await;
        }
        if self.fails_at(Step::Register) {
            return Err(self.injected(Step::Register, path));
        }
        Ok(WatchRegistration {
            watch_root: path.to_path_buf(),
            relative_path: PathBuf::new(),
            warning: warn.then(|| format!("{} is nested inside existing watch", path.display())),
        })
    }

    async fn get_config(&self, watch_root: &Path) -> Result<Value, WatchError> {
        if self.fails_at(Step::Config) {
            return Err(self.injected(Step::Config, watch_root));
        }
        Ok(json!({ "fake": true }))
    }

    async fn subscribe(
        &self,
        watch_root: &Path,
        _relative_path: &Path,
        handler: ChangeHandler,
    ) -> Result<(), WatchError> {
        if self.fails_at(Step::Subscribe) {
            return Err(self.injected(Step::Subscribe, watch_root));
        }
        self.service.with(|inner| {
            inner.calls.push(Call::Subscribe(watch_root.to_path_buf()));
            inner
                .handlers
                .insert(watch_root.to_path_buf(), (self.index, handler));
        });
        Ok(())
    }

    fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let src = self.src.lock().unwrap().clone();
        self.service.with(|inner| {
            if let Some(src) = &src {
                if inner.handlers.get(src).map(|(index, _)| *index) == Some(self.index) {
                    inner.handlers.remove(src);
                }
            }
            inner.calls.push(Call::End(src));
        });
    }
}

impl Drop for FakeClient {
    fn drop(&mut self) {
        self.end();
    }
}
