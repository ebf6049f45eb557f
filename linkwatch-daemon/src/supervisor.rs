//! Watcher supervisor: owns the watcher table and reconciles link snapshots
//! against it.
//!
//! Reconciliation is split into a pure diff ([`plan`]) and its application.
//! Applying a plan only *starts* handshakes; each handshake completes on its
//! own task and settles its slot afterwards. Slots are tagged with a
//! generation so a handshake that completes after its link was stopped (or
//! stopped and restarted) discards its result instead of resurrecting it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use linkwatch_core::{Category, ChangeHandler, EventSink, Link, LinkId, LinkRegistry, LinkSnapshot};
use linkwatch_sync::CopyDispatcher;

use crate::client::{ClientFactory, NotificationClient};
use crate::error::WatchError;
use crate::handshake::{self, ActiveWatch};

/// One watcher state change derived from a pair of snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start { id: LinkId, link: Link },
    Stop { id: LinkId, link: Link },
}

impl Transition {
    pub fn id(&self) -> &LinkId {
        match self {
            Transition::Start { id, .. } | Transition::Stop { id, .. } => id,
        }
    }
}

fn is_enabled(snapshot: &LinkSnapshot, id: &LinkId) -> bool {
    snapshot.get(id).map_or(false, |link| link.enabled)
}

/// Diff two snapshots. Every id of either snapshot is visited exactly once in
/// ascending order; only enabled-state flips produce a transition. A link
/// whose src/dest changed while staying enabled is left alone.
pub fn plan(previous: &LinkSnapshot, current: &LinkSnapshot) -> Vec<Transition> {
    let mut ids: Vec<&LinkId> = previous.keys().chain(current.keys()).collect();
    ids.sort();
    ids.dedup();

    let mut transitions = Vec::new();
    for id in ids {
        match (is_enabled(previous, id), is_enabled(current, id)) {
            (false, true) => transitions.push(Transition::Start {
                id: id.clone(),
                link: current[id].clone(),
            }),
            (true, false) => transitions.push(Transition::Stop {
                id: id.clone(),
                link: previous[id].clone(),
            }),
            _ => {}
        }
    }
    transitions
}

/// An established watcher for one link.
#[derive(Debug)]
pub struct WatcherHandle {
    pub id: LinkId,
    pub link: Link,
    pub watch: ActiveWatch,
}

#[derive(Debug)]
enum Slot {
    Handshaking { generation: u64 },
    Active(WatcherHandle),
}

/// Link id → watcher slot. An id is present while its handshake is in flight
/// or its watcher is active, and never otherwise.
#[derive(Debug, Default)]
pub struct WatcherTable {
    slots: BTreeMap<LinkId, Slot>,
    next_generation: u64,
}

impl WatcherTable {
    pub fn active_ids(&self) -> Vec<LinkId> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<LinkId> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Handshaking { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn begin(&mut self, id: LinkId) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.slots.insert(id, Slot::Handshaking { generation });
        generation
    }

    fn is_pending(&self, id: &LinkId, generation: u64) -> bool {
        matches!(
            self.slots.get(id),
            Some(Slot::Handshaking { generation: g }) if *g == generation
        )
    }
}

pub struct Supervisor {
    factory: Arc<dyn ClientFactory>,
    sink: EventSink,
    registry: Mutex<LinkRegistry>,
    table: Arc<Mutex<WatcherTable>>,
    in_flight: StdMutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        config_path: impl Into<PathBuf>,
        sink: EventSink,
    ) -> Self {
        Self {
            factory,
            sink,
            registry: Mutex::new(LinkRegistry::new(config_path)),
            table: Arc::new(Mutex::new(WatcherTable::default())),
            in_flight: StdMutex::new(Vec::new()),
        }
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Reload the links file and reconcile against the previous snapshot.
    ///
    /// A load failure is reported and returned; the snapshot and every
    /// watcher stay as they were.
    pub async fn refresh(&self) -> Result<Vec<Transition>, WatchError> {
        let mut registry = self.registry.lock().await;
        let mut staged = registry.clone();
        let reloaded = tokio::task::spawn_blocking(move || {
            let snapshots = staged.reload();
            snapshots.map(|snapshots| (staged, snapshots))
        })
        .await
        .map_err(|e| WatchError::Join {
            task: "reload",
            reason: e.to_string(),
        })?;

        let (staged, (previous, current)) = match reloaded {
            Ok(reloaded) => reloaded,
            Err(err) => {
                self.sink.emit(Category::Error, &err);
                return Err(err.into());
            }
        };
        *registry = staged;
        Ok(self.reconcile(&previous, &current).await)
    }

    /// Apply `plan(previous, current)` to the watcher table.
    ///
    /// Calls are serialized on the table lock, which is held for the whole
    /// application and never across a handshake step.
    pub async fn reconcile(
        &self,
        previous: &LinkSnapshot,
        current: &LinkSnapshot,
    ) -> Vec<Transition> {
        let transitions = plan(previous, current);
        let mut table = self.table.lock().await;
        for transition in &transitions {
            match transition {
                Transition::Start { id, link } => self.start(&mut table, id, link),
                Transition::Stop { id, .. } => self.stop(&mut table, id),
            }
        }
        transitions
    }

    fn start(&self, table: &mut WatcherTable, id: &LinkId, link: &Link) {
        if table.slots.contains_key(id) {
            debug!(link = %id, "watcher already present, start skipped");
            return;
        }
        let client = match self.factory.connect() {
            Ok(client) => client,
            Err(err) => {
                self.sink.emit(Category::Error, &err);
                return;
            }
        };

        let generation = table.begin(id.clone());
        let handler = CopyDispatcher::new(&link.src, &link.dest, self.sink.clone()).into_handler();
        let task = tokio::spawn(complete_start(
            self.table.clone(),
            self.sink.clone(),
            client,
            handler,
            id.clone(),
            link.clone(),
            generation,
        ));
        self.track(task);
    }

    fn stop(&self, table: &mut WatcherTable, id: &LinkId) {
        match table.slots.remove(id) {
            Some(Slot::Active(WatcherHandle { link, watch, .. })) => {
                drop(watch);
                self.sink.emit(Category::End, describe(&link));
            }
            // The handshake task reports `end` once it settles.
            Some(Slot::Handshaking { generation }) => {
                debug!(link = %id, generation, "stopped during handshake");
            }
            None => debug!(link = %id, "no watcher to stop"),
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(task);
    }

    fn take_in_flight(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(
            &mut *self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Wait until every handshake started so far has settled its slot.
    pub async fn settle(&self) {
        loop {
            let tasks = self.take_in_flight();
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    if !err.is_cancelled() {
                        warn!(error = %err, "handshake task failed");
                    }
                }
            }
        }
    }

    /// Stop every watcher and abandon in-flight handshakes.
    pub async fn shutdown(&self) {
        let slots = std::mem::take(&mut self.table.lock().await.slots);
        for (_, slot) in slots {
            if let Slot::Active(WatcherHandle { link, watch, .. }) = slot {
                drop(watch);
                self.sink.emit(Category::End, describe(&link));
            }
        }
        for task in self.take_in_flight() {
            task.abort();
            let _ = task.await;
        }
    }

    pub async fn active_ids(&self) -> Vec<LinkId> {
        self.table.lock().await.active_ids()
    }

    pub async fn pending_ids(&self) -> Vec<LinkId> {
        self.table.lock().await.pending_ids()
    }
}

async fn complete_start(
    table: Arc<Mutex<WatcherTable>>,
    sink: EventSink,
    client: Box<dyn NotificationClient>,
    handler: ChangeHandler,
    id: LinkId,
    link: Link,
    generation: u64,
) {
    let result = handshake::establish(client, &link.src, handler, &sink).await;

    let mut table = table.lock().await;
    let wanted = table.is_pending(&id, generation);
    match result {
        Ok(watch) if wanted => {
            table
                .slots
                .insert(id.clone(), Slot::Active(WatcherHandle { id, link, watch }));
        }
        Ok(watch) => {
            drop(table);
            debug!(link = %id, generation, "discarding stale handshake result");
            drop(watch);
            sink.emit(Category::End, describe(&link));
        }
        Err(_) if wanted => {
            table.slots.remove(&id);
        }
        Err(_) => {
            drop(table);
            sink.emit(Category::End, describe(&link));
        }
    }
}

fn describe(link: &Link) -> String {
    format!("{} -> {}", link.src.display(), link.dest.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use linkwatch_core::{ChangeEvent, ChangedFile, ConfigError, MemoryReporter};
    use tempfile::TempDir;

    use crate::testing::{FakeService, Step};

    fn snapshot(entries: &[(&str, bool)]) -> LinkSnapshot {
        entries
            .iter()
            .map(|(id, enabled)| {
                (
                    LinkId::from(*id),
                    Link::new(format!("/src/{id}"), format!("/dest/{id}"), *enabled),
                )
            })
            .collect()
    }

    fn ids(names: &[&str]) -> Vec<LinkId> {
        names.iter().map(|name| LinkId::from(*name)).collect()
    }

    fn supervisor(service: &FakeService) -> (Arc<MemoryReporter>, Supervisor) {
        let memory = Arc::new(MemoryReporter::default());
        let sink = EventSink::new(memory.clone(), false);
        let supervisor = Supervisor::new(Arc::new(service.clone()), "/unused/links.json", sink);
        (memory, supervisor)
    }

    #[test]
    fn plan_visits_union_in_ascending_order() {
        let previous = snapshot(&[("c", true), ("a", true), ("d", false)]);
        let current = snapshot(&[("b", true), ("a", true), ("d", true)]);

        let planned: Vec<String> = plan(&previous, &current)
            .iter()
            .map(|t| match t {
                Transition::Start { id, .. } => format!("start {id}"),
                Transition::Stop { id, .. } => format!("stop {id}"),
            })
            .collect();
        assert_eq!(planned, vec!["start b", "stop c", "start d"]);
    }

    #[test]
    fn plan_ignores_src_dest_edits_on_enabled_link() {
        let previous = snapshot(&[("a", true)]);
        let mut current = previous.clone();
        current.get_mut(&LinkId::from("a")).unwrap().dest = PathBuf::from("/elsewhere");
        assert!(plan(&previous, &current).is_empty());
    }

    #[test]
    fn plan_stops_removed_link_with_previous_record() {
        let previous = snapshot(&[("a", true)]);
        assert_eq!(
            plan(&previous, &LinkSnapshot::new()),
            vec![Transition::Stop {
                id: LinkId::from("a"),
                link: previous[&LinkId::from("a")].clone(),
            }]
        );
    }

    #[tokio::test]
    async fn enable_starts_exactly_once_and_repeat_is_idempotent() {
        let service = FakeService::new();
        let (_memory, supervisor) = supervisor(&service);
        let on = snapshot(&[("a", true), ("b", false)]);

        supervisor.reconcile(&LinkSnapshot::new(), &on).await;
        supervisor.settle().await;
        assert_eq!(supervisor.active_ids().await, ids(&["a"]));
        assert_eq!(service.connections(), 1);

        let second = supervisor.reconcile(&on, &on).await;
        supervisor.settle().await;
        assert!(second.is_empty());
        assert_eq!(service.connections(), 1);
        assert_eq!(service.ends("/src/a"), 0);
    }

    #[tokio::test]
    async fn disable_one_enable_other() {
        let service = FakeService::new();
        let (memory, supervisor) = supervisor(&service);
        let first = snapshot(&[("a", true)]);
        let second = snapshot(&[("a", false), ("b", true)]);

        supervisor.reconcile(&LinkSnapshot::new(), &first).await;
        supervisor.settle().await;
        supervisor.reconcile(&first, &second).await;
        supervisor.settle().await;

        assert_eq!(supervisor.active_ids().await, ids(&["b"]));
        assert_eq!(service.subscribes("/src/a"), 1);
        assert_eq!(service.ends("/src/a"), 1);
        assert_eq!(service.subscribes("/src/b"), 1);
        assert_eq!(service.ends("/src/b"), 0);
        assert!(memory
            .messages()
            .contains(&(Category::End, "/src/a -> /dest/a".to_string())));
    }

    #[tokio::test]
    async fn removal_stops_exactly_once() {
        let service = FakeService::new();
        let (memory, supervisor) = supervisor(&service);
        let first = snapshot(&[("a", true)]);

        supervisor.reconcile(&LinkSnapshot::new(), &first).await;
        supervisor.settle().await;
        supervisor.reconcile(&first, &LinkSnapshot::new()).await;
        supervisor.reconcile(&LinkSnapshot::new(), &LinkSnapshot::new()).await;

        assert!(supervisor.active_ids().await.is_empty());
        assert_eq!(service.ends("/src/a"), 1);
        assert_eq!(memory.count(Category::End), 1);
    }

    #[tokio::test]
    async fn capability_failure_is_isolated() {
        let service = FakeService::new();
        let (memory, supervisor) = supervisor(&service);
        let first = snapshot(&[("b", true)]);
        let second = snapshot(&[("a", true), ("b", true)]);

        supervisor.reconcile(&LinkSnapshot::new(), &first).await;
        supervisor.settle().await;
        // Connection 1 is the one opened for "a".
        service.fail_connection(1, Step::Capabilities);
        supervisor.reconcile(&first, &second).await;
        supervisor.settle().await;

        assert_eq!(supervisor.active_ids().await, ids(&["b"]));
        assert!(supervisor.pending_ids().await.is_empty());
        assert_eq!(service.ends("/src/b"), 0);
        assert_eq!(memory.count(Category::Error), 1);
    }

    #[tokio::test]
    async fn failing_registration_leaves_link_unwatched_without_retry() {
        let service = FakeService::new();
        service.fail_at("/src/a", Step::Register);
        let (_memory, supervisor) = supervisor(&service);
        let on = snapshot(&[("a", true)]);

        supervisor.reconcile(&LinkSnapshot::new(), &on).await;
        supervisor.settle().await;
        supervisor.reconcile(&on, &on).await;
        supervisor.settle().await;

        assert!(supervisor.active_ids().await.is_empty());
        assert_eq!(service.registrations(), 1);
        assert_eq!(service.ends("/src/a"), 1);
    }

    #[tokio::test]
    async fn stop_before_handshake_completes_discards_result() {
        let service = FakeService::new();
        let gate = service.gate("/src/a");
        let (memory, supervisor) = supervisor(&service);
        let on = snapshot(&[("a", true)]);

        supervisor.reconcile(&LinkSnapshot::new(), &on).await;
        tokio::task::yield_now().await;
        assert_eq!(supervisor.pending_ids().await, ids(&["a"]));

        supervisor.reconcile(&on, &LinkSnapshot::new()).await;
        assert_eq!(memory.count(Category::End), 0);
        gate.open();
        supervisor.settle().await;

        assert!(supervisor.active_ids().await.is_empty());
        assert!(supervisor.pending_ids().await.is_empty());
        assert_eq!(service.subscribes("/src/a"), 1);
        assert_eq!(service.ends("/src/a"), 1);

        let categories: Vec<Category> = memory.messages().into_iter().map(|(c, _)| c).collect();
        assert_eq!(
            categories,
            vec![
                Category::Watch,
                Category::WatchConfig,
                Category::Subscribe,
                Category::End,
            ]
        );
        assert_eq!(
            memory.messages().last(),
            Some(&(Category::End, "/src/a -> /dest/a".to_string()))
        );
    }

    #[tokio::test]
    async fn stale_handshake_failure_still_ends_the_link() {
        let service = FakeService::new();
        let gate = service.gate("/src/a");
        service.fail_at("/src/a", Step::Subscribe);
        let (memory, supervisor) = supervisor(&service);
        let on = snapshot(&[("a", true)]);

        supervisor.reconcile(&LinkSnapshot::new(), &on).await;
        tokio::task::yield_now().await;
        supervisor.reconcile(&on, &LinkSnapshot::new()).await;
        gate.open();
        supervisor.settle().await;

        assert!(supervisor.pending_ids().await.is_empty());
        let categories: Vec<Category> = memory.messages().into_iter().map(|(c, _)| c).collect();
        assert_eq!(
            categories,
            vec![
                Category::Watch,
                Category::WatchConfig,
                Category::Error,
                Category::End,
            ]
        );
    }

    #[tokio::test]
    async fn stop_after_handshake_completes_removes_entry() {
        let service = FakeService::new();
        let (_memory, supervisor) = supervisor(&service);
        let on = snapshot(&[("a", true)]);

        supervisor.reconcile(&LinkSnapshot::new(), &on).await;
        supervisor.settle().await;
        supervisor.reconcile(&on, &LinkSnapshot::new()).await;
        supervisor.settle().await;

        assert!(supervisor.active_ids().await.is_empty());
        assert_eq!(service.ends("/src/a"), 1);
    }

    #[tokio::test]
    async fn back_to_back_toggle_keeps_one_watcher() {
        let service = FakeService::new();
        let gate = service.gate("/src/a");
        let (_memory, supervisor) = supervisor(&service);
        let on = snapshot(&[("a", true)]);
        let off = snapshot(&[("a", false)]);

        supervisor.reconcile(&LinkSnapshot::new(), &on).await;
        supervisor.reconcile(&on, &off).await;
        supervisor.reconcile(&off, &on).await;
        gate.open();
        supervisor.settle().await;

        assert_eq!(supervisor.active_ids().await, ids(&["a"]));
        assert_eq!(service.connections(), 2);
        // The first handshake completes against a superseded slot and is closed.
        assert_eq!(service.ends("/src/a"), 1);
    }

    #[tokio::test]
    async fn active_watcher_copies_changed_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("notes.md"), "hello").unwrap();

        let service = FakeService::new();
        let (memory, supervisor) = supervisor(&service);
        let mut on = LinkSnapshot::new();
        on.insert(LinkId::from("docs"), Link::new(&src, &dest, true));

        supervisor.reconcile(&LinkSnapshot::new(), &on).await;
        supervisor.settle().await;

        let fired = service.fire(
            &src,
            ChangeEvent {
                files: vec![ChangedFile {
                    name: PathBuf::from("notes.md"),
                    exists: true,
                }],
            },
        );
        assert!(fired);
        assert_eq!(fs::read_to_string(dest.join("notes.md")).unwrap(), "hello");
        assert_eq!(memory.count(Category::Copy), 1);
    }

    #[tokio::test]
    async fn refresh_with_malformed_file_preserves_watchers() {
        let tmp = TempDir::new().unwrap();
        let config = tmp.path().join("links.json");
        fs::write(
            &config,
            r#"{"a": {"src": "/src/a", "dest": "/dest/a", "enabled": true}}"#,
        )
        .unwrap();

        let service = FakeService::new();
        let memory = Arc::new(MemoryReporter::default());
        let supervisor = Supervisor::new(
            Arc::new(service.clone()),
            &config,
            EventSink::new(memory.clone(), false),
        );

        let started = supervisor.refresh().await.unwrap();
        assert_eq!(started.len(), 1);
        supervisor.settle().await;
        assert_eq!(supervisor.active_ids().await, ids(&["a"]));

        fs::write(&config, "{ not json").unwrap();
        let err = supervisor.refresh().await.unwrap_err();
        assert!(
            matches!(err, WatchError::Config(ConfigError::Parse { .. })),
            "got: {err}"
        );
        assert_eq!(supervisor.active_ids().await, ids(&["a"]));
        assert_eq!(service.ends("/src/a"), 0);
        assert_eq!(memory.count(Category::Error), 1);

        // A later valid reload diffs against the last good snapshot.
        fs::write(&config, "{}").unwrap();
        let stopped = supervisor.refresh().await.unwrap();
        assert!(matches!(stopped.as_slice(), [Transition::Stop { .. }]));
        assert_eq!(service.ends("/src/a"), 1);
    }

    #[tokio::test]
    async fn refresh_with_missing_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let service = FakeService::new();
        let supervisor = Supervisor::new(
            Arc::new(service.clone()),
            tmp.path().join("links.json"),
            EventSink::tracing(true),
        );
        let err = supervisor.refresh().await.unwrap_err();
        assert!(matches!(err, WatchError::Config(ConfigError::NotFound { .. })));
        assert_eq!(service.connections(), 0);
    }

    #[tokio::test]
    async fn shutdown_ends_active_and_pending_watchers() {
        let service = FakeService::new();
        let _gate = service.gate("/src/b");
        let (memory, supervisor) = supervisor(&service);
        let on = snapshot(&[("a", true), ("b", true)]);

        supervisor.reconcile(&LinkSnapshot::new(), &on).await;
        for _ in 0..10 {
            if supervisor.active_ids().await == ids(&["a"]) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(supervisor.active_ids().await, ids(&["a"]));

        supervisor.shutdown().await;
        assert!(supervisor.active_ids().await.is_empty());
        assert!(supervisor.pending_ids().await.is_empty());
        assert_eq!(service.ends("/src/a"), 1);
        assert_eq!(service.ends("/src/b"), 1);
        assert_eq!(memory.count(Category::End), 1);
    }
}
