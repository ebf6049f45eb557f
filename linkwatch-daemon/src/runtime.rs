use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use linkwatch_core::{EventSink, Reporter};

use crate::client::ClientFactory;
use crate::error::{io_err, WatchError};
use crate::notify_client::NotifyClientFactory;
use crate::supervisor::Supervisor;
use crate::trigger;

/// Options threaded from the command line into the daemon.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
    pub silent: bool,
}

/// Start the daemon runtime and block the current thread until ctrl-c.
pub fn start_blocking(
    options: DaemonOptions,
    reporter: Arc<dyn Reporter>,
) -> Result<(), WatchError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let sink = EventSink::new(reporter, options.silent);
    runtime.block_on(run(
        options.config_path,
        Arc::new(NotifyClientFactory::new()),
        sink,
    ))
}

/// Run the daemon until ctrl-c.
pub async fn run(
    config_path: PathBuf,
    factory: Arc<dyn ClientFactory>,
    sink: EventSink,
) -> Result<(), WatchError> {
    run_until(config_path, factory, sink, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler failed; shutting down");
        }
    })
    .await
}

/// Run the daemon until `stop` resolves.
///
/// The self-watch is established before the first reconcile so that edits
/// made while the initial handshakes are in flight are not missed.
pub async fn run_until<F>(
    config_path: PathBuf,
    factory: Arc<dyn ClientFactory>,
    sink: EventSink,
    stop: F,
) -> Result<(), WatchError>
where
    F: Future<Output = ()> + Send,
{
    ensure_config_dir(&config_path)?;

    let supervisor = Arc::new(Supervisor::new(factory.clone(), &config_path, sink.clone()));
    let (reload_tx, reload_rx) = mpsc::unbounded_channel::<()>();
    let self_watch =
        trigger::establish(factory.as_ref(), &config_path, reload_tx.clone(), &sink).await?;
    info!(config = %config_path.display(), "watching links configuration");

    // Initial reconcile from the empty snapshot.
    let _ = reload_tx.send(());

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let reload_handle = {
        let shutdown = shutdown_tx.subscribe();
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            trigger::run_reload_loop(supervisor, reload_rx, shutdown).await;
            Ok::<(), WatchError>(())
        })
    };

    stop.await;
    info!("shutting down");
    let _ = shutdown_tx.send(());
    let joined = handle_join("reload", reload_handle.await);

    supervisor.shutdown().await;
    drop(self_watch);
    drop(reload_tx);
    joined
}

fn ensure_config_dir(config_path: &Path) -> Result<(), WatchError> {
    if let Some(dir) = config_path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
    }
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), WatchError>, tokio::task::JoinError>,
) -> Result<(), WatchError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(WatchError::Join {
            task,
            reason: err.to_string(),
        }),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
