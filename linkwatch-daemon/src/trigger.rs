//! Self-watch on the links configuration directory.
//!
//! The watch is established once through the regular handshake. Its handler
//! only forwards a reload request when the links file itself changed; the
//! reload loop drains bursts of requests into a single `refresh`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use linkwatch_core::{ChangeEvent, EventSink};

use crate::client::ClientFactory;
use crate::error::WatchError;
use crate::handshake::{self, ActiveWatch};
use crate::supervisor::Supervisor;

/// The configuration watch. Lives until the daemon exits.
#[derive(Debug)]
pub struct SelfWatch {
    watch: ActiveWatch,
}

impl SelfWatch {
    pub fn watch(&self) -> &ActiveWatch {
        &self.watch
    }
}

/// Watch the directory holding `config_path` and send on `reload_tx`
/// whenever the file named by `config_path` changes.
pub async fn establish(
    factory: &dyn ClientFactory,
    config_path: &Path,
    reload_tx: mpsc::UnboundedSender<()>,
    sink: &EventSink,
) -> Result<SelfWatch, WatchError> {
    let fatal = |source: WatchError| WatchError::SelfWatch {
        path: config_path.to_path_buf(),
        source: Box::new(source),
    };

    let (dir, file_name) = watched_dir(config_path).ok_or_else(|| {
        fatal(WatchError::Registration {
            path: config_path.to_path_buf(),
            reason: "links file has no file name".to_string(),
        })
    })?;

    let handler = Arc::new(move |event: ChangeEvent| {
        if event.touches(&file_name) {
            let _ = reload_tx.send(());
        }
    });

    let client = factory.connect().map_err(fatal)?;
    let watch = handshake::establish(client, &dir, handler, sink)
        .await
        .map_err(fatal)?;
    Ok(SelfWatch { watch })
}

/// Directory to watch and file name to match for `config_path`. A bare
/// file name lives in the current directory.
fn watched_dir(config_path: &Path) -> Option<(PathBuf, PathBuf)> {
    let name = PathBuf::from(config_path.file_name()?);
    let dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, name))
}

/// Refresh the supervisor once per burst of reload requests until shutdown
/// or until every sender is gone.
pub async fn run_reload_loop(
    supervisor: Arc<Supervisor>,
    mut requests: mpsc::UnboundedReceiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            request = requests.recv() => {
                if request.is_none() {
                    break;
                }
                let mut coalesced = 0usize;
                while requests.try_recv().is_ok() {
                    coalesced += 1;
                }
                if coalesced > 0 {
                    debug!(coalesced, "coalesced reload requests");
                }
                // Failures are reported by `refresh`; the loop keeps going.
                let _ = supervisor.refresh().await;
            }
        }
    }
}
