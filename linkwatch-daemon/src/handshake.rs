//! Watcher handshake: capability check → watch registration → watch config →
//! subscribe. Each step consumes the previous step's result; the first
//! failure closes the connection and is returned to the caller unretried.

use std::fmt;
use std::path::{Path, PathBuf};

use linkwatch_core::{Category, ChangeHandler, EventSink};

use crate::client::{scope_of, NotificationClient, WatchRegistration, REQUIRED_CAPABILITIES};
use crate::error::WatchError;

/// A connection with a live subscription. Dropping it closes the connection.
pub struct ActiveWatch {
    client: Box<dyn NotificationClient>,
    watch_root: PathBuf,
    relative_path: PathBuf,
}

impl ActiveWatch {
    pub fn watch_root(&self) -> &Path {
        &self.watch_root
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    /// Directory the subscription covers.
    pub fn scope(&self) -> PathBuf {
        scope_of(&self.watch_root, &self.relative_path)
    }
}

impl Drop for ActiveWatch {
    fn drop(&mut self) {
        self.client.end();
    }
}

impl fmt::Debug for ActiveWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveWatch")
            .field("watch_root", &self.watch_root)
            .field("relative_path", &self.relative_path)
            .finish_non_exhaustive()
    }
}

/// Run the handshake for `src` on `client`, registering `handler` for every
/// change batch of the resulting subscription.
pub async fn establish(
    client: Box<dyn NotificationClient>,
    src: &Path,
    handler: ChangeHandler,
    sink: &EventSink,
) -> Result<ActiveWatch, WatchError> {
    match run_steps(client.as_ref(), src, handler, sink).await {
        Ok(registration) => {
            sink.emit(Category::Subscribe, src.display());
            Ok(ActiveWatch {
                client,
                watch_root: registration.watch_root,
                relative_path: registration.relative_path,
            })
        }
        Err(err) => {
            client.end();
            sink.emit(Category::Error, &err);
            Err(err)
        }
    }
}

async fn run_steps(
    client: &dyn NotificationClient,
    src: &Path,
    handler: ChangeHandler,
    sink: &EventSink,
) -> Result<WatchRegistration, WatchError> {
    if let Some(warning) = client.check_capabilities(REQUIRED_CAPABILITIES).await? {
        sink.emit(Category::WatchWarning, warning);
    }

    let registration = client.register_watch(src).await?;
    if let Some(warning) = &registration.warning {
        sink.emit(Category::WatchWarning, warning);
    }
    sink.emit(Category::Watch, registration.watch_root.display());

    let config = client.get_config(&registration.watch_root).await?;
    sink.emit(Category::WatchConfig, config);

    client
        .subscribe(&registration.watch_root, &registration.relative_path, handler)
        .await?;
    Ok(registration)
}
