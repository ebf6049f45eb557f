//! linkwatch daemon: watcher lifecycle and link reconciliation.
//!
//! - [`client`]: the notification service boundary
//! - [`notify_client`]: `notify`-backed client
//! - [`handshake`]: capability → register → config → subscribe
//! - [`supervisor`]: watcher table and snapshot reconciliation
//! - [`trigger`]: self-watch on the links file and the reload loop

pub mod client;
mod error;
pub mod handshake;
pub mod notify_client;
pub mod paths;
mod runtime;
pub mod supervisor;
#[cfg(test)]
mod testing;
pub mod trigger;

pub use client::{Capability, ClientFactory, NotificationClient, WatchRegistration};
pub use error::WatchError;
pub use handshake::ActiveWatch;
pub use notify_client::NotifyClientFactory;
pub use runtime::{run, run_until, start_blocking, DaemonOptions};
pub use supervisor::{plan, Supervisor, Transition, WatcherHandle, WatcherTable};
pub use trigger::SelfWatch;
