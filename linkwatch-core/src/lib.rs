//! linkwatch core library: link types, change events, configuration store,
//! observability sink.
//!
//! - [`types`]: link records, snapshots and change events
//! - [`error`]: [`ConfigError`]
//! - [`registry`]: `links.json` load / save / edit and [`LinkRegistry`]
//! - [`report`]: categorized lifecycle messages and the [`EventSink`]

pub mod error;
pub mod registry;
pub mod report;
pub mod types;

pub use error::ConfigError;
pub use registry::LinkRegistry;
pub use report::{Category, EventSink, MemoryReporter, Reporter, TracingReporter};
pub use types::{ChangeEvent, ChangeHandler, ChangedFile, Link, LinkId, LinkSnapshot};
