//! # linkwatch-sync
//!
//! Copy side of a link: the hash-gated atomic file copier and the per-link
//! [`CopyDispatcher`] registered as a subscription's change handler.

pub mod copier;
pub mod dispatcher;
pub mod error;

pub use copier::{copy_entry, CopyResult};
pub use dispatcher::CopyDispatcher;
pub use error::CopyError;
