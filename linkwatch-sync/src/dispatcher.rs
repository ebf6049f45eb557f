//! Per-link change handler: mirrors every file named in a change batch from
//! the link's `src` into its `dest`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use linkwatch_core::{Category, ChangeEvent, ChangeHandler, EventSink};

use crate::copier::{copy_entry, CopyResult};
use crate::error::CopyError;

/// Copies changed files for one link. Failures are reported through the sink
/// and never escape [`CopyDispatcher::dispatch`].
#[derive(Debug, Clone)]
pub struct CopyDispatcher {
    src: PathBuf,
    dest: PathBuf,
    sink: EventSink,
}

impl CopyDispatcher {
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<PathBuf>, sink: EventSink) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            sink,
        }
    }

    /// Mirror every entry of `event`, returning one outcome per file in order.
    pub fn dispatch(&self, event: &ChangeEvent) -> Vec<Result<CopyResult, CopyError>> {
        let mut outcomes = Vec::with_capacity(event.files.len());
        for file in &event.files {
            let outcome = if file.exists {
                copy_entry(&self.src, &self.dest, &file.name)
            } else {
                Ok(CopyResult::Skipped {
                    path: self.dest.join(&file.name),
                })
            };
            self.report(&file.name, &outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Wrap the dispatcher as a subscription handler.
    pub fn into_handler(self) -> ChangeHandler {
        let dispatcher = Arc::new(self);
        Arc::new(move |event: ChangeEvent| {
            dispatcher.dispatch(&event);
        })
    }

    fn report(&self, name: &Path, outcome: &Result<CopyResult, CopyError>) {
        match outcome {
            Ok(CopyResult::Copied { path, .. }) => self.sink.emit(
                Category::Copy,
                format_args!("{} -> {}", self.src.join(name).display(), path.display()),
            ),
            Ok(CopyResult::Unchanged { path }) => {
                tracing::debug!(path = %path.display(), "destination already up to date");
            }
            Ok(CopyResult::Directory { .. }) | Ok(CopyResult::Skipped { .. }) => {}
            Err(err) => {
                tracing::warn!(src = %self.src.display(), error = %err, "copy failed");
                self.sink.emit(Category::Error, err);
            }
        }
    }
}
