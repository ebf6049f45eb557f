//! Observability sink for watcher lifecycle messages.
//!
//! Every lifecycle event (watch root resolved, subscription established,
//! watcher ended, copy results, failures) is routed through an [`EventSink`]
//! instead of being printed directly. The sink owns the global `silent`
//! switch; a [`Reporter`] decides how a message is rendered.

use std::fmt;
use std::sync::Arc;

/// Message category, rendered as the `[tag]` prefix on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Watch,
    WatchWarning,
    WatchConfig,
    Subscribe,
    End,
    Copy,
    Error,
}

impl Category {
    pub fn tag(self) -> &'static str {
        match self {
            Category::Watch => "watch",
            Category::WatchWarning => "watch-warning",
            Category::WatchConfig => "watch-config",
            Category::Subscribe => "subscribe",
            Category::End => "end",
            Category::Copy => "copy",
            Category::Error => "error",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Renders one categorized message.
pub trait Reporter: Send + Sync {
    fn report(&self, category: Category, message: &str);
}

/// Forwards sink messages into `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, category: Category, message: &str) {
        match category {
            Category::Error => tracing::error!(category = %category, "{message}"),
            Category::WatchWarning => tracing::warn!(category = %category, "{message}"),
            _ => tracing::info!(category = %category, "{message}"),
        }
    }
}

/// Cloneable handle on a reporter plus the suppress-all flag.
#[derive(Clone)]
pub struct EventSink {
    reporter: Arc<dyn Reporter>,
    silent: bool,
}

impl EventSink {
    pub fn new(reporter: Arc<dyn Reporter>, silent: bool) -> Self {
        Self { reporter, silent }
    }

    /// Sink that forwards to `tracing`.
    pub fn tracing(silent: bool) -> Self {
        Self::new(Arc::new(TracingReporter), silent)
    }

    pub fn emit(&self, category: Category, message: impl fmt::Display) {
        if self.silent {
            return;
        }
        self.reporter.report(category, &message.to_string());
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("silent", &self.silent)
            .finish_non_exhaustive()
    }
}

/// Reporter that records every message; handy wherever a sink must be inspected.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    messages: std::sync::Mutex<Vec<(Category, String)>>,
}

impl MemoryReporter {
    pub fn messages(&self) -> Vec<(Category, String)> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, category: Category) -> usize {
        self.messages().iter().filter(|(c, _)| *c == category).count()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, category: Category, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((category, message.to_owned()));
    }
}
