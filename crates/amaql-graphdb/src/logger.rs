//! Caller-supplied diagnostics sink for the engines.
//!
//! Engines always emit `tracing` events; a [`Logger`] additionally receives
//! the human-readable messages (skipped derivations, query summaries) so an
//! embedding application can surface them without installing a subscriber.

/// Diagnostics sink shared by the derivation and query engines.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards every message to `tracing` under the `amaql` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: "amaql", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "amaql", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "amaql", "{message}");
    }
}
