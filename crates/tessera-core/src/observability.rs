//! Logging initialization and span helpers.
//!
//! Every Tessera component logs through `tracing`. Hosts call
//! [`init_logging`] once at startup; the span helpers keep span names and
//! field names consistent between the lock and journal layers.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops. `RUST_LOG`
/// controls levels (e.g. `info`, `tessera_flow=debug`) and defaults to `info`.
///
/// # Example
///
/// ```rust
/// use tessera_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
        if installed.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
}

/// Creates a span for journal operations on one entity.
///
/// # Example
///
/// ```rust
/// use tessera_core::observability::journal_span;
///
/// let span = journal_span("add_entry", "user", "42");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn journal_span(operation: &str, data_type: &str, data_id: &str) -> Span {
    tracing::info_span!(
        "journal",
        op = operation,
        data_type = data_type,
        data_id = data_id,
    )
}

/// Creates a span for lock operations on one key or path.
#[must_use]
pub fn lock_span(operation: &str, key: &str) -> Span {
    tracing::debug_span!("lock", op = operation, key = key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = journal_span("archive_entry", "user", "42");
        let _guard = span.enter();
        tracing::info!("inside journal span");

        let span = lock_span("lock", "user/42/addr");
        let _guard = span.enter();
        tracing::debug!("inside lock span");
    }
}
