//! Logging initialisation and span helpers.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable, multi-line.
    Pretty,
    /// Single-line text.
    #[default]
    Compact,
}

/// Install the global subscriber. Later calls are no-ops, as is a call made
/// after some other subscriber was installed.
///
/// Levels come from `RUST_LOG` (e.g. `info`, `macrofeed_core=debug`),
/// defaulting to `info`.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(env_filter);

        let _ = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        };
    });
}

/// Span wrapping one batch of a source.
#[must_use]
pub fn batch_span(source: &str, items: usize, workers: usize) -> Span {
    tracing::info_span!("batch", source = source, items = items, workers = workers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging(LogFormat::Compact);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn batch_span_enters() {
        let span = batch_span("fred", 3, 2);
        let _guard = span.enter();
        tracing::info!("inside batch");
    }
}
