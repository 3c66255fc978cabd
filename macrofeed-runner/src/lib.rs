//! MacroFeed Runner — series sources, ingest pipeline, concurrent batches, configuration.
//!
//! This crate builds on `macrofeed-core` to provide:
//! - The `SeriesSource` fetch strategy (HTTP/JSON providers, closure adapters)
//! - The per-item pipeline: fetch, clean, normalize, store
//! - A generic orchestrator running each source on a private bounded pool
//! - Worker-count resolution from explicit values, environment and defaults
//! - TOML configuration and logging initialisation

pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod workers;

pub use config::{ConfigError, IngestConfig, SeriesConfig, SeriesEntry, WriteFlags};
pub use logging::{init_logging, LogFormat};
pub use orchestrator::{BatchError, BatchReport, FailureKind, FetchResult, Orchestrator, Outcome};
pub use pipeline::{IngestError, Ingestor, Persisted};
pub use progress::{BatchProgress, SilentProgress, TracingProgress};
pub use source::{FnSource, HttpSource, Persistence, SeriesSource, SourceKind};
pub use workers::{default_workers, resolve_workers};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn orchestrator_parts_are_send_sync() {
        assert_send::<Ingestor>();
        assert_sync::<Ingestor>();
        assert_send::<FnSource>();
        assert_sync::<FnSource>();
        assert_send::<HttpSource>();
        assert_sync::<HttpSource>();
        assert_send::<FetchResult>();
        assert_send::<BatchReport>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<IngestConfig>();
        assert_sync::<IngestConfig>();
        assert_send::<SeriesConfig>();
        assert_sync::<SeriesConfig>();
    }
}
