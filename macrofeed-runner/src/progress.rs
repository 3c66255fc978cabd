//! Progress callbacks for batch runs.

use crate::orchestrator::{BatchReport, FetchResult, Outcome};
use tracing::{info, warn};

/// Progress callback for multi-series batches.
///
/// Called from worker threads (`on_start`) and from the draining thread
/// (`on_complete`, `on_batch_complete`).
pub trait BatchProgress: Send + Sync {
    /// Called when a worker picks up an item.
    fn on_start(&self, source: &str, id: &str);

    /// Called as each result is drained, in completion order.
    fn on_complete(&self, source: &str, result: &FetchResult, done: usize, total: usize);

    /// Called once when every item has been drained.
    fn on_batch_complete(&self, source: &str, report: &BatchReport);
}

/// Reports through `tracing`.
pub struct TracingProgress;

impl BatchProgress for TracingProgress {
    fn on_start(&self, source: &str, id: &str) {
        info!(source, series = id, "fetching");
    }

    fn on_complete(&self, source: &str, result: &FetchResult, done: usize, total: usize) {
        match &result.outcome {
            Outcome::Success(_) => {
                info!(source, series = %result.table_name, done, total, "ok");
            }
            Outcome::Failure(kind) => {
                warn!(source, series = %result.table_name, done, total, "failed: {kind}");
            }
        }
    }

    fn on_batch_complete(&self, source: &str, report: &BatchReport) {
        info!(
            source,
            succeeded = report.succeeded(),
            failed = report.failed(),
            total = report.total(),
            "batch complete"
        );
    }
}

/// Discards every event.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn on_start(&self, _source: &str, _id: &str) {}
    fn on_complete(&self, _source: &str, _result: &FetchResult, _done: usize, _total: usize) {}
    fn on_batch_complete(&self, _source: &str, _report: &BatchReport) {}
}
