//! Concurrent batch orchestration.
//!
//! One generic orchestrator serves every provider: the fetch step is the
//! injected [`SeriesSource`], the rest of each task is the shared
//! [`Ingestor`] pipeline. Each batch gets a private rayon pool (never the
//! global one) sized by [`resolve_workers`].
//!
//! Results come back over an `mpsc` channel and are drained in completion
//! order. The draining loop wakes every [`POLL_INTERVAL`] so a cancel is seen
//! even while all workers are blocked on the network. A task that errors or
//! panics yields a failure entry for its own item only.

use crate::config::{IngestConfig, SeriesConfig};
use crate::logging::batch_span;
use crate::pipeline::{IngestError, Ingestor, Persisted};
use crate::progress::{BatchProgress, TracingProgress};
use crate::source::SeriesSource;
use crate::workers::resolve_workers;
use macrofeed_core::cancel::POLL_INTERVAL;
use macrofeed_core::{CancellationToken, FetchError};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that abort a whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch cancelled after {completed} of {total} items")]
    Cancelled { completed: usize, total: usize },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Why an item produced no persisted result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureKind {
    #[error("no known shape matched")]
    NoShapeMatched,

    #[error("{0}")]
    Fetch(FetchError),

    #[error("store: {0}")]
    Store(String),

    #[error("cancelled")]
    Cancelled,

    #[error("worker panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Persisted),
    Failure(FailureKind),
}

/// Result for one item of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub id: String,
    /// Target column or snapshot table.
    pub table_name: String,
    pub outcome: Outcome,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }
}

/// Every drained result of one batch, in completion order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub source: String,
    pub results: Vec<FetchResult>,
}

impl BatchReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            results: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// `table_name → persisted frame` for successful items.
    pub fn persisted(&self) -> HashMap<&str, &Persisted> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Success(p) => Some((r.table_name.as_str(), p)),
                Outcome::Failure(_) => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(&str, &FailureKind)> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Failure(kind) => Some((r.id.as_str(), kind)),
                Outcome::Success(_) => None,
            })
            .collect()
    }
}

pub struct Orchestrator {
    ingestor: Ingestor,
    workers: Option<usize>,
    progress: Arc<dyn BatchProgress>,
}

impl Orchestrator {
    pub fn new(ingestor: Ingestor) -> Self {
        Self {
            ingestor,
            workers: None,
            progress: Arc::new(TracingProgress),
        }
    }

    /// Explicit worker count; wins over environment and defaults.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn BatchProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Run one task per item and collect the results.
    ///
    /// Returns `Err(BatchError::Cancelled)` if `cancel` fires before every
    /// result has been consumed. Items that have not started by then are
    /// skipped; writes already committed stay committed.
    pub fn run(
        &self,
        source: Arc<dyn SeriesSource>,
        items: Vec<(String, SeriesConfig)>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let workers = resolve_workers(source.name(), source.kind(), self.workers);
        let _span = batch_span(source.name(), items.len(), workers).entered();
        info!(source = source.name(), items = items.len(), workers, "starting batch");

        let report = if workers <= 1 {
            self.run_inline(source.as_ref(), items, cancel)?
        } else {
            self.run_pooled(source, items, workers, cancel)?
        };

        self.progress.on_batch_complete(&report.source, &report);
        Ok(report)
    }

    /// Single-worker mode: same checkpoints, no pool.
    fn run_inline(
        &self,
        source: &dyn SeriesSource,
        items: Vec<(String, SeriesConfig)>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let total = items.len();
        let mut report = BatchReport::new(source.name());

        for (id, config) in items {
            if cancel.cancelled() {
                return Err(cancelled(source.name(), report.total(), total));
            }
            let result = run_task(&self.ingestor, self.progress.as_ref(), source, id, &config, cancel);
            if cancel.cancelled() {
                return Err(cancelled(source.name(), report.total(), total));
            }
            report.results.push(result);
            if let Some(last) = report.results.last() {
                self.progress.on_complete(source.name(), last, report.total(), total);
            }
        }
        Ok(report)
    }

    fn run_pooled(
        &self,
        source: Arc<dyn SeriesSource>,
        items: Vec<(String, SeriesConfig)>,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let total = items.len();
        let name = source.name().to_string();
        let mut report = BatchReport::new(&name);

        let thread_prefix = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("macrofeed-{thread_prefix}-{i}"))
            .build()
            .map_err(|e| BatchError::ThreadPool(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<FetchResult>();
        for (id, config) in items {
            let tx = tx.clone();
            let source = Arc::clone(&source);
            let ingestor = self.ingestor.clone();
            let progress = Arc::clone(&self.progress);
            let cancel = cancel.clone();
            pool.spawn(move || {
                // Not-yet-started items are dropped once the batch is cancelled.
                if cancel.cancelled() {
                    return;
                }
                let result = run_task(
                    &ingestor,
                    progress.as_ref(),
                    source.as_ref(),
                    id,
                    &config,
                    &cancel,
                );
                let _ = tx.send(result);
            });
        }
        drop(tx);

        loop {
            if cancel.cancelled() {
                return Err(cancelled(&name, report.total(), total));
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => {
                    if cancel.cancelled() {
                        return Err(cancelled(&name, report.total(), total));
                    }
                    report.results.push(result);
                    if let Some(last) = report.results.last() {
                        self.progress.on_complete(&name, last, report.total(), total);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(report)
    }

    /// Run every source named in `config` that has a registered
    /// implementation. Unknown source names are logged and skipped. The
    /// config's write flags and per-source worker counts apply.
    pub fn run_config(
        &self,
        config: &IngestConfig,
        sources: &[Arc<dyn SeriesSource>],
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchReport>, BatchError> {
        let mut reports = Vec::new();
        for name in config.sources() {
            let Some(source) = sources.iter().find(|s| s.name() == name) else {
                warn!(source = name, "no implementation registered, skipping");
                continue;
            };
            let orchestrator = Orchestrator {
                ingestor: self.ingestor.clone().with_policy(config.write.policy()),
                workers: config.workers_for(name).or(self.workers),
                progress: Arc::clone(&self.progress),
            };
            reports.push(orchestrator.run(Arc::clone(source), config.items_for(name), cancel)?);
        }
        Ok(reports)
    }
}

fn cancelled(source: &str, completed: usize, total: usize) -> BatchError {
    warn!(source, completed, total, "batch cancelled");
    BatchError::Cancelled { completed, total }
}

/// One item, with panics contained. The start callback runs inside the
/// guard too, since it is caller-supplied code on a pool thread.
fn run_task(
    ingestor: &Ingestor,
    progress: &dyn BatchProgress,
    source: &dyn SeriesSource,
    id: String,
    config: &SeriesConfig,
    cancel: &CancellationToken,
) -> FetchResult {
    let attempt = catch_unwind(AssertUnwindSafe(|| {
        progress.on_start(source.name(), &id);
        ingestor.ingest_one(source, &id, config, cancel)
    }));

    let outcome = match attempt {
        Ok(Ok(Some(persisted))) => Outcome::Success(persisted),
        Ok(Ok(None)) => Outcome::Failure(FailureKind::NoShapeMatched),
        Ok(Err(e)) => {
            error!(source = source.name(), series = %id, error = %e, "ingest failed");
            Outcome::Failure(match e {
                IngestError::Cancelled => FailureKind::Cancelled,
                IngestError::Fetch(f) => FailureKind::Fetch(f),
                IngestError::Store(s) => FailureKind::Store(s.to_string()),
            })
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(source = source.name(), series = %id, panic = %message, "worker panicked");
            Outcome::Failure(FailureKind::Panicked(message))
        }
    };

    FetchResult {
        id,
        table_name: config.name.clone(),
        outcome,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
