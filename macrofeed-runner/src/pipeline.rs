//! One series, start to finish: fetch → clean → normalize → store.

use crate::config::SeriesConfig;
use crate::source::{Persistence, SeriesSource};
use chrono::NaiveDate;
use macrofeed_core::data::{forward_fill_raw, percent_change};
use macrofeed_core::{
    CancellationToken, Cancelled, CanonicalSeries, FetchError, Normalizer, RawTable,
    SnapshotStore, StorageContext, StoreError, TimeSeriesStore, WritePolicy,
};
use thiserror::Error;
use tracing::{debug, info};

/// Per-item failure. Only `Cancelled` is allowed to stop a batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    #[error("store failed: {0}")]
    Store(StoreError),
}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}

impl From<Cancelled> for IngestError {
    fn from(_: Cancelled) -> Self {
        IngestError::Cancelled
    }
}

impl From<FetchError> for IngestError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Cancelled => IngestError::Cancelled,
            other => IngestError::Fetch(other),
        }
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Cancelled => IngestError::Cancelled,
            other => IngestError::Store(other),
        }
    }
}

/// What a successful item left in the database.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    /// The stored (date, value) window of a `Time_Series` column.
    Series(CanonicalSeries),
    /// Full contents of a snapshot table after the write.
    Snapshot(RawTable),
}

impl Persisted {
    pub fn as_series(&self) -> Option<&CanonicalSeries> {
        match self {
            Persisted::Series(s) => Some(s),
            Persisted::Snapshot(_) => None,
        }
    }

    pub fn as_snapshot(&self) -> Option<&RawTable> {
        match self {
            Persisted::Snapshot(t) => Some(t),
            Persisted::Series(_) => None,
        }
    }
}

/// Stateless per-item driver; cheap to clone into worker closures.
#[derive(Debug, Clone)]
pub struct Ingestor {
    ctx: StorageContext,
    default_start: NaiveDate,
    policy: WritePolicy,
}

impl Ingestor {
    pub fn new(ctx: StorageContext, default_start: NaiveDate) -> Self {
        Self {
            ctx,
            default_start,
            policy: WritePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    /// Run one item. `Ok(None)` means the raw result matched no known shape;
    /// nothing was written.
    pub fn ingest_one(
        &self,
        source: &dyn SeriesSource,
        id: &str,
        config: &SeriesConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<Persisted>, IngestError> {
        cancel.raise_if_cancelled()?;
        let raw = source.fetch(id, config, cancel)?;
        // A cancel that lands during the fetch must not reach the store.
        cancel.raise_if_cancelled()?;

        let raw = if config.needs_cleaning {
            forward_fill_raw(&raw)
        } else {
            raw
        };

        match source.persistence() {
            Persistence::Snapshot { date_column } => {
                let table = SnapshotStore::new(self.ctx.clone()).write(
                    &config.name,
                    &raw,
                    date_column.as_deref(),
                )?;
                info!(series = id, table = %config.name, rows = table.height(), "snapshot stored");
                Ok(Some(Persisted::Snapshot(table)))
            }
            Persistence::TimeSeries => {
                let Some((rule, series)) = Normalizer::normalize_traced(&raw, &config.name) else {
                    info!(series = id, source = source.name(), "no known shape matched, nothing stored");
                    return Ok(None);
                };
                debug!(series = id, rule, points = series.len(), "normalized");

                let series = if config.needs_pct {
                    percent_change(&series)
                } else {
                    series
                };
                let start = config.start_date.unwrap_or(self.default_start);
                let persisted = TimeSeriesStore::new(self.ctx.clone()).write(
                    &series,
                    &config.name,
                    start,
                    self.policy,
                )?;
                info!(series = id, column = %config.name, rows = persisted.len(), "series stored");
                Ok(Some(Persisted::Series(persisted)))
            }
        }
    }
}
