//! MacroFeed Core — cancellation, retrying fetch, shape normalization, relational store.
//!
//! This crate contains the ingestion engine:
//! - Cooperative cancellation token with polled sleeps
//! - Retry executor over a pluggable HTTP transport
//! - Raw provider tables and the ordered shape-normalization rules
//! - Calendar-complete `Time_Series` wide table and flat snapshot tables

pub mod cancel;
pub mod data;
pub mod fetch;
pub mod store;

pub use cancel::{CancellationToken, Cancelled};
pub use data::{CanonicalSeries, Cell, Normalizer, Observation, RawColumn, RawTable};
pub use fetch::{FetchError, RetryExecutor, RetryPolicy};
pub use store::{SnapshotStore, StorageContext, StoreError, TimeSeriesStore, WritePolicy};
