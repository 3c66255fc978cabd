//! Network fetch layer: HTTP transport, backoff schedules, and the retrying executor.
//!
//! The transport is a trait so providers can be mocked in tests; the retry
//! executor sits above it and knows nothing about any particular provider.

pub mod backoff;
pub mod http;
pub mod retry;

pub use backoff::Backoff;
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use retry::{RetryExecutor, RetryPolicy, NON_RETRIABLE_STATUSES};

use crate::cancel::Cancelled;
use thiserror::Error;

/// Structured error types for fetch operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("request rejected with HTTP {status}: {url}")]
    NonRetriable { status: u16, url: String },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response could not be decoded: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("gave up after {attempts} attempts: {last}")]
    FetchFailed { attempts: u32, last: String },
}

impl FetchError {
    /// Whether the retry executor may try again after this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FetchError::Transient(_) | FetchError::Transport(_) | FetchError::Decode(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<Cancelled> for FetchError {
    fn from(_: Cancelled) -> Self {
        FetchError::Cancelled
    }
}
