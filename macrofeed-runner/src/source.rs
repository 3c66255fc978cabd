//! Series sources: the fetch strategy injected into the orchestrator.
//!
//! A source knows how to turn one [`SeriesConfig`] into a [`RawTable`]. It
//! does not normalize or store anything; the pipeline sits above it.

use crate::config::SeriesConfig;
use macrofeed_core::fetch::{HttpRequest, HttpTransport};
use macrofeed_core::{CancellationToken, FetchError, RawTable, RetryExecutor, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Determines the default pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Plain HTTP APIs; scale with the machine.
    Api,
    /// Headless-browser scrapers; each worker is expensive.
    Browser,
    /// Providers that tolerate one request at a time.
    Serial,
}

/// Where a source's results end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    /// Normalized into a column of the `Time_Series` table.
    TimeSeries,
    /// Stored as-is in a table named after the series.
    Snapshot { date_column: Option<String> },
}

pub trait SeriesSource: Send + Sync {
    /// Human-readable name; also used for worker-count overrides.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    fn persistence(&self) -> Persistence {
        Persistence::TimeSeries
    }

    /// Fetch the raw table for one series. Implementations should check
    /// `cancel` at every loop head and sleep through it.
    fn fetch(
        &self,
        id: &str,
        config: &SeriesConfig,
        cancel: &CancellationToken,
    ) -> Result<RawTable, FetchError>;
}

type FetchFn =
    dyn Fn(&str, &SeriesConfig, &CancellationToken) -> Result<RawTable, FetchError> + Send + Sync;

/// Adapts a closure into a [`SeriesSource`]. Scrapers and tests use this.
pub struct FnSource {
    name: String,
    kind: SourceKind,
    persistence: Persistence,
    fetch: Box<FetchFn>,
}

impl FnSource {
    pub fn new<F>(name: impl Into<String>, kind: SourceKind, fetch: F) -> Self
    where
        F: Fn(&str, &SeriesConfig, &CancellationToken) -> Result<RawTable, FetchError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            kind,
            persistence: Persistence::TimeSeries,
            fetch: Box::new(fetch),
        }
    }

    pub fn snapshot(mut self, date_column: Option<&str>) -> Self {
        self.persistence = Persistence::Snapshot {
            date_column: date_column.map(String::from),
        };
        self
    }
}

impl SeriesSource for FnSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn persistence(&self) -> Persistence {
        self.persistence.clone()
    }

    fn fetch(
        &self,
        id: &str,
        config: &SeriesConfig,
        cancel: &CancellationToken,
    ) -> Result<RawTable, FetchError> {
        (self.fetch)(id, config, cancel)
    }
}

/// JSON-over-HTTP provider returning an array of flat records.
///
/// The request URL is the series `url`, or the source's `base_url` when the
/// series only carries a `code`. The code, frequency and category travel as
/// query parameters together with every entry of `params`.
pub struct HttpSource {
    name: String,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    base_url: Option<String>,
    code_param: String,
    api_key: Option<(String, String)>,
    records_pointer: Option<String>,
    market_data: bool,
}

impl HttpSource {
    pub fn new(name: impl Into<String>, transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            transport,
            policy,
            base_url: None,
            code_param: "series_id".into(),
            api_key: None,
            records_pointer: None,
            market_data: false,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_code_param(mut self, param: impl Into<String>) -> Self {
        self.code_param = param.into();
        self
    }

    /// Sent verbatim as the `param` query parameter. Empty keys are passed
    /// through; the provider decides whether to reject them.
    pub fn with_api_key(mut self, param: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_key = Some((param.into(), key.into()));
        self
    }

    /// JSON pointer (e.g. `/observations`) to the records array.
    pub fn with_records_at(mut self, pointer: impl Into<String>) -> Self {
        self.records_pointer = Some(pointer.into());
        self
    }

    /// Treat an empty record set as a transient failure.
    pub fn market_data(mut self) -> Self {
        self.market_data = true;
        self
    }

    fn request(&self, config: &SeriesConfig) -> Result<HttpRequest, FetchError> {
        let url = config
            .url
            .clone()
            .or_else(|| self.base_url.clone())
            .ok_or_else(|| {
                FetchError::InvalidRequest(format!(
                    "series '{}' has no url and source has no base url",
                    config.name
                ))
            })?;

        let mut request = HttpRequest::get(url).timeout(self.policy.timeout());
        if let Some(code) = &config.code {
            request = request.query(self.code_param.as_str(), code.as_str());
        }
        if let Some(frequency) = &config.frequency {
            request = request.query("frequency", frequency.as_str());
        }
        if let Some(category) = &config.category {
            request = request.query("category", category.as_str());
        }
        for (key, value) in &config.params {
            request = request.query(key.as_str(), value.as_str());
        }
        if let Some((param, key)) = &self.api_key {
            request = request.query(param.as_str(), key.as_str());
        }
        Ok(request)
    }

    fn decode(&self, body: &serde_json::Value) -> Result<RawTable, FetchError> {
        let records = match &self.records_pointer {
            Some(pointer) => body
                .pointer(pointer)
                .ok_or_else(|| FetchError::Decode(format!("no records at {pointer}")))?,
            None => body,
        };
        RawTable::from_json_records(records)
            .ok_or_else(|| FetchError::Decode("expected an array of objects".into()))
    }
}

impl SeriesSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    fn fetch(
        &self,
        id: &str,
        config: &SeriesConfig,
        cancel: &CancellationToken,
    ) -> Result<RawTable, FetchError> {
        let request = self.request(config)?;
        let executor = RetryExecutor::new(Arc::clone(&self.transport), self.policy.clone(), cancel.clone());
        let label = format!("{}/{id}", self.name);
        debug!(source = %self.name, series = id, url = %request.url, "fetching");

        let once = |_attempt: u32| {
            let resp = executor.attempt(&request)?;
            let body: serde_json::Value = resp.json()?;
            self.decode(&body)
        };
        if self.market_data {
            executor.run_market_data(&label, once)
        } else {
            executor.run(&label, once)
        }
    }
}
