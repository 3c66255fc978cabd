//! Retrying executor for HTTP calls and provider fetch closures.
//!
//! Client errors in [`NON_RETRIABLE_STATUSES`] end the call immediately. Every
//! other failure is retried after a backoff sleep that polls the cancellation
//! token, so a cancel lands within one polling interval even mid-sleep.

use super::backoff::Backoff;
use super::http::{HttpRequest, HttpResponse, HttpTransport};
use super::FetchError;
use crate::cancel::CancellationToken;
use crate::data::RawTable;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Statuses that will never succeed on retry.
pub const NON_RETRIABLE_STATUSES: [u16; 8] = [400, 401, 403, 404, 405, 406, 410, 422];

/// Attempt budget, per-request timeout and delay schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_secs: 30,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub struct RetryExecutor {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryExecutor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. The token is checked before
    /// every attempt; a cancel never consumes an attempt.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Result<T, FetchError>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            self.cancel.raise_if_cancelled()?;

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) => {
                    warn!(target: "macrofeed::fetch", %label, attempt, max_attempts, error = %e, "attempt failed");
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.backoff.delay(attempt);
                debug!(target: "macrofeed::fetch", %label, ?delay, "backing off");
                self.cancel.sleep(delay)?;
            }
        }

        Err(FetchError::FetchFailed {
            attempts: max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".into()),
        })
    }

    /// Market-data flavour of [`run`](Self::run): an empty table counts as a
    /// transient failure and is retried.
    pub fn run_market_data<F>(&self, label: &str, mut op: F) -> Result<RawTable, FetchError>
    where
        F: FnMut(u32) -> Result<RawTable, FetchError>,
    {
        self.run(label, |attempt| {
            let table = op(attempt)?;
            if table.is_empty() {
                Err(FetchError::Transient(format!("empty result for {label}")))
            } else {
                Ok(table)
            }
        })
    }

    /// Send `request` with retries, classifying the response status.
    pub fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        self.run(&request.url, |_| self.attempt(request))
    }

    /// One exchange, no retry. Non-2xx statuses become errors classified as
    /// terminal or transient; a missing timeout takes the policy default.
    pub fn attempt(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let resp = if request.timeout.is_none() {
            let request = request.clone().timeout(self.policy.timeout());
            self.transport.send(&request)?
        } else {
            self.transport.send(request)?
        };
        if resp.is_success() {
            Ok(resp)
        } else if NON_RETRIABLE_STATUSES.contains(&resp.status) {
            Err(FetchError::NonRetriable {
                status: resp.status,
                url: request.url.clone(),
            })
        } else {
            Err(FetchError::Transient(format!(
                "HTTP {} for {}",
                resp.status, request.url
            )))
        }
    }

    pub fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, FetchError> {
        let request = query
            .iter()
            .fold(HttpRequest::get(url), |req, (k, v)| req.query(*k, *v));
        self.fetch(&request)
    }

    pub fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, FetchError> {
        let request = HttpRequest::post(url, body.to_string())
            .header("Content-Type", "application/json");
        self.fetch(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Cell;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    /// Transport that replays a fixed status and counts calls.
    struct ScriptedTransport {
        statuses: Mutex<Vec<u16>>,
        fallback: u16,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn always(status: u16) -> Self {
            Self::sequence(&[], status)
        }

        fn sequence(statuses: &[u16], fallback: u16) -> Self {
            let mut statuses = statuses.to_vec();
            statuses.reverse();
            Self {
                statuses: Mutex::new(statuses),
                fallback,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let status = self.statuses.lock().unwrap().pop().unwrap_or(self.fallback);
            Ok(HttpResponse {
                status,
                body: "{}".into(),
            })
        }
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            timeout_secs: 5,
            backoff: Backoff::fixed(Duration::from_millis(1)),
        }
    }

    fn executor(transport: Arc<ScriptedTransport>, policy: RetryPolicy) -> RetryExecutor {
        RetryExecutor::new(transport, policy, CancellationToken::new())
    }

    #[test]
    fn server_error_uses_full_budget() {
        let transport = Arc::new(ScriptedTransport::always(500));
        let exec = executor(transport.clone(), quick_policy(4));

        let err = exec.get("http://example.test/series", &[]).unwrap_err();
        assert_eq!(transport.calls(), 4);
        assert!(matches!(err, FetchError::FetchFailed { attempts: 4, .. }));
    }

    #[test]
    fn not_found_is_attempted_once() {
        let transport = Arc::new(ScriptedTransport::always(404));
        let exec = executor(transport.clone(), quick_policy(5));

        let err = exec.get("http://example.test/missing", &[]).unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert!(matches!(err, FetchError::NonRetriable { status: 404, .. }));
    }

    #[test]
    fn every_listed_client_error_is_terminal() {
        for status in NON_RETRIABLE_STATUSES {
            let transport = Arc::new(ScriptedTransport::always(status));
            let exec = executor(transport.clone(), quick_policy(3));
            assert!(exec.get("http://example.test", &[]).is_err());
            assert_eq!(transport.calls(), 1, "status {status}");
        }
    }

    #[test]
    fn too_many_requests_is_retried() {
        let transport = Arc::new(ScriptedTransport::sequence(&[429, 503], 200));
        let exec = executor(transport.clone(), quick_policy(3));

        let resp = exec.get("http://example.test", &[]).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn cancelled_before_first_attempt_makes_no_call() {
        let transport = Arc::new(ScriptedTransport::always(200));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let exec = RetryExecutor::new(transport.clone(), quick_policy(3), cancel);

        let err = exec.get("http://example.test", &[]).unwrap_err();
        assert_eq!(err, FetchError::Cancelled);
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn cancel_interrupts_long_backoff() {
        let transport = Arc::new(ScriptedTransport::always(500));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            timeout_secs: 5,
            backoff: Backoff::fixed(Duration::from_secs(5)),
        };
        let exec = RetryExecutor::new(transport.clone(), policy, cancel.clone());

        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });

        let started = Instant::now();
        let err = exec.get("http://example.test", &[]).unwrap_err();
        let elapsed = started.elapsed();
        handle.join().unwrap();

        assert_eq!(err, FetchError::Cancelled);
        assert_eq!(transport.calls(), 1);
        assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    }

    #[test]
    fn market_data_retries_empty_tables() {
        let exec = RetryExecutor::new(
            Arc::new(ScriptedTransport::always(200)),
            quick_policy(3),
            CancellationToken::new(),
        );

        let table = exec
            .run_market_data("SPY", |attempt| {
                if attempt < 3 {
                    Ok(RawTable::new())
                } else {
                    Ok(RawTable::new().with_column("Close", vec![Cell::Number(1.0)]))
                }
            })
            .unwrap();
        assert_eq!(table.height(), 1);
    }

    #[test]
    fn market_data_exhausts_on_persistently_empty() {
        let exec = RetryExecutor::new(
            Arc::new(ScriptedTransport::always(200)),
            quick_policy(2),
            CancellationToken::new(),
        );
        let mut calls = 0;
        let err = exec
            .run_market_data("SPY", |_| {
                calls += 1;
                Ok(RawTable::new())
            })
            .unwrap_err();
        assert_eq!(calls, 2);
        assert!(matches!(err, FetchError::FetchFailed { attempts: 2, .. }));
    }

    /// Records the last request it saw.
    struct Recorder {
        last: Mutex<Option<HttpRequest>>,
    }

    impl HttpTransport for Recorder {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(HttpResponse {
                status: 200,
                body: r#"{"ok":true}"#.into(),
            })
        }
    }

    #[test]
    fn post_json_sends_body_and_default_timeout() {
        let recorder = Arc::new(Recorder {
            last: Mutex::new(None),
        });
        let exec = RetryExecutor::new(recorder.clone(), quick_policy(2), CancellationToken::new());

        let resp = exec
            .post_json("http://example.test/query", &serde_json::json!({"series": ["CPI"]}))
            .unwrap();
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["ok"], true);

        let sent = recorder.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.method, crate::fetch::Method::Post);
        assert_eq!(sent.body.as_deref(), Some(r#"{"series":["CPI"]}"#));
        assert!(sent
            .headers
            .contains(&("Content-Type".to_string(), "application/json".to_string())));
        assert_eq!(sent.timeout, Some(Duration::from_secs(5)));
    }
}
