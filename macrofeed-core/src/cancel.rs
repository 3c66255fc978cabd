//! Cooperative cancellation flag shared between a batch and its workers.
//!
//! Cancellation never interrupts blocking I/O in flight. It only takes effect
//! at checkpoints the running code polls: loop heads, sleep slices, and the
//! boundary after each fetch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Granularity at which [`CancellationToken::sleep`] re-checks the flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Raised at a checkpoint once the token has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Thread-safe abort flag. Clones share the same flag; once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Calling this more than once is harmless.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint: fail with [`Cancelled`] if the flag is set.
    pub fn raise_if_cancelled(&self) -> Result<(), Cancelled> {
        if self.cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking every [`POLL_INTERVAL`] to check the flag.
    ///
    /// Returns `Err(Cancelled)` within roughly one polling interval of
    /// cancellation instead of waiting out the whole duration.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;
        loop {
            self.raise_if_cancelled()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.cancelled());
        assert!(token.raise_if_cancelled().is_ok());
    }

    #[test]
    fn cancel_is_idempotent_and_sticky() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.cancelled());
        assert_eq!(token.raise_if_cancelled(), Err(Cancelled));
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.cancelled());
    }

    #[test]
    fn sleep_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(30)).is_ok());
    }

    #[test]
    fn sleep_wakes_promptly_on_cancel() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            remote.cancel();
        });

        let started = Instant::now();
        let result = token.sleep(Duration::from_secs(5));
        let elapsed = started.elapsed();
        handle.join().unwrap();

        assert_eq!(result, Err(Cancelled));
        assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    }
}
