//! Delay schedules between retry attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long to wait before the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// `base_ms * factor^(retry - 1)`, stretched by up to `jitter` (fraction), capped at `max_ms`.
    Exponential {
        base_ms: u64,
        factor: f64,
        jitter: f64,
        max_ms: u64,
    },
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base_ms: 1_000,
            factor: 2.0,
            jitter: 0.25,
            max_ms: 60_000,
        }
    }
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Exponential schedule without jitter.
    pub fn exponential(base: Duration, factor: f64) -> Self {
        Backoff::Exponential {
            base_ms: base.as_millis() as u64,
            factor,
            jitter: 0.0,
            max_ms: 60_000,
        }
    }

    /// Delay before retry number `retry` (1 = the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                base_ms,
                factor,
                jitter,
                max_ms,
            } => {
                let exponent = retry.saturating_sub(1) as i32;
                let mut ms = base_ms as f64 * factor.max(1.0).powi(exponent);
                if jitter > 0.0 {
                    ms *= 1.0 + rand::thread_rng().gen_range(0.0..=jitter);
                }
                Duration::from_millis(ms.min(max_ms as f64) as u64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let b = Backoff::fixed(Duration::from_millis(250));
        assert_eq!(b.delay(1), Duration::from_millis(250));
        assert_eq!(b.delay(7), Duration::from_millis(250));
    }

    #[test]
    fn exponential_doubles() {
        let b = Backoff::exponential(Duration::from_millis(100), 2.0);
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn exponential_respects_cap() {
        let b = Backoff::Exponential {
            base_ms: 1_000,
            factor: 2.0,
            jitter: 0.0,
            max_ms: 3_000,
        };
        assert_eq!(b.delay(10), Duration::from_millis(3_000));
    }

    #[test]
    fn jitter_only_stretches() {
        let b = Backoff::Exponential {
            base_ms: 100,
            factor: 2.0,
            jitter: 0.5,
            max_ms: 60_000,
        };
        for _ in 0..50 {
            let d = b.delay(2).as_millis();
            assert!((200..=300).contains(&d), "delay {d}ms out of range");
        }
    }

    #[test]
    fn deserializes_from_toml_style_tag() {
        let b: Backoff = serde_json::from_str(r#"{"type":"fixed","delay_ms":500}"#).unwrap();
        assert_eq!(b, Backoff::Fixed { delay_ms: 500 });
    }
}
