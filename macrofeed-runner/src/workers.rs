//! Worker-count resolution: explicit value, then environment, then source default.

use crate::source::SourceKind;
use tracing::warn;

/// Global override, applied when no source-specific variable is set.
pub const WORKERS_ENV: &str = "MACROFEED_WORKERS";

const MAX_API_WORKERS: usize = 16;
const BROWSER_WORKERS: usize = 2;

/// Default pool size for a kind of source.
pub fn default_workers(kind: SourceKind) -> usize {
    match kind {
        SourceKind::Api => {
            let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
            (cores * 2).clamp(2, MAX_API_WORKERS)
        }
        SourceKind::Browser => BROWSER_WORKERS,
        SourceKind::Serial => 1,
    }
}

/// `MACROFEED_WORKERS_<SOURCE>` with the name upper-cased and anything
/// outside `[A-Z0-9]` turned into `_`.
pub fn source_env_var(source: &str) -> String {
    let suffix: String = source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{WORKERS_ENV}_{suffix}")
}

pub fn resolve_workers(source: &str, kind: SourceKind, explicit: Option<usize>) -> usize {
    resolve_workers_with(source, kind, explicit, |key| std::env::var(key).ok())
}

/// Same as [`resolve_workers`] with an injectable environment lookup.
pub fn resolve_workers_with(
    source: &str,
    kind: SourceKind,
    explicit: Option<usize>,
    env: impl Fn(&str) -> Option<String>,
) -> usize {
    if let Some(n) = explicit.filter(|n| *n > 0) {
        return n;
    }
    for key in [source_env_var(source), WORKERS_ENV.to_string()] {
        let Some(raw) = env(&key) else {
            continue;
        };
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => return n,
            _ => warn!(var = %key, value = %raw, "ignoring invalid worker count"),
        }
    }
    default_workers(kind)
}
