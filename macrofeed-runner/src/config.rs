//! Serializable ingest configuration.
//!
//! One TOML file describes the database, the retry policy, per-source worker
//! counts and the list of series:
//!
//! ```toml
//! database = "data/macro.db"
//! default_start = "2000-01-01"
//!
//! [retry]
//! max_attempts = 4
//!
//! [workers]
//! fred = 8
//!
//! [[series]]
//! id = "us_cpi"
//! source = "fred"
//! name = "US_CPI"
//! code = "CPIAUCSL"
//! needs_pct = true
//! ```

use chrono::NaiveDate;
use macrofeed_core::store::validate_identifier;
use macrofeed_core::{RetryPolicy, WritePolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Addressing and post-processing flags for one series.
///
/// `name` is the canonical output column (or table, for snapshot sources).
/// Sources read whichever addressing fields they need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    pub name: String,
    pub code: Option<String>,
    pub category: Option<String>,
    pub frequency: Option<String>,
    pub url: Option<String>,
    /// Convert levels into period-over-period percentage growth.
    pub needs_pct: bool,
    /// Forward-fill gaps inside the provider's own table before normalizing.
    pub needs_cleaning: bool,
    /// Overrides the config-wide default start.
    pub start_date: Option<NaiveDate>,
    pub params: BTreeMap<String, String>,
}

impl SeriesConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A `[[series]]` entry: batch id, owning source, and the series itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub id: String,
    pub source: String,
    #[serde(flatten)]
    pub config: SeriesConfig,
}

/// How existing stored values are treated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteFlags {
    pub overwrite_existing: bool,
    pub only_fill_null: bool,
}

impl Default for WriteFlags {
    fn default() -> Self {
        Self {
            overwrite_existing: true,
            only_fill_null: false,
        }
    }
}

impl WriteFlags {
    pub fn policy(&self) -> WritePolicy {
        WritePolicy::from_flags(self.overwrite_existing, self.only_fill_null)
    }
}

fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

/// Top-level ingest configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// SQLite database file.
    pub database: PathBuf,

    /// Start date for series without their own `start_date`.
    #[serde(default = "default_start")]
    pub default_start: NaiveDate,

    #[serde(default)]
    pub write: WriteFlags,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Explicit worker count per source name.
    #[serde(default)]
    pub workers: BTreeMap<String, usize>,

    #[serde(default)]
    pub series: Vec<SeriesEntry>,
}

impl IngestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Series names must be usable as column identifiers and ids must be unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        let mut ids = HashSet::new();
        for entry in &self.series {
            if !ids.insert(entry.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate series id '{}'", entry.id)));
            }
            if entry.source.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("series '{}' has no source", entry.id)));
            }
            validate_identifier(&entry.config.name).map_err(|e| {
                ConfigError::Invalid(format!("series '{}': {e}", entry.id))
            })?;
        }
        Ok(())
    }

    /// Distinct source names, in first-seen order.
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for entry in &self.series {
            if !seen.contains(&entry.source.as_str()) {
                seen.push(entry.source.as_str());
            }
        }
        seen
    }

    /// Batch input for one source: `(id, config)` pairs in file order.
    pub fn items_for(&self, source: &str) -> Vec<(String, SeriesConfig)> {
        self.series
            .iter()
            .filter(|e| e.source == source)
            .map(|e| (e.id.clone(), e.config.clone()))
            .collect()
    }

    pub fn workers_for(&self, source: &str) -> Option<usize> {
        self.workers.get(source).copied().filter(|n| *n > 0)
    }
}
