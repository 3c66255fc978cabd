//! Shape detection: turn any provider table into a canonical series.
//!
//! Detection is an explicit, ordered table of rules. Each rule pairs a
//! predicate over the raw table with a transform producing dated values.
//! Rules are evaluated top to bottom and the first match wins, so a new
//! shape is added by inserting a row, never by editing an existing branch.
//!
//! Every transform output goes through the same post-processing: rows with
//! unparsable dates are dropped, duplicate dates keep the last occurrence, and
//! the result is sorted by date. A result with no dated value is treated as
//! "no match".

use super::canonical::CanonicalSeries;
use super::dates::{
    first_of_following_month, month_token_stamp, parse_date, parse_iso, quarter_stamp,
    triple_period_stamp, year_end,
};
use super::raw::{Cell, RawColumn, RawTable};
use chrono::{Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Rows produced by a transform before post-processing.
type Rows = Vec<(Option<NaiveDate>, Option<f64>)>;

/// One entry of the dispatch table.
pub struct Rule {
    pub name: &'static str,
    matches: fn(&RawTable) -> bool,
    transform: fn(&RawTable) -> Rows,
}

/// Evaluation order is significant.
static RULES: [Rule; 9] = [
    Rule {
        name: "annual",
        matches: is_annual,
        transform: annual,
    },
    Rule {
        name: "quarterly",
        matches: is_quarterly,
        transform: quarterly,
    },
    Rule {
        name: "monthly_period_code",
        matches: is_monthly_code,
        transform: monthly_code,
    },
    Rule {
        name: "ohlcv",
        matches: is_ohlcv,
        transform: ohlcv,
    },
    Rule {
        name: "pre_dated",
        matches: is_pre_dated,
        transform: pre_dated,
    },
    Rule {
        name: "year_period_value",
        matches: is_year_period_value,
        transform: year_period_value,
    },
    Rule {
        name: "month_token",
        matches: is_month_token,
        transform: month_token,
    },
    Rule {
        name: "dated_fallback",
        matches: has_date_column,
        transform: dated_fallback,
    },
    Rule {
        name: "index_fallback",
        matches: always,
        transform: index_fallback,
    },
];

/// Column names treated as carrying dates.
const DATE_COLUMN_NAMES: [&str; 4] = ["date", "datetime", "timestamp", "time"];

pub struct Normalizer;

impl Normalizer {
    /// Rule names in evaluation order.
    pub fn rule_names() -> Vec<&'static str> {
        RULES.iter().map(|r| r.name).collect()
    }

    /// Normalize `raw` into a series named `series_name`, or `None` when no
    /// shape yields a usable (date, value) pair.
    pub fn normalize(raw: &RawTable, series_name: &str) -> Option<CanonicalSeries> {
        Self::normalize_traced(raw, series_name).map(|(_, series)| series)
    }

    /// Like [`normalize`](Self::normalize) but also reports the matching rule.
    pub fn normalize_traced(
        raw: &RawTable,
        series_name: &str,
    ) -> Option<(&'static str, CanonicalSeries)> {
        if raw.is_empty() {
            debug!(series = series_name, "empty input, nothing to normalize");
            return None;
        }

        let rule = RULES.iter().find(|r| (r.matches)(raw))?;
        let rows = (rule.transform)(raw);
        let series = finish(rows, series_name);

        if series.observed_count() == 0 {
            debug!(series = series_name, rule = rule.name, "matched shape produced no usable rows");
            return None;
        }
        debug!(series = series_name, rule = rule.name, rows = series.len(), "normalized");
        Some((rule.name, series))
    }
}

fn finish(rows: Rows, series_name: &str) -> CanonicalSeries {
    CanonicalSeries::new(
        series_name,
        rows.into_iter()
            .filter_map(|(date, value)| date.map(|d| (d, value))),
    )
}

// ── Patterns ─────────────────────────────────────────────────────────

fn pattern(cell: &'static OnceLock<Regex>, src: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(src).unwrap_or_else(|e| panic!("invalid pattern {src}: {e}")))
}

fn annual_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"^\d{4}$")
}

fn quarterly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"^(\d{4})Q([1-4])$")
}

fn monthly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"^(\d{4})M(\d{2})$")
}

fn iso_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"^\d{4}-\d{2}-\d{2}")
}

fn month_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"^[A-Za-z]{3,9}_\d{4}$")
}

// ── Helpers ──────────────────────────────────────────────────────────

fn labels_all_match(raw: &RawTable, re: &Regex) -> bool {
    match &raw.labels {
        Some(labels) if !labels.is_empty() => labels.iter().all(|l| re.is_match(l.trim())),
        _ => false,
    }
}

fn date_column_index(raw: &RawTable) -> Option<usize> {
    raw.columns.iter().position(|c| {
        DATE_COLUMN_NAMES
            .iter()
            .any(|n| c.name.trim().eq_ignore_ascii_case(n))
    })
}

/// Non-null text values of a column.
fn texts(column: &RawColumn) -> impl Iterator<Item = String> + '_ {
    column.cells.iter().filter_map(Cell::as_text)
}

fn column_values_match(column: &RawColumn, re: &Regex) -> bool {
    let mut any = false;
    for text in texts(column) {
        if !re.is_match(&text) {
            return false;
        }
        any = true;
    }
    any
}

/// First column other than `skip`, used as the value column.
fn first_value_column(raw: &RawTable, skip: Option<usize>) -> Option<&RawColumn> {
    raw.columns
        .iter()
        .enumerate()
        .find(|(i, _)| Some(*i) != skip)
        .map(|(_, c)| c)
}

fn labelled_rows(raw: &RawTable, stamp: impl Fn(&str) -> Option<NaiveDate>) -> Rows {
    let labels = raw.labels.as_deref().unwrap_or_default();
    let values = raw.columns.first();
    labels
        .iter()
        .enumerate()
        .map(|(row, label)| {
            let value = values.and_then(|c| c.cells.get(row)).and_then(Cell::as_f64);
            (stamp(label.trim()), value)
        })
        .collect()
}

fn dated_rows(
    date_column: &RawColumn,
    value_column: Option<&RawColumn>,
    stamp: impl Fn(&str) -> Option<NaiveDate>,
) -> Rows {
    date_column
        .cells
        .iter()
        .enumerate()
        .map(|(row, cell)| {
            let date = cell.as_text().and_then(|t| stamp(&t));
            let value = value_column
                .and_then(|c| c.cells.get(row))
                .and_then(Cell::as_f64);
            (date, value)
        })
        .collect()
}

// ── Rules 1–3: period-coded row labels ───────────────────────────────

fn is_annual(raw: &RawTable) -> bool {
    labels_all_match(raw, annual_re())
}

fn annual(raw: &RawTable) -> Rows {
    labelled_rows(raw, |label| label.parse().ok().and_then(year_end))
}

fn is_quarterly(raw: &RawTable) -> bool {
    labels_all_match(raw, quarterly_re())
}

fn quarterly(raw: &RawTable) -> Rows {
    labelled_rows(raw, |label| {
        let caps = quarterly_re().captures(label)?;
        quarter_stamp(caps[1].parse().ok()?, caps[2].parse().ok()?)
    })
}

fn is_monthly_code(raw: &RawTable) -> bool {
    labels_all_match(raw, monthly_re())
}

fn monthly_code(raw: &RawTable) -> Rows {
    labelled_rows(raw, |label| {
        let caps = monthly_re().captures(label)?;
        first_of_following_month(caps[1].parse().ok()?, caps[2].parse().ok()?)
    })
}

// ── Rule 4: OHLCV bars ───────────────────────────────────────────────

fn is_ohlcv(raw: &RawTable) -> bool {
    ["open", "high", "low", "close", "volume"]
        .iter()
        .all(|name| raw.column_ci(name).is_some())
}

fn ohlcv(raw: &RawTable) -> Rows {
    let close = raw.column_ci("close");
    match &raw.labels {
        Some(labels) => labels
            .iter()
            .enumerate()
            .map(|(row, label)| {
                let value = close.and_then(|c| c.cells.get(row)).and_then(Cell::as_f64);
                (parse_date(label), value)
            })
            .collect(),
        None => match date_column_index(raw) {
            Some(i) => dated_rows(&raw.columns[i], close, parse_date),
            None => Vec::new(),
        },
    }
}

// ── Rule 5: already dated ────────────────────────────────────────────

fn is_pre_dated(raw: &RawTable) -> bool {
    match date_column_index(raw) {
        Some(i) => raw.columns.len() > 1 && column_values_match(&raw.columns[i], iso_like_re()),
        None => false,
    }
}

fn pre_dated(raw: &RawTable) -> Rows {
    let Some(i) = date_column_index(raw) else {
        return Vec::new();
    };
    dated_rows(&raw.columns[i], first_value_column(raw, Some(i)), parse_date)
}

// ── Rule 6: year / period / value triples ────────────────────────────

fn is_year_period_value(raw: &RawTable) -> bool {
    let mut names: Vec<String> = raw.columns.iter().map(|c| c.name.to_lowercase()).collect();
    names.sort();
    names == ["period", "value", "year"] || names == ["mom_growth", "period", "year"]
}

fn year_period_value(raw: &RawTable) -> Rows {
    let (Some(year), Some(period)) = (raw.column_ci("year"), raw.column_ci("period")) else {
        return Vec::new();
    };
    let value = raw.column_ci("value").or_else(|| raw.column_ci("MoM_growth"));

    year.cells
        .iter()
        .zip(&period.cells)
        .enumerate()
        .map(|(row, (y, p))| {
            let date = y
                .as_f64()
                .and_then(|y| p.as_text().and_then(|p| triple_period_stamp(y as i32, &p)));
            let v = value.and_then(|c| c.cells.get(row)).and_then(Cell::as_f64);
            (date, v)
        })
        .collect()
}

// ── Rule 7: Mon_YYYY tokens ──────────────────────────────────────────

fn is_month_token(raw: &RawTable) -> bool {
    date_column_index(raw).is_some_and(|i| column_values_match(&raw.columns[i], month_token_re()))
}

fn month_token(raw: &RawTable) -> Rows {
    let Some(i) = date_column_index(raw) else {
        return Vec::new();
    };
    dated_rows(&raw.columns[i], first_value_column(raw, Some(i)), month_token_stamp)
}

// ── Rules 8–9: fallbacks ─────────────────────────────────────────────

fn has_date_column(raw: &RawTable) -> bool {
    date_column_index(raw).is_some()
}

fn dated_fallback(raw: &RawTable) -> Rows {
    let Some(i) = date_column_index(raw) else {
        return Vec::new();
    };
    dated_rows(&raw.columns[i], first_value_column(raw, Some(i)), parse_date)
}

fn always(_: &RawTable) -> bool {
    true
}

/// Dates come from the row labels; without labels, row positions count days
/// from the Unix epoch.
fn index_fallback(raw: &RawTable) -> Rows {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    let values = raw.columns.first();
    (0..raw.height())
        .map(|row| {
            let date = match &raw.labels {
                Some(labels) => labels.get(row).and_then(|l| parse_date(l)),
                None => Some(epoch + Duration::days(row as i64)),
            };
            let value = values.and_then(|c| c.cells.get(row)).and_then(Cell::as_f64);
            (date, value)
        })
        .collect()
}

/// Whether `text` is a strict ISO date; used by callers validating output.
pub fn is_iso_date(text: &str) -> bool {
    parse_iso(text).is_some() && text.len() == 10
}
