//! Every supported provider shape normalizes to a two-column, ISO-dated,
//! duplicate-free series, and is picked up by the expected rule.

use macrofeed_core::data::normalize::is_iso_date;
use macrofeed_core::{Cell, Normalizer, RawTable};
use polars::prelude::*;
use std::collections::HashSet;

fn check(raw: &RawTable, expected_rule: &str, expected: &[(&str, f64)]) {
    let (rule, series) = Normalizer::normalize_traced(raw, "series_x")
        .unwrap_or_else(|| panic!("no rule matched, expected {expected_rule}"));
    assert_eq!(rule, expected_rule);
    assert_eq!(series.name(), "series_x");

    let rows = series.iso_rows();
    let dates: HashSet<_> = rows.iter().map(|(d, _)| d.clone()).collect();
    assert_eq!(dates.len(), rows.len(), "duplicate dates in {rule}");
    assert!(rows.iter().all(|(d, _)| is_iso_date(d)));

    let got: Vec<(String, Option<f64>)> = rows;
    let want: Vec<(String, Option<f64>)> = expected
        .iter()
        .map(|(d, v)| (d.to_string(), Some(*v)))
        .collect();
    assert_eq!(got, want, "rule {rule}");

    let df = series.to_dataframe().unwrap();
    assert_eq!(df.width(), 2);
    assert_eq!(df.get_columns()[0].name().as_str(), "date");
    assert_eq!(df.get_columns()[1].name().as_str(), "series_x");
}

#[test]
fn annual_labels() {
    let raw = RawTable::new()
        .with_labels(["2019", "2020"])
        .with_column("OBS_VALUE", [1.0, 2.0]);
    check(&raw, "annual", &[("2019-12-31", 1.0), ("2020-12-31", 2.0)]);
}

#[test]
fn quarterly_labels() {
    let raw = RawTable::new()
        .with_labels(["2020Q1", "2020Q2", "2020Q4"])
        .with_column("v", [1.0, 2.0, 4.0]);
    check(
        &raw,
        "quarterly",
        &[("2020-04-01", 1.0), ("2020-07-01", 2.0), ("2021-01-01", 4.0)],
    );
}

#[test]
fn monthly_period_codes_roll_december_forward() {
    let raw = RawTable::new()
        .with_labels(["2020M01", "2020M12"])
        .with_column("v", [1.0, 12.0]);
    check(
        &raw,
        "monthly_period_code",
        &[("2020-02-01", 1.0), ("2021-01-01", 12.0)],
    );
}

#[test]
fn ohlcv_bars_take_close() {
    let raw = RawTable::new()
        .with_labels(["2024-01-02 00:00:00", "2024-01-03 00:00:00"])
        .with_column("Open", [1.0, 2.0])
        .with_column("High", [1.5, 2.5])
        .with_column("Low", [0.5, 1.5])
        .with_column("Close", [1.2, 2.2])
        .with_column("Volume", [100.0, 200.0]);
    check(&raw, "ohlcv", &[("2024-01-02", 1.2), ("2024-01-03", 2.2)]);
}

#[test]
fn pre_dated_frame_passes_through() {
    let raw = RawTable::new()
        .with_column("Date", ["2024-03-01", "2024-02-01"])
        .with_column("rate", ["5.25", "5.5%"]);
    check(&raw, "pre_dated", &[("2024-02-01", 5.5), ("2024-03-01", 5.25)]);
}

#[test]
fn year_period_value_triples_keep_december_in_year() {
    let raw = RawTable::new()
        .with_column("year", [2020.0, 2020.0, 2021.0])
        .with_column("period", ["M01", "M12", "Q1"])
        .with_column("value", [1.0, 12.0, 3.0]);
    check(
        &raw,
        "year_period_value",
        &[("2020-02-01", 1.0), ("2020-12-01", 12.0), ("2021-04-01", 3.0)],
    );
}

#[test]
fn growth_triples_are_recognised() {
    let raw = RawTable::new()
        .with_column("year", [2022.0])
        .with_column("period", ["M06"])
        .with_column("MoM_growth", [0.3]);
    check(&raw, "year_period_value", &[("2022-07-01", 0.3)]);
}

#[test]
fn month_tokens_stamp_following_month() {
    let raw = RawTable::new()
        .with_column("date", ["Jan_2020", "Dec_2020"])
        .with_column("index", [100.0, 112.0]);
    check(
        &raw,
        "month_token",
        &[("2020-02-01", 100.0), ("2021-01-01", 112.0)],
    );
}

#[test]
fn month_tokens_accept_longer_month_names() {
    let raw = RawTable::new()
        .with_column("date", ["Sept_2020", "October_2020"])
        .with_column("index", [101.0, 102.0]);
    check(
        &raw,
        "month_token",
        &[("2020-10-01", 101.0), ("2020-11-01", 102.0)],
    );
}

#[test]
fn dated_fallback_parses_loose_dates() {
    let raw = RawTable::new()
        .with_column("date", ["2024/01/05", "20240106"])
        .with_column("level", [3.0, 4.0]);
    check(&raw, "dated_fallback", &[("2024-01-05", 3.0), ("2024-01-06", 4.0)]);
}

#[test]
fn index_fallback_uses_row_labels() {
    let raw = RawTable::new()
        .with_labels(["2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z"])
        .with_column("price", [1.0, 9.0, 2.0]);
    // Duplicate label keeps the later row.
    check(&raw, "index_fallback", &[("2024-01-01", 9.0), ("2024-01-02", 2.0)]);
}

#[test]
fn index_fallback_without_labels_counts_from_epoch() {
    let raw = RawTable::new().with_column("v", [Cell::Number(1.0), Cell::Null, Cell::Number(3.0)]);
    let series = Normalizer::normalize(&raw, "v").unwrap();
    assert_eq!(series.len(), 3);
    assert_eq!(series.observed_count(), 2);
    assert_eq!(series.iso_rows()[2], ("1970-01-03".to_string(), Some(3.0)));
}

#[test]
fn polars_frame_is_accepted() {
    let df = df!(
        "date" => ["2024-01-01", "2024-01-02"],
        "close" => [10.0, 11.0],
    )
    .unwrap();
    let raw = RawTable::from_dataframe(&df, None).unwrap();
    check(&raw, "pre_dated", &[("2024-01-01", 10.0), ("2024-01-02", 11.0)]);
}

#[test]
fn unmatched_shape_reports_none() {
    let raw = RawTable::new()
        .with_column("date", ["soon", "later"])
        .with_column("v", [1.0, 2.0]);
    assert!(Normalizer::normalize(&raw, "x").is_none());
}
