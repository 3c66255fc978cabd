//! End-to-end store behaviour against real database files.

use chrono::NaiveDate;
use macrofeed_core::data::dates::{calendar, parse_iso};
use macrofeed_core::{CanonicalSeries, Normalizer, RawTable, StorageContext, TimeSeriesStore, WritePolicy};
use std::sync::Arc;
use std::thread;

fn d(s: &str) -> NaiveDate {
    parse_iso(s).unwrap()
}

fn file_store(dir: &tempfile::TempDir, today: &str) -> TimeSeriesStore {
    let ctx = StorageContext::open(dir.path().join("macro.db"))
        .unwrap()
        .with_today(d(today));
    TimeSeriesStore::new(ctx)
}

#[test]
fn annual_series_fills_the_whole_calendar() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir, "2021-03-15");

    let raw = RawTable::new()
        .with_labels(["2019", "2020"])
        .with_column("value", [1.0, 2.0]);
    let series = Normalizer::normalize(&raw, "GDP_ANNUAL").unwrap();
    assert_eq!(
        series.iso_rows(),
        vec![
            ("2019-12-31".to_string(), Some(1.0)),
            ("2020-12-31".to_string(), Some(2.0)),
        ]
    );

    let persisted = store
        .write(&series, "GDP_ANNUAL", d("2019-01-01"), WritePolicy::Overwrite)
        .unwrap();

    let (first, last) = store.date_range().unwrap().unwrap();
    assert_eq!(first, d("2019-01-01"));
    assert_eq!(last, d("2021-03-15"));
    assert_eq!(persisted.len(), calendar(first, last).count());

    for point in persisted.points() {
        let expected = if point.date < d("2020-01-01") { 1.0 } else { 2.0 };
        assert_eq!(point.value, Some(expected), "on {}", point.date);
    }
}

#[test]
fn rewriting_the_same_series_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir, "2024-02-10");
    let series = CanonicalSeries::new(
        "CPI",
        vec![(d("2024-01-01"), Some(100.0)), (d("2024-02-01"), Some(101.0))],
    );

    let once = store
        .write(&series, "CPI", d("2023-12-01"), WritePolicy::Overwrite)
        .unwrap();
    let rows = store.row_count().unwrap();
    let twice = store
        .write(&series, "CPI", d("2023-12-01"), WritePolicy::Overwrite)
        .unwrap();

    assert_eq!(once, twice);
    assert_eq!(store.row_count().unwrap(), rows);
    assert_eq!(store.columns().unwrap(), vec!["CPI".to_string()]);
}

#[test]
fn earlier_start_extends_without_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir, "2024-01-31");
    let series = CanonicalSeries::new("A", vec![(d("2024-01-15"), Some(1.0))]);
    store.write(&series, "A", d("2024-01-10"), WritePolicy::Overwrite).unwrap();

    let other = CanonicalSeries::new("B", vec![(d("2023-12-01"), Some(5.0))]);
    store.write(&other, "B", d("2023-11-01"), WritePolicy::Overwrite).unwrap();

    let (first, last) = store.date_range().unwrap().unwrap();
    assert_eq!(first, d("2023-11-01"));
    assert_eq!(
        store.row_count().unwrap(),
        calendar(first, last).count()
    );
    // Every column stays gap-free over the extended calendar.
    for column in ["A", "B"] {
        let stored = store.read_series(column).unwrap();
        assert_eq!(stored.len(), calendar(first, last).count());
        assert!(
            stored.points().iter().all(|p| p.value.is_some()),
            "null in {column}"
        );
    }
    assert_eq!(store.value_on("A", d("2023-11-05")).unwrap(), Some(1.0));
    assert_eq!(store.value_on("B", d("2024-01-31")).unwrap(), Some(5.0));
}

#[test]
fn reopened_database_sees_committed_data() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = file_store(&dir, "2024-01-05");
        let series = CanonicalSeries::new("X", vec![(d("2024-01-02"), Some(4.0))]);
        store.write(&series, "X", d("2024-01-01"), WritePolicy::Overwrite).unwrap();
    }
    let store = file_store(&dir, "2024-01-05");
    let read = store.read_series("X").unwrap();
    assert_eq!(read.len(), 5);
    assert!(read.points().iter().all(|p| p.value == Some(4.0)));
}

#[test]
fn concurrent_writers_on_one_context_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = StorageContext::open(dir.path().join("shared.db"))
        .unwrap()
        .with_today(d("2024-03-31"));
    let store = Arc::new(TimeSeriesStore::new(ctx));

    let handles: Vec<_> = ["UNRATE", "PAYEMS"]
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let series = CanonicalSeries::new(
                    name,
                    vec![
                        (d("2024-01-01"), Some(i as f64)),
                        (d("2024-02-01"), Some(i as f64 + 0.5)),
                    ],
                );
                store.write(&series, name, d("2024-01-01"), WritePolicy::Overwrite)
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap().unwrap();
    }

    let mut columns = store.columns().unwrap();
    columns.sort();
    assert_eq!(columns, vec!["PAYEMS".to_string(), "UNRATE".to_string()]);
    assert_eq!(store.value_on("UNRATE", d("2024-01-01")).unwrap(), Some(0.0));
    assert_eq!(store.value_on("PAYEMS", d("2024-03-31")).unwrap(), Some(1.5));
}

#[test]
fn separate_contexts_do_not_share_state() {
    let a_dir = tempfile::tempdir().unwrap();
    let b_dir = tempfile::tempdir().unwrap();
    let a = file_store(&a_dir, "2024-01-03");
    let b = file_store(&b_dir, "2024-01-03");

    let series = CanonicalSeries::new("ONLY_A", vec![(d("2024-01-01"), Some(1.0))]);
    a.write(&series, "ONLY_A", d("2024-01-01"), WritePolicy::Overwrite).unwrap();

    assert_eq!(a.columns().unwrap(), vec!["ONLY_A".to_string()]);
    assert!(b.columns().unwrap().is_empty());
}
