//! Per-series cleaning steps requested through series flags.

use super::canonical::CanonicalSeries;
use super::raw::{Cell, RawTable};

/// Forward-fill null cells in every column, top to bottom.
///
/// Used for providers that leave gaps inside their own tables. Leading nulls
/// stay null; the store back-fills those later.
pub fn forward_fill_raw(raw: &RawTable) -> RawTable {
    let mut cleaned = raw.clone();
    for column in &mut cleaned.columns {
        let mut last: Option<Cell> = None;
        for cell in &mut column.cells {
            if cell.is_null() {
                if let Some(prev) = &last {
                    *cell = prev.clone();
                }
            } else {
                last = Some(cell.clone());
            }
        }
    }
    cleaned
}

/// Period-over-period growth in percent.
///
/// Each observed value is compared with the previous observed value; the
/// first observation has no predecessor and is dropped, as is any point whose
/// predecessor is zero.
pub fn percent_change(series: &CanonicalSeries) -> CanonicalSeries {
    let mut prev: Option<f64> = None;
    let mut points = Vec::with_capacity(series.len());
    for point in series.points() {
        let Some(value) = point.value else {
            continue;
        };
        if let Some(p) = prev.filter(|p| *p != 0.0) {
            points.push((point.date, Some((value / p - 1.0) * 100.0)));
        }
        prev = Some(value);
    }
    CanonicalSeries::new(series.name(), points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dates::parse_iso;

    #[test]
    fn forward_fill_leaves_leading_nulls() {
        let raw = RawTable::new().with_column(
            "v",
            vec![Cell::Null, Cell::Number(1.0), Cell::Null, Cell::Text(String::new()), Cell::Number(4.0)],
        );
        let cleaned = forward_fill_raw(&raw);
        let values: Vec<_> = cleaned.columns[0].cells.iter().map(Cell::as_f64).collect();
        assert_eq!(values, vec![None, Some(1.0), Some(1.0), Some(1.0), Some(4.0)]);
    }

    #[test]
    fn percent_change_drops_first_point() {
        let s = CanonicalSeries::new(
            "cpi",
            vec![
                (parse_iso("2024-01-01").unwrap(), Some(100.0)),
                (parse_iso("2024-02-01").unwrap(), Some(110.0)),
                (parse_iso("2024-03-01").unwrap(), None),
                (parse_iso("2024-04-01").unwrap(), Some(99.0)),
            ],
        );
        let pct = percent_change(&s);
        assert_eq!(pct.len(), 2);
        assert!((pct.points()[0].value.unwrap() - 10.0).abs() < 1e-9);
        assert!((pct.points()[1].value.unwrap() + 10.0).abs() < 1e-9);
        assert_eq!(pct.name(), "cpi");
    }
}
