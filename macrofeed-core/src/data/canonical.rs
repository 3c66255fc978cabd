//! The canonical two-column (date, value) series every source is normalized to.

use super::dates::{calendar, to_iso};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One dated value. `value` is `None` where nothing was observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// A named series with unique, ascending dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSeries {
    name: String,
    points: Vec<Observation>,
}

impl CanonicalSeries {
    /// Sorts by date; on duplicate dates the last occurrence wins.
    pub fn new<I>(name: impl Into<String>, points: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, Option<f64>)>,
    {
        let by_date: BTreeMap<NaiveDate, Option<f64>> = points.into_iter().collect();
        Self {
            name: name.into(),
            points: by_date
                .into_iter()
                .map(|(date, value)| Observation { date, value })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn value_at(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .and_then(|i| self.points[i].value)
    }

    /// Number of points carrying a value.
    pub fn observed_count(&self) -> usize {
        self.points.iter().filter(|p| p.value.is_some()).count()
    }

    /// Lay the series onto the full daily calendar `start..=end` and fill it.
    ///
    /// Each day without an observation takes the value of the next observed
    /// day (period-end stamps cover the days leading up to them, and leading
    /// days take the first observation). Days after the last observation take
    /// the last observed value. Observations outside the window are ignored.
    pub fn on_calendar(&self, start: NaiveDate, end: NaiveDate) -> Vec<Observation> {
        let observed: BTreeMap<NaiveDate, f64> = self
            .points
            .iter()
            .filter(|p| p.date >= start && p.date <= end)
            .filter_map(|p| p.value.map(|v| (p.date, v)))
            .collect();

        let mut filled: Vec<Observation> = calendar(start, end)
            .map(|date| Observation {
                date,
                value: observed.get(&date).copied(),
            })
            .collect();

        // Back-fill: walk backwards carrying the next observation.
        let mut next = None;
        for point in filled.iter_mut().rev() {
            match point.value {
                Some(v) => next = Some(v),
                None => point.value = next,
            }
        }

        // Forward-fill whatever trails the last observation.
        if let Some(last) = observed.values().next_back().copied() {
            for point in filled.iter_mut().rev() {
                if point.value.is_some() {
                    break;
                }
                point.value = Some(last);
            }
        }

        filled
    }

    /// Two-column frame: `date` (Date) and the series name (Float64).
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
        let dates: Vec<i32> = self
            .points
            .iter()
            .map(|p| (p.date - epoch).num_days() as i32)
            .collect();
        let values: Vec<Option<f64>> = self.points.iter().map(|p| p.value).collect();

        DataFrame::new(vec![
            Column::new("date".into(), dates).cast(&DataType::Date)?,
            Column::new(self.name.as_str().into(), values),
        ])
    }

    /// `(YYYY-MM-DD, value)` pairs, mostly for logging and assertions.
    pub fn iso_rows(&self) -> Vec<(String, Option<f64>)> {
        self.points.iter().map(|p| (to_iso(p.date), p.value)).collect()
    }
}
