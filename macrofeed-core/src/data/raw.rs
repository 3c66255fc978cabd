//! Raw tabular results as handed over by fetchers and scrapers.
//!
//! A [`RawTable`] keeps whatever shape the provider produced: optional row
//! labels (the "index") plus named columns of loosely typed cells.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// A single loosely typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Number(v) => v.is_nan(),
            Cell::Text(s) => s.trim().is_empty(),
        }
    }

    /// Numeric view of the cell. Text is accepted with thousands separators
    /// and a trailing percent sign; anything else is null.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Null => None,
            Cell::Number(v) => v.is_finite().then_some(*v),
            Cell::Text(s) => {
                let cleaned: String = s
                    .trim()
                    .trim_end_matches('%')
                    .chars()
                    .filter(|c| *c != ',' && *c != '_')
                    .collect();
                cleaned.trim().parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
    }

    /// Text view of the cell; numbers render without a trailing `.0`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Number(v) if v.is_nan() => None,
            Cell::Number(v) if v.fract() == 0.0 && v.abs() < 1e15 => Some(format!("{}", *v as i64)),
            Cell::Number(v) => Some(v.to_string()),
            Cell::Text(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
        }
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Number(v)
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Cell::Null, Cell::Number)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: String,
    pub cells: Vec<Cell>,
}

/// Provider-shaped table: optional row labels plus named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub labels: Option<Vec<String>>,
    pub columns: Vec<RawColumn>,
}

impl RawTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_column<I, C>(mut self, name: impl Into<String>, cells: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Cell>,
    {
        self.columns.push(RawColumn {
            name: name.into(),
            cells: cells.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Number of rows (the longest column or the label count).
    pub fn height(&self) -> usize {
        let cols = self.columns.iter().map(|c| c.cells.len()).max().unwrap_or(0);
        let labels = self.labels.as_ref().map_or(0, Vec::len);
        cols.max(labels)
    }

    /// True when there is no data row at all.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.columns.iter().all(|c| c.cells.is_empty())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&RawColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Case-insensitive lookup.
    pub fn column_ci(&self, name: &str) -> Option<&RawColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn cell(&self, column: usize, row: usize) -> &Cell {
        self.columns
            .get(column)
            .and_then(|c| c.cells.get(row))
            .unwrap_or(&Cell::Null)
    }

    /// Build from a polars frame. `label_column`, when given, becomes the row
    /// labels and is removed from the data columns.
    pub fn from_dataframe(df: &DataFrame, label_column: Option<&str>) -> PolarsResult<Self> {
        let mut table = RawTable::new();
        for column in df.get_columns() {
            let name = column.name().to_string();
            let cells = column_cells(column)?;
            if label_column == Some(name.as_str()) {
                table.labels = Some(
                    cells
                        .iter()
                        .map(|c| c.as_text().unwrap_or_default())
                        .collect(),
                );
            } else {
                table.columns.push(RawColumn { name, cells });
            }
        }
        Ok(table)
    }

    /// Build from a JSON array of flat objects. Column order follows the first
    /// record's keys; keys appearing later are appended.
    pub fn from_json_records(value: &serde_json::Value) -> Option<Self> {
        let records = value.as_array()?;
        let mut names: Vec<String> = Vec::new();
        for record in records {
            for key in record.as_object()?.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }

        let mut table = RawTable::new();
        for name in names {
            let cells = records
                .iter()
                .map(|r| match r.get(&name) {
                    Some(serde_json::Value::Number(n)) => n.as_f64().into(),
                    Some(serde_json::Value::String(s)) => Cell::Text(s.clone()),
                    Some(serde_json::Value::Bool(b)) => Cell::Number(f64::from(u8::from(*b))),
                    _ => Cell::Null,
                })
                .collect();
            table.columns.push(RawColumn { name, cells });
        }
        Some(table)
    }
}

fn column_cells(column: &Column) -> PolarsResult<Vec<Cell>> {
    let numeric = matches!(
        column.dtype(),
        DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::UInt64
            | DataType::UInt32
    );

    if numeric {
        let cast = column.cast(&DataType::Float64)?;
        Ok(cast.f64()?.into_iter().map(Cell::from).collect())
    } else {
        let cast = column.cast(&DataType::String)?;
        Ok(cast
            .str()?
            .into_iter()
            .map(|v| v.map_or(Cell::Null, Cell::from))
            .collect())
    }
}
