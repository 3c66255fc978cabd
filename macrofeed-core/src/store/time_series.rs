//! The calendar-complete wide table.
//!
//! Layout: one `Time_Series` table keyed by `date` (`YYYY-MM-DD` text), one
//! row per calendar day from the earliest start ever requested up to today,
//! and one nullable REAL column per series.
//!
//! A write moves through `absent → created → calendar-complete →
//! column-present → values-merged → committed`. Every stage is idempotent, so
//! the next day's incremental run simply repeats them.

use super::context::StorageContext;
use super::schema::{
    add_column_if_absent, ensure_primary_key, quoted, table_columns, table_exists,
    validate_identifier,
};
use super::StoreError;
use crate::data::dates::{calendar, parse_iso, to_iso};
use crate::data::CanonicalSeries;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const TIME_SERIES_TABLE: &str = "Time_Series";
const KEY: &str = "date";

/// What to do with a date whose stored value is already non-null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Always write.
    #[default]
    Overwrite,
    /// Write only where the stored value is null.
    FillNullOnly,
    /// Keep stored values; only null slots receive data.
    Preserve,
}

impl WritePolicy {
    /// Map the `overwrite_existing` / `only_fill_null` flag pair.
    /// `only_fill_null` takes precedence.
    pub fn from_flags(overwrite_existing: bool, only_fill_null: bool) -> Self {
        if only_fill_null {
            WritePolicy::FillNullOnly
        } else if overwrite_existing {
            WritePolicy::Overwrite
        } else {
            WritePolicy::Preserve
        }
    }

    fn permits(self, stored: Option<f64>) -> bool {
        match self {
            WritePolicy::Overwrite => true,
            WritePolicy::FillNullOnly | WritePolicy::Preserve => stored.is_none(),
        }
    }
}

pub struct TimeSeriesStore {
    ctx: StorageContext,
    table: String,
}

impl TimeSeriesStore {
    pub fn new(ctx: StorageContext) -> Self {
        Self {
            ctx,
            table: TIME_SERIES_TABLE.to_string(),
        }
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    /// Create the table or extend it so every day from `start` to today exists.
    ///
    /// A drifted primary key is rebuilt first. Rows added at either edge take
    /// each existing column's nearest stored value.
    pub fn ensure_table(&self, start: NaiveDate) -> Result<(), StoreError> {
        let mut conn = self.ctx.lock()?;
        self.ensure_primary_key_locked(&mut conn)?;
        self.ensure_table_locked(&mut conn, start, None)?;
        Ok(())
    }

    /// Rebuild the table if `date` lost its primary key. Returns whether a
    /// rebuild happened.
    pub fn ensure_primary_key(&self) -> Result<bool, StoreError> {
        let mut conn = self.ctx.lock()?;
        self.ensure_primary_key_locked(&mut conn)
    }

    /// Merge `series` into column `series_name` over `start..=today`.
    ///
    /// The series is laid onto the daily calendar, back-filled and
    /// forward-filled, then written according to `policy`. Returns the
    /// (date, value) pairs stored for that window once committed.
    pub fn write(
        &self,
        series: &CanonicalSeries,
        series_name: &str,
        start: NaiveDate,
        policy: WritePolicy,
    ) -> Result<CanonicalSeries, StoreError> {
        if let Err(e) = validate_identifier(series_name) {
            warn!(series = series_name, "refusing write: {e}");
            return Err(e);
        }

        let today = self.ctx.today();
        let mut conn = self.ctx.lock()?;

        self.ensure_primary_key_locked(&mut conn)?;
        // The written column is left out of edge filling so FillNullOnly
        // still sees the new rows as empty.
        let previous = self.ensure_table_locked(&mut conn, start, Some(series_name))?;
        if add_column_if_absent(&conn, &self.table, series_name, "REAL")? {
            info!(series = series_name, "added column");
        }

        if start > today {
            if let Some(range) = previous {
                fill_new_edges(&conn, &self.table, series_name, range)?;
            }
            debug!(series = series_name, %start, "start date is in the future, nothing to write");
            return Ok(CanonicalSeries::new(series_name, Vec::new()));
        }

        let filled = series.on_calendar(start, today);
        let stored = self.read_window(&conn, series_name, start, today)?;

        let tx = conn.transaction()?;
        let mut written = 0usize;
        let mut skipped = 0usize;
        {
            let mut update = tx.prepare(&format!(
                "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                quoted(&self.table),
                quoted(series_name),
                quoted(KEY)
            ))?;
            for point in &filled {
                let Some(value) = point.value else {
                    continue;
                };
                let iso = to_iso(point.date);
                let current = stored.get(&iso).copied().flatten();
                if !policy.permits(current) {
                    skipped += 1;
                    continue;
                }
                update.execute(params![value, iso])?;
                written += 1;
            }
        }
        // New edge rows the series itself did not reach.
        if let Some(range) = previous {
            fill_new_edges(&tx, &self.table, series_name, range)?;
        }
        tx.commit()?;

        info!(series = series_name, written, skipped, ?policy, "series committed");

        let persisted = self.read_window(&conn, series_name, start, today)?;
        Ok(CanonicalSeries::new(
            series_name,
            persisted
                .into_iter()
                .filter_map(|(date, value)| parse_iso(&date).map(|d| (d, value))),
        ))
    }

    /// Whole stored column, every row of the table.
    pub fn read_series(&self, series_name: &str) -> Result<CanonicalSeries, StoreError> {
        validate_identifier(series_name)?;
        let conn = self.ctx.lock()?;
        let Some((first, last)) = self.range_locked(&conn)? else {
            return Ok(CanonicalSeries::new(series_name, Vec::new()));
        };
        let rows = self.read_window(&conn, series_name, first, last)?;
        Ok(CanonicalSeries::new(
            series_name,
            rows.into_iter()
                .filter_map(|(date, value)| parse_iso(&date).map(|d| (d, value))),
        ))
    }

    /// Series columns currently present (excluding `date`).
    pub fn columns(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.ctx.lock()?;
        if !table_exists(&conn, &self.table)? {
            return Ok(Vec::new());
        }
        Ok(table_columns(&conn, &self.table)?
            .into_iter()
            .map(|c| c.name)
            .filter(|n| n != KEY)
            .collect())
    }

    /// First and last date in the table.
    pub fn date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>, StoreError> {
        let conn = self.ctx.lock()?;
        self.range_locked(&conn)
    }

    pub fn row_count(&self) -> Result<usize, StoreError> {
        let conn = self.ctx.lock()?;
        if !table_exists(&conn, &self.table)? {
            return Ok(0);
        }
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quoted(&self.table)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    // ── Locked helpers ───────────────────────────────────────────────

    fn ensure_primary_key_locked(&self, conn: &mut Connection) -> Result<bool, StoreError> {
        let repaired = ensure_primary_key(conn, &self.table, KEY)?;
        if repaired {
            self.ctx.record_repair();
        }
        Ok(repaired)
    }

    /// Returns the date range held before this call, if the table had rows.
    fn ensure_table_locked(
        &self,
        conn: &mut Connection,
        start: NaiveDate,
        skip_column: Option<&str>,
    ) -> Result<Option<(NaiveDate, NaiveDate)>, StoreError> {
        let today = self.ctx.today();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY)",
                quoted(&self.table),
                quoted(KEY)
            ),
            [],
        )?;

        let (count, existing) = self.stats_locked(conn)?;
        let from = match existing {
            Some((first, _)) => start.min(first),
            None => start,
        };

        // Only the missing edges need inserting when the stored range is
        // already gap-free.
        let spans: Vec<(NaiveDate, NaiveDate)> = match existing {
            Some((first, last)) if count == (last - first).num_days() + 1 => {
                let mut spans = Vec::new();
                if from < first {
                    spans.push((from, first.pred_opt().unwrap_or(first)));
                }
                if today > last {
                    spans.push((last.succ_opt().unwrap_or(last), today));
                }
                spans
            }
            _ => vec![(from, today)],
        };
        if spans.is_empty() {
            return Ok(existing);
        }

        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES (?1)",
                quoted(&self.table),
                quoted(KEY)
            ))?;
            for (lo, hi) in spans {
                for day in calendar(lo, hi) {
                    inserted += insert.execute([to_iso(day)])?;
                }
            }
        }

        let mut filled = 0usize;
        if let (Some(range), true) = (existing, inserted > 0) {
            for column in table_columns(&tx, &self.table)? {
                if column.name == KEY || Some(column.name.as_str()) == skip_column {
                    continue;
                }
                if validate_identifier(&column.name).is_err() {
                    warn!(column = %column.name, "skipping edge fill for unexpected column");
                    continue;
                }
                filled += fill_new_edges(&tx, &self.table, &column.name, range)?;
            }
        }
        tx.commit()?;

        if inserted > 0 {
            debug!(table = %self.table, inserted, filled, %from, %today, "calendar extended");
        }
        Ok(existing)
    }

    fn stats_locked(
        &self,
        conn: &Connection,
    ) -> Result<(i64, Option<(NaiveDate, NaiveDate)>), StoreError> {
        let (count, first, last): (i64, Option<String>, Option<String>) = conn.query_row(
            &format!(
                "SELECT COUNT(*), MIN({k}), MAX({k}) FROM {t}",
                k = quoted(KEY),
                t = quoted(&self.table)
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let range = match (first.as_deref().and_then(parse_iso), last.as_deref().and_then(parse_iso)) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        };
        Ok((count, range))
    }

    fn range_locked(&self, conn: &Connection) -> Result<Option<(NaiveDate, NaiveDate)>, StoreError> {
        if !table_exists(conn, &self.table)? {
            return Ok(None);
        }
        Ok(self.stats_locked(conn)?.1)
    }

    fn read_window(
        &self,
        conn: &Connection,
        column: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<String, Option<f64>>, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {k}, {c} FROM {t} WHERE {k} >= ?1 AND {k} <= ?2",
            k = quoted(KEY),
            c = quoted(column),
            t = quoted(&self.table)
        ))?;
        let rows = stmt.query_map(params![to_iso(start), to_iso(end)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?))
        })?;
        let window = rows.collect::<Result<HashMap<_, _>, _>>()?;
        Ok(window)
    }

    /// Stored value for one date, for spot checks.
    pub fn value_on(&self, series_name: &str, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        validate_identifier(series_name)?;
        let conn = self.ctx.lock()?;
        let value: Option<Option<f64>> = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    quoted(series_name),
                    quoted(&self.table),
                    quoted(KEY)
                ),
                [to_iso(date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }
}

/// Fill null cells of `column` outside `previous` (the range held before an
/// extension): leading rows take the first stored value, trailing rows the last.
fn fill_new_edges(
    conn: &Connection,
    table: &str,
    column: &str,
    previous: (NaiveDate, NaiveDate),
) -> Result<usize, StoreError> {
    let (first, last) = previous;
    let mut filled = 0;
    for (order, op, bound) in [("ASC", "<", first), ("DESC", ">", last)] {
        let edge: Option<Value> = conn
            .query_row(
                &format!(
                    "SELECT {c} FROM {t} WHERE {c} IS NOT NULL ORDER BY {k} {order} LIMIT 1",
                    c = quoted(column),
                    t = quoted(table),
                    k = quoted(KEY)
                ),
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(value) = edge else {
            continue;
        };
        filled += conn.execute(
            &format!(
                "UPDATE {t} SET {c} = ?1 WHERE {k} {op} ?2 AND {c} IS NULL",
                c = quoted(column),
                t = quoted(table),
                k = quoted(KEY)
            ),
            params![value, to_iso(bound)],
        )?;
    }
    Ok(filled)
}
