//! Flat "snapshot" tables for sources that are not a single dated series.
//!
//! A table is created on first write. When the frame has a date column that
//! column becomes the primary key and later writes upsert on it; otherwise
//! rows are appended.

use super::context::StorageContext;
use super::schema::{
    add_column_if_absent, ensure_primary_key, quoted, table_columns, table_exists,
    validate_identifier,
};
use super::StoreError;
use crate::data::dates::{parse_date, to_iso};
use crate::data::{Cell, RawColumn, RawTable};
use rusqlite::types::ValueRef;
use rusqlite::ToSql;
use tracing::{debug, info, warn};

const DEFAULT_DATE_COLUMN: &str = "date";

pub struct SnapshotStore {
    ctx: StorageContext,
}

impl SnapshotStore {
    pub fn new(ctx: StorageContext) -> Self {
        Self { ctx }
    }

    /// Persist `frame` into `table` and return the table's full contents.
    ///
    /// `date_column` names the upsert key. When `None`, a column called
    /// `date` (any case) is used if present; otherwise the write appends.
    pub fn write(
        &self,
        table: &str,
        frame: &RawTable,
        date_column: Option<&str>,
    ) -> Result<RawTable, StoreError> {
        if let Err(e) = validate_identifier(table) {
            warn!(table, "refusing snapshot write: {e}");
            return Err(e);
        }
        for name in frame.column_names() {
            if let Err(e) = validate_identifier(name) {
                warn!(table, column = name, "refusing snapshot write: {e}");
                return Err(e);
            }
        }
        if frame.is_empty() {
            return Err(StoreError::EmptyFrame(table.to_string()));
        }

        let key = match date_column {
            Some(name) => Some(
                frame
                    .column(name)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| StoreError::MissingKeyColumn {
                        table: table.to_string(),
                        column: name.to_string(),
                    })?,
            ),
            None => frame
                .column_ci(DEFAULT_DATE_COLUMN)
                .map(|c| c.name.clone()),
        };

        let mut conn = self.ctx.lock()?;

        if table_exists(&conn, table)? {
            for column in &frame.columns {
                if add_column_if_absent(&conn, table, &column.name, column_type(column))? {
                    debug!(table, column = %column.name, "added column");
                }
            }
            // Upserts need the key to be the primary key, including a key
            // column that was only just added.
            if let Some(key) = &key {
                if ensure_primary_key(&mut conn, table, key)? {
                    self.ctx.record_repair();
                }
            }
        } else {
            let definitions: Vec<String> = frame
                .columns
                .iter()
                .map(|c| {
                    if key.as_deref() == Some(c.name.as_str()) {
                        format!("{} TEXT PRIMARY KEY", quoted(&c.name))
                    } else {
                        format!("{} {}", quoted(&c.name), column_type(c))
                    }
                })
                .collect();
            conn.execute(
                &format!("CREATE TABLE {} ({})", quoted(table), definitions.join(", ")),
                [],
            )?;
            info!(table, columns = definitions.len(), "created snapshot table");
        }

        let names: Vec<String> = frame.columns.iter().map(|c| quoted(&c.name)).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted(table),
            names.join(", "),
            placeholders.join(", ")
        );
        if let Some(key) = &key {
            let updates: Vec<String> = frame
                .columns
                .iter()
                .filter(|c| &c.name != key)
                .map(|c| format!("{q} = excluded.{q}", q = quoted(&c.name)))
                .collect();
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT({}) DO NOTHING", quoted(key)));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT({}) DO UPDATE SET {}",
                    quoted(key),
                    updates.join(", ")
                ));
            }
        }

        let key_index = key
            .as_ref()
            .and_then(|k| frame.columns.iter().position(|c| &c.name == k));

        let tx = conn.transaction()?;
        let mut written = 0usize;
        let mut skipped = 0usize;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in 0..frame.height() {
                let mut values: Vec<Cell> = (0..frame.columns.len())
                    .map(|col| frame.cell(col, row).clone())
                    .collect();
                if let Some(i) = key_index {
                    // Keys are normalised to ISO; rows without a usable date are skipped.
                    match values[i].as_text().as_deref().and_then(parse_date) {
                        Some(d) => values[i] = Cell::Text(to_iso(d)),
                        None => {
                            skipped += 1;
                            continue;
                        }
                    }
                }
                let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
                stmt.execute(params.as_slice())?;
                written += 1;
            }
        }
        tx.commit()?;

        info!(table, written, skipped, upsert = key.is_some(), "snapshot committed");
        read_table(&conn, table, key.as_deref())
    }

    /// Full contents of `table`, ordered by key when there is one.
    pub fn read(&self, table: &str) -> Result<RawTable, StoreError> {
        validate_identifier(table)?;
        let conn = self.ctx.lock()?;
        if !table_exists(&conn, table)? {
            return Ok(RawTable::new());
        }
        let key = table_columns(&conn, table)?
            .into_iter()
            .find(|c| c.primary_key)
            .map(|c| c.name);
        read_table(&conn, table, key.as_deref())
    }
}

/// REAL when every non-null cell is numeric, TEXT otherwise.
fn column_type(column: &RawColumn) -> &'static str {
    let numeric = column
        .cells
        .iter()
        .filter(|c| !c.is_null())
        .all(|c| matches!(c, Cell::Number(_)));
    if numeric {
        "REAL"
    } else {
        "TEXT"
    }
}

fn read_table(
    conn: &rusqlite::Connection,
    table: &str,
    key: Option<&str>,
) -> Result<RawTable, StoreError> {
    let order = key
        .map(|k| format!(" ORDER BY {}", quoted(k)))
        .unwrap_or_else(|| " ORDER BY rowid".to_string());
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}{order}", quoted(table)))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut columns: Vec<RawColumn> = names
        .into_iter()
        .map(|name| RawColumn {
            name,
            cells: Vec::new(),
        })
        .collect();

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for (i, column) in columns.iter_mut().enumerate() {
            let value: ValueRef<'_> = row.get_ref(i)?;
            column.cells.push(Cell::from(value));
        }
    }

    Ok(RawTable {
        labels: None,
        columns,
    })
}
