//! Identifier validation, schema introspection and primary-key repair.

use super::StoreError;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use std::sync::OnceLock;
use tracing::{info, warn};

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap_or_else(|e| panic!("{e}")))
}

/// Reject anything that is not `[A-Za-z0-9_]+` before it reaches DDL.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(StoreError::SchemaViolation(name.to_string()))
    }
}

/// Double-quoted identifier. Only call with validated names.
pub(crate) fn quoted(name: &str) -> String {
    format!("\"{name}\"")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub primary_key: bool,
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quoted(table)))?;
    let rows = stmt.query_map([], |row| {
        let pk: i64 = row.get(5)?;
        Ok(ColumnInfo {
            name: row.get(1)?,
            decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            primary_key: pk > 0,
        })
    })?;
    let columns = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    Ok(table_columns(conn, table)?
        .iter()
        .any(|c| c.name.eq_ignore_ascii_case(column)))
}

/// `ALTER TABLE ... ADD COLUMN`, tolerating a concurrent "duplicate column".
pub fn add_column_if_absent(
    conn: &Connection,
    table: &str,
    column: &str,
    decl_type: &str,
) -> Result<bool, StoreError> {
    validate_identifier(table)?;
    validate_identifier(column)?;
    if column_exists(conn, table, column)? {
        return Ok(false);
    }
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {decl_type}",
        quoted(table),
        quoted(column)
    );
    match conn.execute(&sql, []) {
        Ok(_) => Ok(true),
        Err(e) if e.to_string().contains("duplicate column name") => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Make sure `key` is the primary key of `table`.
///
/// A table whose `key` column lost its PRIMARY KEY (for example after an
/// external bulk load replaced it) is rebuilt: a replacement table is created
/// with the same columns, rows are copied de-duplicated on `key` with the last
/// written row winning, and the replacement is swapped in within a single
/// transaction. Returns `true` when a rebuild happened.
///
/// The caller must already hold the storage lock.
pub fn ensure_primary_key(conn: &mut Connection, table: &str, key: &str) -> Result<bool, StoreError> {
    validate_identifier(table)?;
    validate_identifier(key)?;
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let columns = table_columns(conn, table)?;
    let Some(key_info) = columns.iter().find(|c| c.name == key) else {
        return Ok(false);
    };
    if key_info.primary_key {
        return Ok(false);
    }

    warn!(table, key, "primary key missing, rebuilding table");

    let replacement = format!("{table}__rebuild");
    let definitions: Vec<String> = columns
        .iter()
        .map(|c| {
            let ty = if c.decl_type.is_empty() { "TEXT" } else { c.decl_type.as_str() };
            if c.name == key {
                format!("{} {ty} PRIMARY KEY", quoted(&c.name))
            } else {
                format!("{} {ty}", quoted(&c.name))
            }
        })
        .collect();
    let column_list: Vec<String> = columns.iter().map(|c| quoted(&c.name)).collect();
    let column_list = column_list.join(", ");

    let tx = conn.transaction()?;
    tx.execute(&format!("DROP TABLE IF EXISTS {}", quoted(&replacement)), [])?;
    tx.execute(
        &format!("CREATE TABLE {} ({})", quoted(&replacement), definitions.join(", ")),
        [],
    )?;
    let copied = tx.execute(
        &format!(
            "INSERT INTO {new} ({cols}) SELECT {cols} FROM {old} \
             WHERE rowid IN (SELECT MAX(rowid) FROM {old} WHERE {k} IS NOT NULL GROUP BY {k})",
            new = quoted(&replacement),
            old = quoted(table),
            cols = column_list,
            k = quoted(key),
        ),
        [],
    )?;
    tx.execute(&format!("DROP TABLE {}", quoted(table)), [])?;
    tx.execute(
        &format!("ALTER TABLE {} RENAME TO {}", quoted(&replacement), quoted(table)),
        [],
    )?;
    tx.commit()?;

    info!(table, rows = copied, "table rebuilt with primary key");
    Ok(true)
}
