//! Pragmas and catalog lookups for a raw connection.

use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

use crate::affinity::FieldType;
use crate::error::{OrmError, Result};
use crate::schema::is_identifier;

pub const DEFAULT_MMAP_SIZE: u64 = 16 * 1024 * 1024;

/// `journal_mode = WAL`, plus `synchronous = NORMAL`.
///
/// WAL only guarantees atomic commits per database file when several databases are attached.
///
/// # Errors
///
/// Returns [`OrmError::SqliteError`] if a pragma fails.
pub fn enable_wal_mode(conn: &Connection) -> Result<()> {
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    // In-memory databases stay in `memory` mode.
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        warn!(mode = %mode, "journal_mode did not switch to WAL");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// # Errors
///
/// Returns [`OrmError::SqliteError`] if the pragma fails.
pub fn enable_tmp_store_at_memory(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

/// # Errors
///
/// Returns [`OrmError::SqliteError`] if the pragma fails.
pub fn enable_mmap(conn: &Connection, mmap_size: u64) -> Result<()> {
    let size = i64::try_from(mmap_size).unwrap_or(i64::MAX);
    // mmap_size echoes the applied value back as a row.
    let _applied: Option<i64> = conn
        .pragma_update_and_check(None, "mmap_size", size, |row| row.get(0))
        .optional()?;
    Ok(())
}

/// # Errors
///
/// Returns [`OrmError::SqliteError`] if the pragma fails.
pub fn optimize_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA optimize;")?;
    Ok(())
}

/// Run `integrity_check` on the whole database or on one table.
///
/// Returns `true` when the engine reports `ok`.
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for a malformed table name and [`OrmError::SqliteError`]
/// if the check itself cannot run.
pub fn check_db_integrity(conn: &Connection, table_name: Option<&str>) -> Result<bool> {
    let sql = match table_name {
        Some(table) if is_identifier(table) => format!("PRAGMA integrity_check({table})"),
        Some(table) => {
            return Err(OrmError::SchemaError(format!("invalid table name `{table}`")));
        }
        None => "PRAGMA integrity_check".to_owned(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let report = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if report.len() == 1 && report[0] == "ok" {
        return Ok(true);
    }
    warn!(problems = ?report, "database integrity check finds problem");
    Ok(false)
}

/// Whether `table_name` exists in the main schema.
///
/// # Errors
///
/// Returns [`OrmError::SqliteError`] if the catalog query fails.
pub fn lookup_table(conn: &Connection, table_name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// `ATTACH DATABASE <database> AS <schema_name>`; returns the schema name.
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for a malformed schema name and [`OrmError::SqliteError`]
/// if the attach fails.
pub fn attach_database<'a>(conn: &Connection, database: &str, schema_name: &'a str) -> Result<&'a str> {
    if !is_identifier(schema_name) {
        return Err(OrmError::SchemaError(format!(
            "invalid schema name `{schema_name}`"
        )));
    }
    conn.execute("ATTACH DATABASE ?1 AS ?2", [database, schema_name])?;
    Ok(schema_name)
}

/// Compile-time options of the linked `SQLite` library as `(name, value)` pairs; flag-only
/// options have no value.
///
/// # Errors
///
/// Returns [`OrmError::SqliteError`] if the pragma query fails.
pub fn compile_options(conn: &Connection) -> Result<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare("SELECT compile_options FROM pragma_compile_options")?;
    let options = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .map(|raw| {
            raw.map(|raw| match raw.split_once('=') {
                Some((name, value)) => (name.to_owned(), Some(value.to_owned())),
                None => (raw, None),
            })
        })
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(options)
}

/// `CHECK(<column> IN (...))` for an enum or literal type.
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for types without a closed value set.
pub fn check_constraint_for(column: &str, field_type: &FieldType) -> Result<String> {
    let values = match field_type {
        FieldType::IntEnum(domain) | FieldType::IntLiteral(domain) => domain
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        FieldType::StrEnum(domain) | FieldType::StrLiteral(domain) => domain
            .iter()
            .map(|s| format!("'{}'", s.replace('\'', "''")))
            .collect(),
        FieldType::Optional(inner) => return check_constraint_for(column, inner),
        other => {
            return Err(OrmError::SchemaError(format!(
                "cannot derive a CHECK constraint for {other:?}"
            )));
        }
    };
    Ok(format!("CHECK({column} IN ({}))", values.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_and_lookup_on_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(lookup_table(&conn, "t").unwrap());
        assert!(!lookup_table(&conn, "missing").unwrap());
        assert!(check_db_integrity(&conn, None).unwrap());
        assert!(check_db_integrity(&conn, Some("t")).unwrap());
        assert!(check_db_integrity(&conn, Some("t; --")).is_err());
    }

    #[test]
    fn pragmas_apply() {
        let conn = Connection::open_in_memory().unwrap();
        enable_wal_mode(&conn).unwrap();
        enable_tmp_store_at_memory(&conn).unwrap();
        enable_mmap(&conn, DEFAULT_MMAP_SIZE).unwrap();
        optimize_db(&conn).unwrap();
        assert!(!compile_options(&conn).unwrap().is_empty());
    }

    #[test]
    fn check_constraints_from_domains() {
        assert_eq!(
            check_constraint_for("kind", &FieldType::str_literal(&["A", "B"])).unwrap(),
            "CHECK(kind IN ('A','B'))"
        );
        assert_eq!(
            check_constraint_for("n", &FieldType::int_literal(&[1, 2]).optional()).unwrap(),
            "CHECK(n IN (1,2))"
        );
        assert!(check_constraint_for("x", &FieldType::Text).is_err());
    }

    #[test]
    fn attach_rejects_bad_schema_names() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(attach_database(&conn, ":memory:", "aux1").unwrap(), "aux1");
        assert!(attach_database(&conn, ":memory:", "bad name").is_err());
    }
}
