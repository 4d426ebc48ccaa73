use std::collections::HashSet;
use std::fmt::Write as _;

use crate::error::{OrmError, Result};
use crate::schema::{TableSchema, is_identifier};

use super::{
    Columns, DeleteSpec, InsertSpec, Predicate, Projection, Returning, SelectSpec, TableName,
    UpdateSpec, normalize_columns,
};

/// Placeholder prefix for the WHERE side of an UPDATE, so `SET c=:c ... WHERE c=:__where_c`
/// can bind both values of the same column.
pub const WHERE_PREFIX: &str = "__where_";

/// Placeholder carrying the row count of `LIMIT`.
pub const LIMIT_PARAM: &str = "__limit";

/// Names starting with this are generated by the builders and may not be declared by callers.
const RESERVED_PREFIX: &str = "__";

/// `INSERT [OR ...] INTO <table> (<cols>) VALUES (:<c1>, ...)[ RETURNING ...]`
///
/// Columns are deduplicated and emitted in table order. An explicit empty column list produces
/// `DEFAULT VALUES`.
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for unknown columns.
pub fn insert(schema: &TableSchema, table: &TableName, spec: &InsertSpec) -> Result<String> {
    let columns = resolve_columns(schema, &spec.columns)?;
    let mut sql = String::from("INSERT ");
    if let Some(or) = spec.or_option {
        let _ = write!(sql, "{} ", or.as_sql());
    }
    let _ = write!(sql, "INTO {table}");
    if columns.is_empty() {
        sql.push_str(" DEFAULT VALUES");
    } else {
        let placeholders = columns
            .iter()
            .map(|c| format!(":{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(sql, " ({}) VALUES ({placeholders})", columns.join(", "));
    }
    push_returning(&mut sql, schema, spec.returning.as_ref())?;
    Ok(sql)
}

/// `SELECT [DISTINCT] <projection> FROM <table>[ WHERE ...][ ORDER BY ...][ LIMIT :__limit]`
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for unknown columns and [`OrmError::StatementError`] for a
/// malformed predicate.
pub fn select(schema: &TableSchema, table: &TableName, spec: &SelectSpec) -> Result<String> {
    let mut sql = String::from("SELECT ");
    if spec.distinct {
        sql.push_str("DISTINCT ");
    }
    match &spec.projection {
        Projection::Columns(columns) => {
            let columns = resolve_columns(schema, columns)?;
            if columns.is_empty() {
                return Err(OrmError::StatementError(
                    "a select needs at least one column".into(),
                ));
            }
            sql.push_str(&columns.join(", "));
        }
        Projection::Count => sql.push_str("COUNT(*)"),
        Projection::RowidAll => sql.push_str("rowid, *"),
    }
    let _ = write!(sql, " FROM {table}");
    push_where(&mut sql, schema, &spec.predicate, "", &HashSet::new())?;

    if !spec.order_by.is_empty() {
        let mut terms = Vec::with_capacity(spec.order_by.len());
        for (column, order) in &spec.order_by {
            if column != "rowid" {
                schema.field(column)?;
            }
            terms.push(format!("{column} {}", order.as_sql()));
        }
        let _ = write!(sql, " ORDER BY {}", terms.join(", "));
    }
    if spec.limit {
        let _ = write!(sql, " LIMIT :{LIMIT_PARAM}");
    }
    Ok(sql)
}

/// `UPDATE [OR ...] <table> SET c1=:c1, ...[ WHERE ...]`
///
/// Column predicates bind as `:__where_<col>`. A raw clause may not reference a placeholder
/// that is also a SET column.
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for unknown columns and [`OrmError::StatementError`] for an
/// empty SET list or colliding placeholder names.
pub fn update(schema: &TableSchema, table: &TableName, spec: &UpdateSpec) -> Result<String> {
    let set = normalize_columns(schema, &spec.set)?;
    if set.is_empty() {
        return Err(OrmError::StatementError(
            "an update needs at least one SET column".into(),
        ));
    }

    let mut sql = String::from("UPDATE ");
    if let Some(or) = spec.or_option {
        let _ = write!(sql, "{} ", or.as_sql());
    }
    let assignments = set
        .iter()
        .map(|c| format!("{c}=:{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = write!(sql, "{table} SET {assignments}");

    let set_names: HashSet<&str> = set.iter().map(String::as_str).collect();
    push_where(&mut sql, schema, &spec.predicate, WHERE_PREFIX, &set_names)?;
    Ok(sql)
}

/// `DELETE FROM <table>[ WHERE ...][ RETURNING ...]`
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for unknown columns and [`OrmError::StatementError`] for a
/// malformed predicate.
pub fn delete(schema: &TableSchema, table: &TableName, spec: &DeleteSpec) -> Result<String> {
    let mut sql = format!("DELETE FROM {table}");
    push_where(&mut sql, schema, &spec.predicate, "", &HashSet::new())?;
    push_returning(&mut sql, schema, spec.returning.as_ref())?;
    Ok(sql)
}

fn resolve_columns(schema: &TableSchema, columns: &Columns) -> Result<Vec<String>> {
    match columns {
        Columns::All => Ok(schema.column_names().map(str::to_owned).collect()),
        Columns::Only(columns) => normalize_columns(schema, columns),
    }
}

fn push_returning(sql: &mut String, schema: &TableSchema, returning: Option<&Returning>) -> Result<()> {
    match returning {
        None => {}
        Some(Returning::All) => sql.push_str(" RETURNING *"),
        Some(Returning::Columns(columns)) => {
            let columns = normalize_columns(schema, columns)?;
            if columns.is_empty() {
                return Err(OrmError::StatementError(
                    "RETURNING needs at least one column".into(),
                ));
            }
            let _ = write!(sql, " RETURNING {}", columns.join(", "));
        }
    }
    Ok(())
}

fn push_where(
    sql: &mut String,
    schema: &TableSchema,
    predicate: &Predicate,
    prefix: &str,
    taken: &HashSet<&str>,
) -> Result<()> {
    match predicate {
        Predicate::All => {}
        Predicate::Columns(columns) => {
            let columns = normalize_columns(schema, columns)?;
            if columns.is_empty() {
                return Err(OrmError::StatementError(
                    "empty predicate column set; match every row explicitly instead".into(),
                ));
            }
            let terms = columns
                .iter()
                .map(|c| format!("{c}=:{prefix}{c}"))
                .collect::<Vec<_>>()
                .join(" AND ");
            let _ = write!(sql, " WHERE {terms}");
        }
        Predicate::Raw { clause, params } => {
            let clause = clause.trim();
            if clause.is_empty() {
                return Err(OrmError::StatementError("empty raw WHERE clause".into()));
            }
            check_raw_placeholders(clause, params, taken)?;
            let _ = write!(sql, " WHERE {clause}");
        }
    }
    Ok(())
}

/// Every placeholder a raw clause references must be declared, and every declared name must be
/// referenced. Neither side may reuse a SET placeholder or a builder-reserved name.
fn check_raw_placeholders(clause: &str, declared: &[String], taken: &HashSet<&str>) -> Result<()> {
    for name in declared {
        if !is_identifier(name) {
            return Err(OrmError::StatementError(format!(
                "invalid placeholder name `{name}`"
            )));
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(OrmError::StatementError(format!(
                "placeholder `:{name}` uses the reserved `{RESERVED_PREFIX}` prefix"
            )));
        }
    }
    let referenced = scan_placeholders(clause)?;
    for name in &referenced {
        if taken.contains(name) {
            return Err(OrmError::StatementError(format!(
                "placeholder `:{name}` is used by both SET and the WHERE clause"
            )));
        }
        if !declared.iter().any(|d| d == name) {
            return Err(OrmError::StatementError(format!(
                "placeholder `:{name}` in the WHERE clause is not declared"
            )));
        }
    }
    if let Some(unused) = declared.iter().find(|d| !referenced.contains(&d.as_str())) {
        return Err(OrmError::StatementError(format!(
            "placeholder `:{unused}` does not appear in the WHERE clause"
        )));
    }
    Ok(())
}

/// Named placeholders in `clause`, skipping quoted strings and identifiers.
///
/// Only `:name` binds; `?`, `@name` and `$name` are rejected because nothing would bind them.
fn scan_placeholders(clause: &str) -> Result<Vec<&str>> {
    let bytes = clause.as_bytes();
    let mut found = Vec::new();
    let mut closing_quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = closing_quote {
            if b == q {
                closing_quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => closing_quote = Some(b),
            b'[' => closing_quote = Some(b']'),
            b'?' => {
                return Err(OrmError::StatementError(
                    "positional placeholders are not supported in a raw clause; use :name".into(),
                ));
            }
            b':' | b'@' | b'$' => {
                let start = i + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|c| !(c.is_ascii_alphanumeric() || *c == b'_'))
                    .map_or(bytes.len(), |p| start + p);
                if end > start {
                    let name = &clause[start..end];
                    if b != b':' || !is_identifier(name) {
                        return Err(OrmError::StatementError(format!(
                            "unsupported placeholder `{}{name}` in raw clause; use :name",
                            char::from(b)
                        )));
                    }
                    if !found.contains(&name) {
                        found.push(name);
                    }
                    i = end;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::FieldType;
    use crate::schema::FieldDecl;
    use crate::types::{OrOption, Order};

    fn schema() -> TableSchema {
        TableSchema::from_decls(vec![
            FieldDecl::new("id", FieldType::Integer).constraint("PRIMARY KEY"),
            FieldDecl::new("kind", FieldType::Text),
            FieldDecl::new("payload", FieldType::Blob),
        ])
        .unwrap()
    }

    fn table() -> TableName {
        TableName::parse("entries").unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn insert_forms() {
        let schema = schema();
        assert_eq!(
            insert(&schema, &table(), &InsertSpec::all()).unwrap(),
            "INSERT INTO entries (id, kind, payload) VALUES (:id, :kind, :payload)"
        );
        let spec = InsertSpec {
            columns: Columns::Only(cols(&["kind"])),
            or_option: Some(OrOption::Replace),
            returning: Some(Returning::Columns(cols(&["id"]))),
        };
        assert_eq!(
            insert(&schema, &table(), &spec).unwrap(),
            "INSERT OR REPLACE INTO entries (kind) VALUES (:kind) RETURNING id"
        );
        let spec = InsertSpec {
            columns: Columns::Only(Vec::new()),
            or_option: None,
            returning: Some(Returning::All),
        };
        assert_eq!(
            insert(&schema, &table(), &spec).unwrap(),
            "INSERT INTO entries DEFAULT VALUES RETURNING *"
        );
    }

    #[test]
    fn select_forms() {
        let schema = schema();
        let all = SelectSpec::new(Projection::Columns(Columns::All), Predicate::All);
        assert_eq!(
            select(&schema, &table(), &all).unwrap(),
            "SELECT id, kind, payload FROM entries"
        );

        let mut spec = SelectSpec::new(
            Projection::Columns(Columns::Only(cols(&["kind"]))),
            Predicate::Columns(cols(&["id", "kind"])),
        );
        spec.distinct = true;
        spec.order_by = vec![("id".into(), Order::Desc)];
        spec.limit = true;
        assert_eq!(
            select(&schema, &table(), &spec).unwrap(),
            "SELECT DISTINCT kind FROM entries WHERE id=:id AND kind=:kind ORDER BY id DESC LIMIT :__limit"
        );

        let count = SelectSpec::new(Projection::Count, Predicate::Columns(cols(&["kind"])));
        assert_eq!(
            select(&schema, &table(), &count).unwrap(),
            "SELECT COUNT(*) FROM entries WHERE kind=:kind"
        );
    }

    #[test]
    fn select_unknown_predicate_column_is_schema_error() {
        let spec = SelectSpec::new(
            Projection::Columns(Columns::All),
            Predicate::Columns(cols(&["nope"])),
        );
        assert!(matches!(
            select(&schema(), &table(), &spec),
            Err(OrmError::SchemaError(_))
        ));
    }

    #[test]
    fn empty_predicate_must_be_explicit() {
        let spec = DeleteSpec {
            predicate: Predicate::Columns(Vec::new()),
            returning: None,
        };
        assert!(matches!(
            delete(&schema(), &table(), &spec),
            Err(OrmError::StatementError(_))
        ));
        let spec = DeleteSpec {
            predicate: Predicate::All,
            returning: None,
        };
        assert_eq!(
            delete(&schema(), &table(), &spec).unwrap(),
            "DELETE FROM entries"
        );
    }

    #[test]
    fn update_with_column_predicate_uses_where_prefix() {
        let spec = UpdateSpec {
            set: cols(&["kind", "payload"]),
            predicate: Predicate::Columns(cols(&["kind"])),
            or_option: None,
        };
        assert_eq!(
            update(&schema(), &table(), &spec).unwrap(),
            "UPDATE entries SET kind=:kind, payload=:payload WHERE kind=:__where_kind"
        );
    }

    #[test]
    fn update_with_raw_clause() {
        let spec = UpdateSpec {
            set: cols(&["kind"]),
            predicate: Predicate::Raw {
                clause: "id > :lo AND id < :hi".into(),
                params: cols(&["lo", "hi"]),
            },
            or_option: Some(OrOption::Ignore),
        };
        assert_eq!(
            update(&schema(), &table(), &spec).unwrap(),
            "UPDATE OR IGNORE entries SET kind=:kind WHERE id > :lo AND id < :hi"
        );
    }

    #[test]
    fn raw_clause_collisions_and_typos_are_statement_errors() {
        let colliding = UpdateSpec {
            set: cols(&["kind"]),
            predicate: Predicate::Raw {
                clause: "kind = :kind".into(),
                params: cols(&["kind"]),
            },
            or_option: None,
        };
        assert!(matches!(
            update(&schema(), &table(), &colliding),
            Err(OrmError::StatementError(_))
        ));

        let missing = UpdateSpec {
            set: cols(&["kind"]),
            predicate: Predicate::Raw {
                clause: "id > :lower".into(),
                params: cols(&["low"]),
            },
            or_option: None,
        };
        assert!(matches!(
            update(&schema(), &table(), &missing),
            Err(OrmError::StatementError(_))
        ));

        let empty_set = UpdateSpec {
            set: Vec::new(),
            predicate: Predicate::All,
            or_option: None,
        };
        assert!(update(&schema(), &table(), &empty_set).is_err());
    }

    #[test]
    fn raw_clause_must_declare_every_placeholder_it_uses() {
        // `:kind` is the SET placeholder; referencing it undeclared would bind the new value.
        let shadowing = UpdateSpec {
            set: cols(&["kind"]),
            predicate: Predicate::Raw {
                clause: "kind = :kind".into(),
                params: Vec::new(),
            },
            or_option: None,
        };
        let err = update(&schema(), &table(), &shadowing).unwrap_err();
        assert!(matches!(err, OrmError::StatementError(ref m) if m.contains("SET")), "{err}");

        let typo = SelectSpec::new(
            Projection::Count,
            Predicate::Raw {
                clause: "id = :idd".into(),
                params: Vec::new(),
            },
        );
        let err = select(&schema(), &table(), &typo).unwrap_err();
        assert!(matches!(err, OrmError::StatementError(ref m) if m.contains(":idd")), "{err}");

        let reserved = SelectSpec::new(
            Projection::Count,
            Predicate::Raw {
                clause: "id < :__limit".into(),
                params: cols(&["__limit"]),
            },
        );
        assert!(select(&schema(), &table(), &reserved).is_err());
    }

    #[test]
    fn placeholder_scan_skips_quoted_text() {
        assert_eq!(
            scan_placeholders("a = :x AND b = :xy AND c = ':z' AND \"d:w\" = :x").unwrap(),
            ["x", "xy"]
        );
        assert!(scan_placeholders("a = ?").is_err());
        assert!(scan_placeholders("a = @x").is_err());
        assert!(scan_placeholders("a = '?'").unwrap().is_empty());
    }

    #[test]
    fn explicit_column_lists_are_deduplicated() {
        let spec = InsertSpec {
            columns: Columns::Only(cols(&["payload", "id", "payload"])),
            or_option: None,
            returning: None,
        };
        assert_eq!(
            insert(&schema(), &table(), &spec).unwrap(),
            "INSERT INTO entries (id, payload) VALUES (:id, :payload)"
        );
        let spec = UpdateSpec {
            set: cols(&["kind", "kind"]),
            predicate: Predicate::Columns(cols(&["id", "id"])),
            or_option: None,
        };
        assert_eq!(
            update(&schema(), &table(), &spec).unwrap(),
            "UPDATE entries SET kind=:kind WHERE id=:__where_id"
        );
    }
}
