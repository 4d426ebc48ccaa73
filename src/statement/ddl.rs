use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, Result};
use crate::schema::{FieldSpec, TableSchema, is_identifier};
use crate::types::Order;

use super::TableName;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTableOptions {
    pub temporary: bool,
    pub if_not_exists: bool,
    pub without_rowid: bool,
    pub strict: bool,
}

impl CreateTableOptions {
    #[must_use]
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    #[must_use]
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    #[must_use]
    pub fn without_rowid(mut self) -> Self {
        self.without_rowid = true;
        self
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// One index over the owning table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<(String, Option<Order>)>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub if_not_exists: bool,
}

impl IndexSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            unique: false,
            if_not_exists: false,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push((column.into(), None));
        self
    }

    #[must_use]
    pub fn column_ordered(mut self, column: impl Into<String>, order: Order) -> Self {
        self.columns.push((column.into(), Some(order)));
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }
}

/// `CREATE [TEMPORARY] TABLE [IF NOT EXISTS] <name> (<defs>)[ WITHOUT ROWID][, STRICT]`
#[must_use]
pub fn create_table(schema: &TableSchema, table: &TableName, opts: &CreateTableOptions) -> String {
    let mut sql = String::from("CREATE ");
    if opts.temporary {
        sql.push_str("TEMPORARY ");
    }
    sql.push_str("TABLE ");
    if opts.if_not_exists {
        sql.push_str("IF NOT EXISTS ");
    }
    let defs = schema
        .fields()
        .iter()
        .map(FieldSpec::column_def)
        .collect::<Vec<_>>()
        .join(", ");
    let _ = write!(sql, "{table} ({defs})");

    let mut table_opts = Vec::with_capacity(2);
    if opts.without_rowid {
        table_opts.push("WITHOUT ROWID");
    }
    if opts.strict {
        table_opts.push("STRICT");
    }
    if !table_opts.is_empty() {
        sql.push(' ');
        sql.push_str(&table_opts.join(", "));
    }
    sql
}

/// `CREATE [UNIQUE] INDEX [IF NOT EXISTS] <index> ON <table> (<c1> [ASC|DESC], ...)`
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for an empty column list, an unknown column or an invalid
/// index name.
pub fn create_index(schema: &TableSchema, table: &TableName, index: &IndexSpec) -> Result<String> {
    if !is_identifier(&index.name) {
        return Err(OrmError::SchemaError(format!(
            "invalid index name `{}`",
            index.name
        )));
    }
    if index.columns.is_empty() {
        return Err(OrmError::SchemaError(format!(
            "index `{}` has no columns",
            index.name
        )));
    }
    let mut cols = Vec::with_capacity(index.columns.len());
    for (column, order) in &index.columns {
        schema.field(column)?;
        cols.push(match order {
            Some(order) => format!("{column} {}", order.as_sql()),
            None => column.clone(),
        });
    }

    let mut sql = String::from("CREATE ");
    if index.unique {
        sql.push_str("UNIQUE ");
    }
    sql.push_str("INDEX ");
    if index.if_not_exists {
        sql.push_str("IF NOT EXISTS ");
    }
    // The schema qualifies the index; SQLite requires the ON target to be unqualified.
    if let Some(db) = table.schema() {
        let _ = write!(sql, "{db}.");
    }
    let _ = write!(
        sql,
        "{} ON {} ({})",
        index.name,
        table.table(),
        cols.join(", ")
    );
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::FieldType;
    use crate::schema::FieldDecl;

    fn schema() -> TableSchema {
        TableSchema::from_decls(vec![
            FieldDecl::new("id", FieldType::Integer).constraint("PRIMARY KEY"),
            FieldDecl::new("kind", FieldType::Text).constraint("CHECK(kind IN ('A','B'))"),
            FieldDecl::new("payload", FieldType::Blob).constraint("NOT NULL"),
        ])
        .unwrap()
    }

    #[test]
    fn create_table_plain_and_with_options() {
        let schema = schema();
        let table = TableName::parse("entries").unwrap();
        assert_eq!(
            create_table(&schema, &table, &CreateTableOptions::default()),
            "CREATE TABLE entries (id INTEGER PRIMARY KEY, kind TEXT CHECK(kind IN ('A','B')), payload BLOB NOT NULL)"
        );
        let opts = CreateTableOptions::default()
            .temporary()
            .if_not_exists()
            .without_rowid()
            .strict();
        let sql = create_table(&schema, &table, &opts);
        assert!(sql.starts_with("CREATE TEMPORARY TABLE IF NOT EXISTS entries ("));
        assert!(sql.ends_with(") WITHOUT ROWID, STRICT"));
    }

    #[test]
    fn create_index_variants() {
        let schema = schema();
        let table = TableName::parse("entries").unwrap();
        let idx = IndexSpec::new("entries_kind")
            .column("kind")
            .column_ordered("id", Order::Desc)
            .unique()
            .if_not_exists();
        assert_eq!(
            create_index(&schema, &table, &idx).unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS entries_kind ON entries (kind, id DESC)"
        );

        let qualified = TableName::parse("temp.entries").unwrap();
        let idx = IndexSpec::new("entries_kind").column("kind");
        assert_eq!(
            create_index(&schema, &qualified, &idx).unwrap(),
            "CREATE INDEX temp.entries_kind ON entries (kind)"
        );
    }

    #[test]
    fn create_index_rejects_unknown_or_missing_columns() {
        let schema = schema();
        let table = TableName::parse("entries").unwrap();
        let unknown = IndexSpec::new("i").column("nope");
        assert!(matches!(
            create_index(&schema, &table, &unknown),
            Err(OrmError::SchemaError(_))
        ));
        assert!(matches!(
            create_index(&schema, &table, &IndexSpec::new("i")),
            Err(OrmError::SchemaError(_))
        ));
    }

    #[test]
    fn table_names_are_checked() {
        assert!(TableName::parse("main.entries").is_ok());
        assert!(TableName::parse("entries; DROP TABLE x").is_err());
        assert!(TableName::parse("a.b.c").is_err());
        assert_eq!(
            TableName::parse("temp.entries").unwrap().to_string(),
            "temp.entries"
        );
    }
}
