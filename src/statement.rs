//! Statement synthesis: pure functions from a [`TableSchema`] and a requested shape to SQL text.
//!
//! Values never appear in the generated text. Every value position is a named placeholder
//! (`:column`), and identifiers are only spliced in after they have been checked against the
//! schema or the identifier grammar. The one exception is a caller-supplied raw WHERE clause
//! ([`Predicate::Raw`]), whose text is trusted as written; its values are still bound.

mod cache;
mod ddl;
mod dml;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, Result};
use crate::schema::{TableSchema, is_identifier};
use crate::types::{OrOption, Order};

pub use cache::{RAW_STATEMENT_CAPACITY, StatementCache, StatementKey};
pub use ddl::{CreateTableOptions, IndexSpec, create_index, create_table};
pub use dml::{LIMIT_PARAM, WHERE_PREFIX, delete, insert, select, update};

/// Table name, optionally qualified by an attached schema (`temp.entries`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    table: String,
}

impl TableName {
    /// # Errors
    ///
    /// Returns [`OrmError::SchemaError`] when either part is not a plain identifier.
    pub fn parse(name: &str) -> Result<Self> {
        let (schema, table) = match name.split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, name),
        };
        for part in schema.iter().chain([&table]) {
            if !is_identifier(part) {
                return Err(OrmError::SchemaError(format!("invalid table name `{name}`")));
            }
        }
        Ok(Self {
            schema: schema.map(str::to_owned),
            table: table.to_owned(),
        })
    }

    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}

/// Column set of an INSERT or SELECT.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Columns {
    All,
    Only(Vec<String>),
}

/// WHERE clause of a SELECT, UPDATE or DELETE.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// No WHERE clause; the statement touches every row.
    All,
    /// `c1=:c1 AND c2=:c2 ...`; must name at least one column.
    Columns(Vec<String>),
    /// Caller-written expression, emitted as `WHERE <clause>`. Each name in `params` is an
    /// extra placeholder the clause references as `:name`.
    Raw { clause: String, params: Vec<String> },
}

/// RETURNING clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Returning {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Projection {
    Columns(Columns),
    /// `COUNT(*)`
    Count,
    /// `rowid, *`, used by rowid seek pagination.
    RowidAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsertSpec {
    pub columns: Columns,
    pub or_option: Option<OrOption>,
    pub returning: Option<Returning>,
}

impl InsertSpec {
    #[must_use]
    pub fn all() -> Self {
        Self {
            columns: Columns::All,
            or_option: None,
            returning: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectSpec {
    pub projection: Projection,
    pub distinct: bool,
    pub predicate: Predicate,
    /// `rowid` is accepted here besides declared columns.
    pub order_by: Vec<(String, Order)>,
    /// Emit `LIMIT :__limit`; the row count is bound like any other value.
    pub limit: bool,
}

impl SelectSpec {
    #[must_use]
    pub fn new(projection: Projection, predicate: Predicate) -> Self {
        Self {
            projection,
            distinct: false,
            predicate,
            order_by: Vec::new(),
            limit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateSpec {
    pub set: Vec<String>,
    pub predicate: Predicate,
    pub or_option: Option<OrOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteSpec {
    pub predicate: Predicate,
    pub returning: Option<Returning>,
}

/// Create-table options plus indexes, applied together by `bootstrap`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBootstrap {
    pub table_name: String,
    #[serde(default)]
    pub create_table: CreateTableOptions,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl TableBootstrap {
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn table_options(mut self, options: CreateTableOptions) -> Self {
        self.create_table = options;
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Declared columns, deduplicated and in table order.
fn normalize_columns(schema: &TableSchema, columns: &[String]) -> Result<Vec<String>> {
    schema.ordered(columns.iter().map(String::as_str))
}
