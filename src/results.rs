use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Statement;

use crate::codec::NamedParams;
use crate::error::{OrmError, Result};
use crate::types::{FieldValue, SqlValue};

/// A row returned by a caller-written statement.
///
/// Column names and the name-to-index map are shared by every row of one result.
#[derive(Debug, Clone)]
pub struct EngineRow {
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    /// The values for this row
    pub values: Vec<FieldValue>,
}

impl EngineRow {
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_index.get(column_name).copied()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&FieldValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }
}

/// Output of `execute_raw`: returned rows plus the change count of the statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the statement
    pub rows: Vec<EngineRow>,
    /// Rows inserted, updated or deleted by the statement (0 for a plain SELECT)
    pub rows_affected: usize,
}

impl ResultSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Run `stmt` to completion and collect every row untyped.
///
/// # Errors
///
/// Returns [`OrmError::EngineError`] carrying `sql` if the engine rejects the statement.
pub(crate) fn build_result_set(
    conn: &rusqlite::Connection,
    stmt: &mut Statement<'_>,
    sql: &str,
    params: &NamedParams,
) -> Result<ResultSet> {
    let column_names: Arc<Vec<String>> = Arc::new(
        stmt.column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
    );
    let column_index = Arc::new(
        column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect::<HashMap<_, _>>(),
    );
    let col_count = column_names.len();
    let changes_before = conn.total_changes();

    let mut result_set = ResultSet::default();
    let mut rows = stmt
        .query(params.as_refs().as_slice())
        .map_err(|e| OrmError::engine(sql, e))?;
    while let Some(row) = rows.next().map_err(|e| OrmError::engine(sql, e))? {
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            let value: SqlValue = row.get(i)?;
            values.push(FieldValue::from_native(value));
        }
        result_set.rows.push(EngineRow {
            column_names: Arc::clone(&column_names),
            column_index: Arc::clone(&column_index),
            values,
        });
    }
    drop(rows);
    result_set.rows_affected =
        usize::try_from(conn.total_changes().saturating_sub(changes_before)).unwrap_or(usize::MAX);
    Ok(result_set)
}
