//! Conversion between records, partial mappings, bound parameters and engine rows.

use rusqlite::ToSql;

use crate::error::{OrmError, Result};
use crate::schema::{TableSchema, TableSpec};
use crate::types::{FieldValue, RowMapping, SqlValue};

/// Named parameters ready for binding; names carry their leading `:`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams(Vec<(String, SqlValue)>);

impl NamedParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `:name`, replacing any earlier value bound to the same name.
    pub fn push(&mut self, name: &str, value: SqlValue) {
        let key = format!(":{name}");
        match self.0.iter_mut().find(|(n, _)| *n == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.0
            .iter()
            .find(|(n, _)| n.strip_prefix(':') == Some(name))
            .map(|(_, v)| v)
    }

    /// Append every entry of `other`.
    pub fn extend(&mut self, other: NamedParams) {
        for (name, value) in other.0 {
            let bare = name.trim_start_matches(':').to_owned();
            self.push(&bare, value);
        }
    }

    /// Borrowed view in the shape rusqlite's named binding expects.
    #[must_use]
    pub fn as_refs(&self) -> Vec<(&str, &dyn ToSql)> {
        self.0
            .iter()
            .map(|(n, v)| (n.as_str(), v as &dyn ToSql))
            .collect()
    }
}

/// Bind caller values that are not tied to a column (raw WHERE placeholders, `execute_raw`).
#[must_use]
pub fn encode_untyped(values: &RowMapping) -> NamedParams {
    let mut params = NamedParams::new();
    for (name, value) in values.iter() {
        params.push(name, value.to_native());
    }
    params
}

/// Validate and serialize every declared column of `record`.
///
/// # Errors
///
/// Returns [`OrmError::ValidationError`] when the record or one of its values is rejected, and
/// [`OrmError::SchemaError`] when the record reports an undeclared column.
pub fn encode_record<T: TableSpec>(schema: &TableSchema, record: &T) -> Result<NamedParams> {
    record.validate()?;
    let mut values = record.to_fields();
    let mut params = NamedParams::new();
    for field in schema.fields() {
        let value = values.remove(field.name()).unwrap_or(FieldValue::Null);
        params.push(field.name(), field.resolved().serialize(field.name(), &value)?);
    }
    if let Some(extra) = values.columns().next() {
        return Err(OrmError::SchemaError(format!(
            "record reports undeclared column `{extra}`"
        )));
    }
    Ok(params)
}

/// Serialize only the columns present in `row`, bound under `prefix` + column name.
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] for keys outside the schema and
/// [`OrmError::ValidationError`] for values the column type rejects.
pub fn encode_mapping(schema: &TableSchema, row: &RowMapping, prefix: &str) -> Result<NamedParams> {
    let mut params = NamedParams::new();
    for (column, value) in row.iter() {
        let field = schema.field(column)?;
        let stored = field.resolved().serialize(column, value)?;
        params.push(&format!("{prefix}{column}"), stored);
    }
    Ok(params)
}

/// Where each declared column sits in a result row.
#[derive(Debug, Clone)]
pub struct RowLayout {
    slots: Vec<(usize, Option<usize>)>,
}

impl RowLayout {
    /// Layout for decoding whole records. Result columns before `skip` are ignored, which lets
    /// `SELECT rowid, *` share this path.
    #[must_use]
    pub fn for_record(schema: &TableSchema, column_names: &[&str], skip: usize) -> Self {
        let slots = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let pos = column_names
                    .iter()
                    .skip(skip)
                    .position(|c| *c == field.name())
                    .map(|p| p + skip);
                (i, pos)
            })
            .collect();
        Self { slots }
    }

    /// Layout for decoding only the declared columns a statement actually returns.
    #[must_use]
    pub fn for_mapping(schema: &TableSchema, column_names: &[&str]) -> Self {
        let slots = column_names
            .iter()
            .enumerate()
            .filter_map(|(pos, name)| {
                schema
                    .fields()
                    .iter()
                    .position(|f| f.name() == *name)
                    .map(|i| (i, Some(pos)))
            })
            .collect();
        Self { slots }
    }

    /// Decode one row into a partial mapping.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::DecodeError`] when a stored value no longer fits its column type.
    pub fn decode_mapping(&self, schema: &TableSchema, row: &rusqlite::Row<'_>) -> Result<RowMapping> {
        let mut mapping = RowMapping::new();
        for &(field_idx, pos) in &self.slots {
            let field = &schema.fields()[field_idx];
            let value = match pos {
                Some(pos) => {
                    let raw: SqlValue = row.get(pos)?;
                    field
                        .resolved()
                        .deserialize(field.name(), raw)
                        .map_err(into_decode)?
                }
                None if field.is_optional() => FieldValue::Null,
                None => {
                    return Err(OrmError::DecodeError(format!(
                        "result has no column `{}`",
                        field.name()
                    )));
                }
            };
            mapping.insert(field.name(), value);
        }
        Ok(mapping)
    }

    /// Decode one row into a validated record.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::DecodeError`] when the row does not form a valid `T`.
    pub fn decode<T: TableSpec>(&self, schema: &TableSchema, row: &rusqlite::Row<'_>) -> Result<T> {
        let mapping = self.decode_mapping(schema, row)?;
        let record = T::from_fields(mapping).map_err(into_decode)?;
        record.validate().map_err(into_decode)?;
        Ok(record)
    }
}

fn into_decode(err: OrmError) -> OrmError {
    match err {
        OrmError::DecodeError(_) | OrmError::SqliteError(_) | OrmError::EngineError { .. } => err,
        other => OrmError::DecodeError(other.to_string()),
    }
}
