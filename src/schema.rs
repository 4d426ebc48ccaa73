//! Column metadata: the ordered, resolved view of a table declaration.

mod field;
mod registry;

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{OrmError, Result};
use crate::types::RowMapping;

pub use field::{FieldDecl, FieldSpec};
pub use registry::schema_of;

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

/// Whether `name` can be spliced into statement text as a bare identifier.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(name))
}

/// A record type that maps onto one table.
///
/// ```rust
/// use sqlite_tablespec::prelude::*;
/// use sqlite_tablespec::schema_of;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Entry {
///     id: i64,
///     kind: String,
///     payload: Vec<u8>,
/// }
///
/// impl TableSpec for Entry {
///     fn fields() -> Vec<FieldDecl> {
///         vec![
///             FieldDecl::new("id", FieldType::Integer).constraint("PRIMARY KEY"),
///             FieldDecl::new("kind", FieldType::Text).constraint("CHECK(kind IN ('A','B'))"),
///             FieldDecl::new("payload", FieldType::Blob).constraint("NOT NULL"),
///         ]
///     }
///
///     fn to_fields(&self) -> RowMapping {
///         RowMapping::new()
///             .with("id", self.id)
///             .with("kind", self.kind.as_str())
///             .with("payload", self.payload.clone())
///     }
///
///     fn from_fields(mut row: RowMapping) -> Result<Self, OrmError> {
///         Ok(Self {
///             id: row.take("id")?,
///             kind: row.take("kind")?,
///             payload: row.take("payload")?,
///         })
///     }
/// }
///
/// let schema = schema_of::<Entry>().unwrap();
/// assert_eq!(schema.column_names().collect::<Vec<_>>(), ["id", "kind", "payload"]);
/// ```
pub trait TableSpec: Sized + Send + 'static {
    /// Column declarations in table order.
    fn fields() -> Vec<FieldDecl>;

    /// Every declared column of this record.
    fn to_fields(&self) -> RowMapping;

    /// # Errors
    ///
    /// Returns an error when the mapping does not describe a valid record.
    fn from_fields(row: RowMapping) -> Result<Self>;

    /// Record-level validation run on insert and after decoding.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ValidationError`] describing the violated rule.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Ordered column schema of one table type.
#[derive(Debug, Clone)]
pub struct TableSchema {
    fields: Vec<FieldSpec>,
    positions: HashMap<String, usize>,
}

impl TableSchema {
    /// Resolve a declaration list.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::SchemaError`] for an empty list, a duplicate or malformed name, or a
    /// type without a resolvable affinity.
    pub fn from_decls(decls: Vec<FieldDecl>) -> Result<Self> {
        if decls.is_empty() {
            return Err(OrmError::SchemaError("a table needs at least one column".into()));
        }
        let mut fields = Vec::with_capacity(decls.len());
        let mut positions = HashMap::with_capacity(decls.len());
        for decl in decls {
            let spec = decl.resolve()?;
            if positions.insert(spec.name().to_owned(), fields.len()).is_some() {
                return Err(OrmError::SchemaError(format!(
                    "column `{}` is declared twice",
                    spec.name()
                )));
            }
            fields.push(spec);
        }
        Ok(Self { fields, positions })
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(FieldSpec::name)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    /// # Errors
    ///
    /// Returns [`OrmError::SchemaError`] when `column` is not declared.
    pub fn field(&self, column: &str) -> Result<&FieldSpec> {
        self.positions
            .get(column)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| unknown_column(column))
    }

    /// Check `columns` against the schema and return them deduplicated, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::SchemaError`] naming the first unknown column.
    pub fn ordered<'a, I>(&self, columns: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut positions = columns
            .into_iter()
            .map(|c| self.positions.get(c).copied().ok_or_else(|| unknown_column(c)))
            .collect::<Result<Vec<_>>>()?;
        positions.sort_unstable();
        positions.dedup();
        Ok(positions
            .into_iter()
            .map(|i| self.fields[i].name().to_owned())
            .collect())
    }

    /// Declaration-ordered column list of a mapping's keys.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::SchemaError`] when a key is not a declared column.
    pub fn ordered_keys(&self, row: &RowMapping) -> Result<Vec<String>> {
        self.ordered(row.columns())
    }
}

fn unknown_column(column: &str) -> OrmError {
    OrmError::SchemaError(format!("unknown column `{column}`"))
}
