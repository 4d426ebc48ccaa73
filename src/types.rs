use std::collections::BTreeMap;
use std::collections::btree_map;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{OrmError, Result};

/// Primitive value exchanged with the engine.
pub use rusqlite::types::Value as SqlValue;

/// Text layout used for `NaiveDateTime` when no column-specific representation applies.
pub(crate) const ISO8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Application-side value of a single column.
///
/// Records hand these to the ORM through [`crate::TableSpec::to_fields`] and receive them back in
/// [`crate::TableSpec::from_fields`]; the column's resolved type decides how each one is stored:
/// ```rust
/// use sqlite_tablespec::prelude::*;
///
/// let row = RowMapping::new()
///     .with("id", 1)
///     .with("kind", "A")
///     .with("payload", vec![0x78_u8]);
/// assert_eq!(row.get("kind"), Some(&FieldValue::Text("A".into())));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value, naive UTC
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl FieldValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let FieldValue::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let FieldValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let FieldValue::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let FieldValue::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            if let Ok(dt) = s.parse::<NaiveDateTime>() {
                return Some(dt);
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let FieldValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let FieldValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Short name of the variant, used in validation messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "integer",
            FieldValue::Float(_) => "real",
            FieldValue::Text(_) => "text",
            FieldValue::Bool(_) => "bool",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Null => "NULL",
            FieldValue::Json(_) => "json",
            FieldValue::Blob(_) => "blob",
        }
    }

    /// Storage form used when no column type is known (raw WHERE placeholders, `execute_raw`).
    #[must_use]
    pub fn to_native(&self) -> SqlValue {
        match self {
            FieldValue::Int(i) => SqlValue::Integer(*i),
            FieldValue::Float(f) => SqlValue::Real(*f),
            FieldValue::Text(s) => SqlValue::Text(s.clone()),
            FieldValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
            FieldValue::Timestamp(dt) => SqlValue::Text(dt.format(ISO8601_FORMAT).to_string()),
            FieldValue::Null => SqlValue::Null,
            FieldValue::Json(j) => SqlValue::Text(j.to_string()),
            FieldValue::Blob(bytes) => SqlValue::Blob(bytes.clone()),
        }
    }

    /// Inverse of [`FieldValue::to_native`] without any column type information.
    #[must_use]
    pub fn from_native(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => FieldValue::Null,
            SqlValue::Integer(i) => FieldValue::Int(i),
            SqlValue::Real(f) => FieldValue::Float(f),
            SqlValue::Text(s) => FieldValue::Text(s),
            SqlValue::Blob(b) => FieldValue::Blob(b),
        }
    }
}

macro_rules! impl_into_field_value {
    ($($ty:ty => $variant:ident via $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::$variant($conv(value))
                }
            }
        )*
    };
}

impl_into_field_value! {
    i64 => Int via std::convert::identity,
    i32 => Int via i64::from,
    i16 => Int via i64::from,
    u32 => Int via i64::from,
    u8 => Int via i64::from,
    f64 => Float via std::convert::identity,
    f32 => Float via f64::from,
    bool => Bool via std::convert::identity,
    String => Text via std::convert::identity,
    &str => Text via str::to_owned,
    Vec<u8> => Blob via std::convert::identity,
    &[u8] => Blob via <[u8]>::to_vec,
    NaiveDateTime => Timestamp via std::convert::identity,
    JsonValue => Json via std::convert::identity,
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Conversion out of a [`FieldValue`] for use in [`crate::TableSpec::from_fields`].
pub trait FromFieldValue: Sized {
    /// # Errors
    ///
    /// Returns a short description when the value has the wrong shape.
    fn from_field_value(value: FieldValue) -> std::result::Result<Self, String>;
}

macro_rules! impl_from_field_value {
    ($($ty:ty, $expected:literal => |$v:ident| $body:expr);* $(;)?) => {
        $(
            impl FromFieldValue for $ty {
                fn from_field_value(value: FieldValue) -> std::result::Result<Self, String> {
                    let found = value.kind();
                    let $v = value;
                    $body.ok_or_else(|| format!("expected {}, got {found}", $expected))
                }
            }
        )*
    };
}

impl_from_field_value! {
    i64, "integer" => |v| v.as_int().copied();
    i32, "32-bit integer" => |v| v.as_int().and_then(|i| i32::try_from(*i).ok());
    f64, "real" => |v| match v {
        FieldValue::Float(f) => Some(f),
        #[allow(clippy::cast_precision_loss)]
        FieldValue::Int(i) => Some(i as f64),
        _ => None,
    };
    bool, "bool" => |v| v.as_bool().copied();
    String, "text" => |v| match v {
        FieldValue::Text(s) => Some(s),
        _ => None,
    };
    Vec<u8>, "blob" => |v| match v {
        FieldValue::Blob(b) => Some(b),
        _ => None,
    };
    NaiveDateTime, "timestamp" => |v| v.as_timestamp();
    JsonValue, "json" => |v| match v {
        FieldValue::Json(j) => Some(j),
        FieldValue::Text(s) => serde_json::from_str(&s).ok(),
        _ => None,
    };
}

impl<T: FromFieldValue> FromFieldValue for Option<T> {
    fn from_field_value(value: FieldValue) -> std::result::Result<Self, String> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_field_value(value).map(Some)
        }
    }
}

impl FromFieldValue for FieldValue {
    fn from_field_value(value: FieldValue) -> std::result::Result<Self, String> {
        Ok(value)
    }
}

/// Enumeration stored as its integer value.
pub trait IntEnum: Copy + Sized + 'static {
    fn variants() -> &'static [Self];
    fn to_int(self) -> i64;

    #[must_use]
    fn from_int(value: i64) -> Option<Self> {
        Self::variants().iter().copied().find(|v| v.to_int() == value)
    }
}

/// Enumeration stored as its string value.
pub trait StrEnum: Copy + Sized + 'static {
    fn variants() -> &'static [Self];
    fn as_str(self) -> &'static str;

    #[must_use]
    fn from_str_value(value: &str) -> Option<Self> {
        Self::variants().iter().copied().find(|v| v.as_str() == value)
    }
}

/// Unordered column-name to value set used by partial-column operations and by the typed model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMapping(BTreeMap<String, FieldValue>);

impl RowMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, column: &str, value: impl Into<FieldValue>) -> Self {
        self.0.insert(column.to_owned(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(column.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.0.get(column)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<FieldValue> {
        self.0.remove(column)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Remove `column` and convert it; a missing column reads as NULL.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ValidationError`] when the value cannot be converted to `V`.
    pub fn take<V: FromFieldValue>(&mut self, column: &str) -> Result<V> {
        let value = self.0.remove(column).unwrap_or(FieldValue::Null);
        V::from_field_value(value)
            .map_err(|e| OrmError::ValidationError(format!("column `{column}`: {e}")))
    }

    /// Remove `column` and map its integer value onto `E`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ValidationError`] when the value is not one of `E`'s variants.
    pub fn take_int_enum<E: IntEnum>(&mut self, column: &str) -> Result<E> {
        let raw: i64 = self.take(column)?;
        E::from_int(raw).ok_or_else(|| {
            OrmError::ValidationError(format!("column `{column}`: {raw} is not a valid variant"))
        })
    }

    /// Optional flavor of [`RowMapping::take_int_enum`].
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ValidationError`] when a non-NULL value is not one of `E`'s variants.
    pub fn take_opt_int_enum<E: IntEnum>(&mut self, column: &str) -> Result<Option<E>> {
        match self.take::<Option<i64>>(column)? {
            None => Ok(None),
            Some(raw) => E::from_int(raw).map(Some).ok_or_else(|| {
                OrmError::ValidationError(format!(
                    "column `{column}`: {raw} is not a valid variant"
                ))
            }),
        }
    }

    /// Remove `column` and map its string value onto `E`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ValidationError`] when the value is not one of `E`'s variants.
    pub fn take_str_enum<E: StrEnum>(&mut self, column: &str) -> Result<E> {
        let raw: String = self.take(column)?;
        E::from_str_value(&raw).ok_or_else(|| {
            OrmError::ValidationError(format!("column `{column}`: {raw:?} is not a valid variant"))
        })
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for RowMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for RowMapping {
    type Item = (String, FieldValue);
    type IntoIter = btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Conflict resolution clause for INSERT and UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrOption {
    Abort,
    Fail,
    Ignore,
    Replace,
    Rollback,
}

impl OrOption {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            OrOption::Abort => "OR ABORT",
            OrOption::Fail => "OR FAIL",
            OrOption::Ignore => "OR IGNORE",
            OrOption::Replace => "OR REPLACE",
            OrOption::Rollback => "OR ROLLBACK",
        }
    }
}

/// Sort direction for ORDER BY and index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}
