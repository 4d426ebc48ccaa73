//! Mapping from a column's semantic type to its SQLite storage affinity, plus the value
//! conversions needed for types SQLite does not store natively.
//!
//! Native types (`Integer`, `Real`, `Text`, `Blob`, `Bool`) pass through with only a shape check.
//! Enumerations and literal sets are checked against their domain, datetimes are converted to
//! the declared representation, and [`FieldType::Custom`] delegates to a caller-supplied
//! [`ColumnCodec`]. A custom type has no inferable affinity, so its declaration must carry an
//! explicit override.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};

use crate::error::{OrmError, Result};
use crate::types::{FieldValue, ISO8601_FORMAT, IntEnum, SqlValue, StrEnum};

/// Storage affinity of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
    /// No declared type; the column is emitted without a type name.
    Null,
}

impl Affinity {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Real => "REAL",
            Affinity::Text => "TEXT",
            Affinity::Blob => "BLOB",
            Affinity::Numeric => "NUMERIC",
            Affinity::Null => "",
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// How a `NaiveDateTime` is laid out in its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatetimeRepr {
    /// Seconds since the unix epoch, fractional part kept.
    UnixReal,
    /// Whole seconds since the unix epoch.
    UnixInt,
    /// ISO-8601 text, `YYYY-MM-DDTHH:MM:SS[.ffffff]`.
    Iso8601,
}

/// Conversion capability for column types outside the built-in set.
///
/// `validate` turns a stored primitive into the application value, `serialize` does the reverse.
/// Errors are short descriptions; the caller wraps them with column context.
pub trait ColumnCodec: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// Returns a description of why `raw` is not acceptable.
    fn validate(&self, raw: SqlValue) -> std::result::Result<FieldValue, String>;

    /// # Errors
    ///
    /// Returns a description of why `value` cannot be stored.
    fn serialize(&self, value: &FieldValue) -> std::result::Result<SqlValue, String>;
}

/// Semantic type of a declared field.
#[derive(Debug, Clone)]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Blob,
    Bool,
    /// Integer-backed enumeration; the values are its domain.
    IntEnum(Arc<[i64]>),
    /// String-backed enumeration; the values are its domain.
    StrEnum(Arc<[String]>),
    /// Union of integer literals.
    IntLiteral(Arc<[i64]>),
    /// Union of string literals.
    StrLiteral(Arc<[String]>),
    Datetime(DatetimeRepr),
    /// `serde_json::Value` stored as text.
    Json,
    /// NULL is accepted in addition to the wrapped type.
    Optional(Box<FieldType>),
    Custom(Arc<dyn ColumnCodec>),
}

impl FieldType {
    #[must_use]
    pub fn int_enum<E: IntEnum>() -> Self {
        FieldType::IntEnum(E::variants().iter().map(|v| v.to_int()).collect())
    }

    #[must_use]
    pub fn str_enum<E: StrEnum>() -> Self {
        FieldType::StrEnum(E::variants().iter().map(|v| v.as_str().to_owned()).collect())
    }

    #[must_use]
    pub fn int_literal(values: &[i64]) -> Self {
        FieldType::IntLiteral(values.into())
    }

    #[must_use]
    pub fn str_literal(values: &[&str]) -> Self {
        FieldType::StrLiteral(values.iter().map(|s| (*s).to_owned()).collect())
    }

    pub fn custom(codec: impl ColumnCodec + 'static) -> Self {
        FieldType::Custom(Arc::new(codec))
    }

    /// Wrap in `Optional`; wrapping twice is the same as wrapping once.
    #[must_use]
    pub fn optional(self) -> Self {
        match self {
            FieldType::Optional(_) => self,
            other => FieldType::Optional(Box::new(other)),
        }
    }

    fn inferred_affinity(&self) -> Option<Affinity> {
        match self {
            FieldType::Integer
            | FieldType::Bool
            | FieldType::IntEnum(_)
            | FieldType::IntLiteral(_)
            | FieldType::Datetime(DatetimeRepr::UnixInt) => Some(Affinity::Integer),
            FieldType::Real | FieldType::Datetime(DatetimeRepr::UnixReal) => Some(Affinity::Real),
            FieldType::Text
            | FieldType::StrEnum(_)
            | FieldType::StrLiteral(_)
            | FieldType::Json
            | FieldType::Datetime(DatetimeRepr::Iso8601) => Some(Affinity::Text),
            FieldType::Blob => Some(Affinity::Blob),
            FieldType::Optional(inner) => inner.inferred_affinity(),
            FieldType::Custom(_) => None,
        }
    }
}

/// Outcome of resolving a field: its affinity and the conversions for its values.
#[derive(Debug, Clone)]
pub struct ResolvedType {
    affinity: Affinity,
    optional: bool,
    kind: FieldType,
}

/// Resolve a semantic type, honoring an explicit affinity override first.
///
/// # Errors
///
/// Returns [`OrmError::SchemaError`] when the type has no native mapping and no override is given.
pub fn resolve(
    column: &str,
    field_type: &FieldType,
    affinity_override: Option<Affinity>,
) -> Result<ResolvedType> {
    let (kind, optional) = match field_type {
        FieldType::Optional(inner) => (inner.as_ref().clone(), true),
        other => (other.clone(), false),
    };
    let affinity = affinity_override
        .or_else(|| kind.inferred_affinity())
        .ok_or_else(|| {
            OrmError::SchemaError(format!(
                "column `{column}` has a custom type and no affinity override"
            ))
        })?;
    Ok(ResolvedType {
        affinity,
        optional,
        kind,
    })
}

impl ResolvedType {
    #[must_use]
    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    #[must_use]
    pub fn field_type(&self) -> &FieldType {
        &self.kind
    }

    /// Convert an application value into the primitive bound to the statement.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ValidationError`] on a NULL for a non-optional column, a value outside
    /// an enum/literal domain, or a value of the wrong shape.
    pub fn serialize(&self, column: &str, value: &FieldValue) -> Result<SqlValue> {
        if value.is_null() {
            return if self.optional {
                Ok(SqlValue::Null)
            } else {
                Err(invalid(column, "NULL is not allowed for a non-optional column"))
            };
        }
        let out = match (&self.kind, value) {
            (FieldType::Integer, FieldValue::Int(i)) => SqlValue::Integer(*i),
            (FieldType::Real, FieldValue::Float(f)) => SqlValue::Real(*f),
            #[allow(clippy::cast_precision_loss)]
            (FieldType::Real, FieldValue::Int(i)) => SqlValue::Real(*i as f64),
            (FieldType::Text, FieldValue::Text(s)) => SqlValue::Text(s.clone()),
            (FieldType::Blob, FieldValue::Blob(b)) => SqlValue::Blob(b.clone()),
            (FieldType::Bool, FieldValue::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (FieldType::IntEnum(domain) | FieldType::IntLiteral(domain), FieldValue::Int(i)) => {
                if !domain.contains(i) {
                    return Err(invalid(column, &format!("{i} is not one of {domain:?}")));
                }
                SqlValue::Integer(*i)
            }
            (FieldType::StrEnum(domain) | FieldType::StrLiteral(domain), FieldValue::Text(s)) => {
                if !domain.contains(s) {
                    return Err(invalid(column, &format!("{s:?} is not one of {domain:?}")));
                }
                SqlValue::Text(s.clone())
            }
            (FieldType::Datetime(repr), FieldValue::Timestamp(dt)) => serialize_datetime(*repr, dt),
            (FieldType::Json, FieldValue::Json(j)) => SqlValue::Text(j.to_string()),
            (FieldType::Custom(codec), v) => {
                codec.serialize(v).map_err(|e| invalid(column, &e))?
            }
            (expected, found) => {
                return Err(invalid(
                    column,
                    &format!("cannot store a {} value as {expected:?}", found.kind()),
                ));
            }
        };
        Ok(out)
    }

    /// Convert a stored primitive back into an application value, re-validating its domain.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ValidationError`] when the stored value no longer satisfies the type.
    pub fn deserialize(&self, column: &str, raw: SqlValue) -> Result<FieldValue> {
        if matches!(raw, SqlValue::Null) {
            return if self.optional {
                Ok(FieldValue::Null)
            } else {
                Err(invalid(column, "stored NULL in a non-optional column"))
            };
        }
        let out = match (&self.kind, raw) {
            (FieldType::Integer, SqlValue::Integer(i)) => FieldValue::Int(i),
            (FieldType::Real, SqlValue::Real(f)) => FieldValue::Float(f),
            #[allow(clippy::cast_precision_loss)]
            (FieldType::Real, SqlValue::Integer(i)) => FieldValue::Float(i as f64),
            (FieldType::Text, SqlValue::Text(s)) => FieldValue::Text(s),
            (FieldType::Blob, SqlValue::Blob(b)) => FieldValue::Blob(b),
            (FieldType::Bool, SqlValue::Integer(i @ (0 | 1))) => FieldValue::Bool(i == 1),
            (FieldType::IntEnum(domain) | FieldType::IntLiteral(domain), SqlValue::Integer(i)) => {
                if !domain.contains(&i) {
                    return Err(invalid(column, &format!("stored {i} is not one of {domain:?}")));
                }
                FieldValue::Int(i)
            }
            (FieldType::StrEnum(domain) | FieldType::StrLiteral(domain), SqlValue::Text(s)) => {
                if !domain.contains(&s) {
                    return Err(invalid(column, &format!("stored {s:?} is not one of {domain:?}")));
                }
                FieldValue::Text(s)
            }
            (FieldType::Datetime(_), raw) => {
                FieldValue::Timestamp(deserialize_datetime(raw).map_err(|e| invalid(column, &e))?)
            }
            (FieldType::Json, SqlValue::Text(s)) => FieldValue::Json(
                serde_json::from_str(&s).map_err(|e| invalid(column, &e.to_string()))?,
            ),
            (FieldType::Custom(codec), raw) => codec.validate(raw).map_err(|e| invalid(column, &e))?,
            (expected, raw) => {
                return Err(invalid(
                    column,
                    &format!("stored {:?} does not match {expected:?}", raw.data_type()),
                ));
            }
        };
        Ok(out)
    }
}

fn invalid(column: &str, message: &str) -> OrmError {
    OrmError::ValidationError(format!("column `{column}`: {message}"))
}

fn serialize_datetime(repr: DatetimeRepr, dt: &NaiveDateTime) -> SqlValue {
    let utc = dt.and_utc();
    match repr {
        DatetimeRepr::UnixInt => SqlValue::Integer(utc.timestamp()),
        #[allow(clippy::cast_precision_loss)]
        DatetimeRepr::UnixReal => SqlValue::Real(
            utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) / 1_000_000_000.0,
        ),
        DatetimeRepr::Iso8601 => SqlValue::Text(dt.format(ISO8601_FORMAT).to_string()),
    }
}

// Any stored layout is accepted, whichever representation the column declares.
fn deserialize_datetime(raw: SqlValue) -> std::result::Result<NaiveDateTime, String> {
    match raw {
        SqlValue::Integer(secs) => DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| format!("{secs} is out of range for a timestamp")),
        SqlValue::Real(f) => {
            let secs = f.floor();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let nanos = ((f - secs) * 1_000_000_000.0).round() as u32;
            #[allow(clippy::cast_possible_truncation)]
            let secs = secs as i64;
            DateTime::from_timestamp(secs, nanos.min(999_999_999))
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| format!("{f} is out of range for a timestamp"))
        }
        SqlValue::Text(s) => s
            .parse::<NaiveDateTime>()
            .or_else(|_| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f"))
            .map_err(|e| format!("{s:?} is not an ISO-8601 datetime: {e}")),
        other => Err(format!("{:?} cannot hold a datetime", other.data_type())),
    }
}
