use crate::affinity::{self, Affinity, FieldType, ResolvedType};
use crate::error::{OrmError, Result};

use super::is_identifier;

/// Declaration of one column, as returned by [`crate::TableSpec::fields`].
///
/// ```rust
/// use sqlite_tablespec::prelude::*;
///
/// let id = FieldDecl::new("id", FieldType::Integer).constraint("PRIMARY KEY");
/// let kind = FieldDecl::new("kind", FieldType::Text)
///     .constraint("CHECK(kind IN ('A','B'))")
///     .default("'A'");
/// # let _ = (id, kind);
/// ```
#[derive(Debug, Clone)]
pub struct FieldDecl {
    name: String,
    field_type: FieldType,
    affinity: Option<Affinity>,
    constraints: Vec<String>,
}

impl FieldDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            affinity: None,
            constraints: Vec::new(),
        }
    }

    /// Append a constraint fragment. Fragments are emitted verbatim, space-joined, in call order.
    #[must_use]
    pub fn constraint(mut self, fragment: impl Into<String>) -> Self {
        self.constraints.push(fragment.into());
        self
    }

    /// Shorthand for `.constraint(format!("DEFAULT {expr}"))`.
    #[must_use]
    pub fn default(self, expr: impl AsRef<str>) -> Self {
        let fragment = format!("DEFAULT {}", expr.as_ref());
        self.constraint(fragment)
    }

    /// Explicit storage affinity; required for [`FieldType::Custom`].
    #[must_use]
    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = Some(affinity);
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.field_type = self.field_type.optional();
        self
    }

    pub(super) fn resolve(self) -> Result<FieldSpec> {
        if !is_identifier(&self.name) {
            return Err(OrmError::SchemaError(format!(
                "invalid column name `{}`",
                self.name
            )));
        }
        let resolved = affinity::resolve(&self.name, &self.field_type, self.affinity)?;
        let constraint = self
            .constraints
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(FieldSpec {
            name: self.name,
            resolved,
            constraint: (!constraint.is_empty()).then_some(constraint),
        })
    }
}

/// Resolved column: name, affinity, constraint clause and value conversions.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    resolved: ResolvedType,
    constraint: Option<String>,
}

impl FieldSpec {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn affinity(&self) -> Affinity {
        self.resolved.affinity()
    }

    #[must_use]
    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.resolved.is_optional()
    }

    #[must_use]
    pub fn resolved(&self) -> &ResolvedType {
        &self.resolved
    }

    /// `<name> <AFFINITY> <constraint>` with empty parts dropped.
    #[must_use]
    pub fn column_def(&self) -> String {
        let mut def = self.name.clone();
        for part in [self.affinity().as_sql(), self.constraint().unwrap_or("")] {
            if !part.is_empty() {
                def.push(' ');
                def.push_str(part);
            }
        }
        def
    }
}
