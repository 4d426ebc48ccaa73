use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use tracing::debug;

use crate::error::Result;

use super::{TableSchema, TableSpec};

static SCHEMAS: LazyLock<RwLock<HashMap<TypeId, Arc<TableSchema>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Extract the column schema of `T`, once per type for the life of the process.
///
/// # Errors
///
/// Returns [`crate::OrmError::SchemaError`] when the declaration is invalid. Invalid
/// declarations are not cached, so every call reports the error again.
pub fn schema_of<T: TableSpec>() -> Result<Arc<TableSchema>> {
    let key = TypeId::of::<T>();
    if let Some(schema) = SCHEMAS
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(&key)
    {
        return Ok(Arc::clone(schema));
    }

    let schema = Arc::new(TableSchema::from_decls(T::fields())?);
    debug!(
        table_type = type_name::<T>(),
        columns = schema.len(),
        "extracted table schema"
    );
    let mut guard = SCHEMAS
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    // A racing thread may have won; keep its entry so every caller shares one Arc.
    Ok(Arc::clone(guard.entry(key).or_insert(schema)))
}
