use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::error::Result;
use crate::schema::TableSchema;

use super::{
    CreateTableOptions, DeleteSpec, IndexSpec, InsertSpec, Predicate, SelectSpec, TableName,
    UpdateSpec, ddl, dml,
};

/// Most statements with a caller-written WHERE clause kept per table. Further raw statements
/// are synthesized on every request.
pub const RAW_STATEMENT_CAPACITY: usize = 64;

/// Exact shape of a requested statement. Statement text depends on nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatementKey {
    CreateTable(CreateTableOptions),
    CreateIndex(IndexSpec),
    Insert(InsertSpec),
    Select(SelectSpec),
    Update(UpdateSpec),
    Delete(DeleteSpec),
}

impl StatementKey {
    /// Whether the key embeds caller-written clause text.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        let predicate = match self {
            StatementKey::Select(spec) => &spec.predicate,
            StatementKey::Update(spec) => &spec.predicate,
            StatementKey::Delete(spec) => &spec.predicate,
            StatementKey::CreateTable(_) | StatementKey::CreateIndex(_) | StatementKey::Insert(_) => {
                return false;
            }
        };
        matches!(predicate, Predicate::Raw { .. })
    }
}

/// Per-table memo of synthesized statements.
///
/// Entries are created on first request and kept for the life of the cache. Failed builds are
/// not cached, and at most [`RAW_STATEMENT_CAPACITY`] raw-clause statements are.
#[derive(Debug)]
pub struct StatementCache {
    schema: Arc<TableSchema>,
    table: TableName,
    entries: RwLock<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    statements: HashMap<StatementKey, Arc<str>>,
    raw: usize,
}

impl StatementCache {
    #[must_use]
    pub fn new(schema: Arc<TableSchema>, table: TableName) -> Self {
        Self {
            schema,
            table,
            entries: RwLock::new(Entries::default()),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    #[must_use]
    pub fn table(&self) -> &TableName {
        &self.table
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .statements
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached statement for `key`, synthesizing it on first use.
    ///
    /// # Errors
    ///
    /// Propagates the builder's [`crate::OrmError::SchemaError`] or
    /// [`crate::OrmError::StatementError`].
    pub fn get(&self, key: StatementKey) -> Result<Arc<str>> {
        if let Some(sql) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .statements
            .get(&key)
        {
            trace!(table = %self.table, sql = %sql, "statement cache hit");
            return Ok(Arc::clone(sql));
        }

        let sql: Arc<str> = self.build(&key)?.into();
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entries = &mut *guard;
        if let Some(existing) = entries.statements.get(&key) {
            return Ok(Arc::clone(existing));
        }
        if key.is_raw() {
            if entries.raw >= RAW_STATEMENT_CAPACITY {
                trace!(table = %self.table, sql = %sql, "raw statement cache full, not caching");
                return Ok(sql);
            }
            entries.raw += 1;
        }
        debug!(table = %self.table, sql = %sql, "synthesized statement");
        entries.statements.insert(key, Arc::clone(&sql));
        Ok(sql)
    }

    fn build(&self, key: &StatementKey) -> Result<String> {
        let (schema, table) = (self.schema.as_ref(), &self.table);
        match key {
            StatementKey::CreateTable(opts) => Ok(ddl::create_table(schema, table, opts)),
            StatementKey::CreateIndex(index) => ddl::create_index(schema, table, index),
            StatementKey::Insert(spec) => dml::insert(schema, table, spec),
            StatementKey::Select(spec) => dml::select(schema, table, spec),
            StatementKey::Update(spec) => dml::update(schema, table, spec),
            StatementKey::Delete(spec) => dml::delete(schema, table, spec),
        }
    }
}
