//! CRUD surface over one table, generic over how operations are executed.
//!
//! Statements are synthesized (and cached) and values are encoded on the calling thread, so
//! schema, statement and validation errors surface before any engine call. Only the engine work
//! itself is handed to the [`Executor`].

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::Connection;
use tracing::debug;

use crate::async_exec::AsyncExecutor;
use crate::codec::{NamedParams, RowLayout, encode_mapping, encode_record, encode_untyped};
use crate::config::{ConnectionFactory, PoolOptions};
use crate::error::{OrmError, Result};
use crate::executor::{Direct, Emit, Executor};
use crate::pool::WorkerPool;
use crate::results::{ResultSet, build_result_set};
use crate::schema::{TableSchema, TableSpec, schema_of};
use crate::statement::{
    Columns, CreateTableOptions, DeleteSpec, IndexSpec, InsertSpec, Predicate, Projection,
    LIMIT_PARAM, Returning, SelectSpec, StatementCache, StatementKey, TableBootstrap, TableName,
    UpdateSpec, WHERE_PREFIX,
};
use crate::types::{FieldValue, OrOption, Order, RowMapping, SqlValue};

/// Single-connection ORM; every call runs on the calling thread.
pub type Orm<T> = Table<T, Direct<Connection>>;
/// ORM backed by a [`WorkerPool`]; calls return [`crate::JobHandle`]s and [`crate::RowStream`]s.
pub type PoolOrm<T> = Table<T, WorkerPool>;
/// ORM for async callers; calls return futures and [`crate::AsyncRows`].
pub type AsyncOrm<T> = Table<T, AsyncExecutor>;

/// Row selection for select, update and delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every row. A full-table operation has to be asked for by name.
    All,
    /// Column equality, AND-ed. Must name at least one column.
    Eq(RowMapping),
    /// Caller-written WHERE expression with its own named parameters.
    ///
    /// The clause text is emitted verbatim and is outside the injection-safe boundary: only the
    /// values in `params` are bound. Never build `clause` from untrusted input.
    Raw { clause: String, params: RowMapping },
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<FieldValue>) -> Self {
        Filter::Eq(RowMapping::new().with(column, value))
    }

    /// Add another equality term; turns `All` into `Eq`. Has no effect on `Raw`.
    #[must_use]
    pub fn and(self, column: &str, value: impl Into<FieldValue>) -> Self {
        match self {
            Filter::All => Filter::eq(column, value),
            Filter::Eq(row) => Filter::Eq(row.with(column, value)),
            raw @ Filter::Raw { .. } => raw,
        }
    }

    pub fn raw(clause: impl Into<String>, params: RowMapping) -> Self {
        Filter::Raw {
            clause: clause.into(),
            params,
        }
    }

    fn compile(&self, schema: &TableSchema, prefix: &str) -> Result<(Predicate, NamedParams)> {
        match self {
            Filter::All => Ok((Predicate::All, NamedParams::new())),
            Filter::Eq(row) => {
                if row.is_empty() {
                    return Err(OrmError::StatementError(
                        "empty equality filter; use Filter::All to match every row".into(),
                    ));
                }
                let columns = schema.ordered_keys(row)?;
                let params = encode_mapping(schema, row, prefix)?;
                Ok((Predicate::Columns(columns), params))
            }
            Filter::Raw { clause, params } => Ok((
                Predicate::Raw {
                    clause: clause.clone(),
                    params: params.columns().map(str::to_owned).collect(),
                },
                encode_untyped(params),
            )),
        }
    }
}

/// ORDER BY, LIMIT and DISTINCT for selects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectOptions {
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<u64>,
    pub distinct: bool,
}

impl SelectOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

struct TableCore<T> {
    statements: StatementCache,
    bootstrap: Option<TableBootstrap>,
    _record: PhantomData<fn() -> T>,
}

impl<T: TableSpec> TableCore<T> {
    fn schema(&self) -> &TableSchema {
        self.statements.schema()
    }

    /// Cached SELECT for this shape; the LIMIT value, if any, is added to `params`.
    fn select_sql(
        &self,
        projection: Projection,
        predicate: Predicate,
        opts: &SelectOptions,
        params: &mut NamedParams,
    ) -> Result<Arc<str>> {
        let sql = self.statements.get(StatementKey::Select(SelectSpec {
            projection,
            distinct: opts.distinct,
            predicate,
            order_by: opts.order_by.clone(),
            limit: opts.limit.is_some(),
        }))?;
        if let Some(limit) = opts.limit {
            params.push(LIMIT_PARAM, SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
        Ok(sql)
    }
}

/// Typed table handle. `E` decides where operations run; see [`Orm`], [`PoolOrm`], [`AsyncOrm`].
pub struct Table<T: TableSpec, E: Executor> {
    core: Arc<TableCore<T>>,
    exec: E,
}

impl<T: TableSpec, E: Executor + Clone> Clone for Table<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            exec: self.exec.clone(),
        }
    }
}

impl<T: TableSpec, E: Executor> std::fmt::Debug for Table<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("table", self.core.statements.table())
            .field("record", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T: TableSpec, E: Executor> Table<T, E> {
    /// # Errors
    ///
    /// Returns [`OrmError::SchemaError`] for an invalid table name or declaration.
    pub fn with_executor(exec: E, table_name: &str) -> Result<Self> {
        Self::build(exec, TableName::parse(table_name)?, None)
    }

    /// Table whose [`Table::bootstrap`] applies `bootstrap`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::SchemaError`] for an invalid table name or declaration.
    pub fn with_bootstrap(exec: E, bootstrap: TableBootstrap) -> Result<Self> {
        let name = TableName::parse(&bootstrap.table_name)?;
        Self::build(exec, name, Some(bootstrap))
    }

    fn build(exec: E, name: TableName, bootstrap: Option<TableBootstrap>) -> Result<Self> {
        let schema = schema_of::<T>()?;
        debug!(table = %name, record = std::any::type_name::<T>(), "table bound");
        Ok(Self {
            core: Arc::new(TableCore {
                statements: StatementCache::new(schema, name),
                bootstrap,
                _record: PhantomData,
            }),
            exec,
        })
    }

    pub fn executor(&self) -> &E {
        &self.exec
    }

    pub fn table_name(&self) -> &TableName {
        self.core.statements.table()
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        self.core.statements.schema()
    }

    /// The statement cache shared by every clone of this table.
    pub fn statements(&self) -> &StatementCache {
        &self.core.statements
    }

    // ---- bootstrap ----

    pub fn create_table(&self, opts: &CreateTableOptions) -> E::Handle<()> {
        match self.core.statements.get(StatementKey::CreateTable(*opts)) {
            Ok(sql) => self.run_ddl(vec![sql]),
            Err(err) => self.exec.reject(err),
        }
    }

    pub fn create_index(&self, index: &IndexSpec) -> E::Handle<()> {
        match self.core.statements.get(StatementKey::CreateIndex(index.clone())) {
            Ok(sql) => self.run_ddl(vec![sql]),
            Err(err) => self.exec.reject(err),
        }
    }

    /// Create the table and each configured index, in order. Without a bootstrap config this
    /// is `CREATE TABLE IF NOT EXISTS`.
    pub fn bootstrap(&self) -> E::Handle<()> {
        let (opts, indexes) = match &self.core.bootstrap {
            Some(b) => (b.create_table, b.indexes.clone()),
            None => (CreateTableOptions::default().if_not_exists(), Vec::new()),
        };
        let statements = std::iter::once(StatementKey::CreateTable(opts))
            .chain(indexes.into_iter().map(StatementKey::CreateIndex))
            .map(|key| self.core.statements.get(key))
            .collect::<Result<Vec<_>>>();
        match statements {
            Ok(statements) => self.run_ddl(statements),
            Err(err) => self.exec.reject(err),
        }
    }

    fn run_ddl(&self, statements: Vec<Arc<str>>) -> E::Handle<()> {
        self.exec.execute(move |conn| {
            for sql in &statements {
                conn.execute(sql, []).map_err(|e| OrmError::engine(sql, e))?;
            }
            Ok(())
        })
    }

    // ---- insert ----

    /// Insert one record; resolves to the number of rows inserted.
    pub fn insert(&self, record: &T) -> E::Handle<usize> {
        self.insert_with(record, None)
    }

    pub fn insert_with(&self, record: &T, or_option: Option<OrOption>) -> E::Handle<usize> {
        let spec = InsertSpec {
            columns: Columns::All,
            or_option,
            returning: None,
        };
        let prepared = self
            .core
            .statements
            .get(StatementKey::Insert(spec))
            .and_then(|sql| Ok((sql, encode_record(self.core.schema(), record)?)));
        self.run_count(prepared)
    }

    /// Insert a lazy sequence of records in one transaction, consuming it once, in order.
    ///
    /// Any failure rolls back the whole batch.
    pub fn insert_many<I>(&self, records: I) -> E::Handle<usize>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        self.insert_many_with(records, None)
    }

    pub fn insert_many_with<I>(&self, records: I, or_option: Option<OrOption>) -> E::Handle<usize>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let spec = InsertSpec {
            columns: Columns::All,
            or_option,
            returning: None,
        };
        let sql = match self.core.statements.get(StatementKey::Insert(spec)) {
            Ok(sql) => sql,
            Err(err) => return self.exec.reject(err),
        };
        let core = Arc::clone(&self.core);
        let records = records.into_iter();
        self.exec.execute(move |conn| {
            run_batch(conn, &sql, records, |record| {
                encode_record(core.schema(), &record)
            })
        })
    }

    /// Insert only the columns present in `row`; other columns take their defaults.
    pub fn insert_mapping(&self, row: &RowMapping) -> E::Handle<usize> {
        let schema = self.core.schema();
        let prepared = schema.ordered_keys(row).and_then(|columns| {
            let sql = self.core.statements.get(StatementKey::Insert(InsertSpec {
                columns: Columns::Only(columns),
                or_option: None,
                returning: None,
            }))?;
            Ok((sql, encode_mapping(schema, row, "")?))
        });
        self.run_count(prepared)
    }

    /// Insert many partial rows in one transaction. Every row must carry the same column set
    /// as the first one, which is read on the calling thread to pick the statement.
    pub fn insert_mappings<I>(&self, rows: I) -> E::Handle<usize>
    where
        I: IntoIterator<Item = RowMapping>,
        I::IntoIter: Send + 'static,
    {
        let mut rows = rows.into_iter().peekable();
        let Some(first) = rows.peek() else {
            return self.exec.execute(|_| Ok(0));
        };
        let prepared = self.core.schema().ordered_keys(first).and_then(|columns| {
            let sql = self.core.statements.get(StatementKey::Insert(InsertSpec {
                columns: Columns::Only(columns.clone()),
                or_option: None,
                returning: None,
            }))?;
            Ok((sql, columns))
        });
        let (sql, columns) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.exec.reject(err),
        };
        let core = Arc::clone(&self.core);
        self.exec.execute(move |conn| {
            run_batch(conn, &sql, rows, |row| {
                expect_keys(&row, &columns, "insert_mappings row")?;
                encode_mapping(core.schema(), &row, "")
            })
        })
    }

    // ---- select ----

    /// Matching records, as a single-pass sequence.
    pub fn select(&self, filter: &Filter) -> E::Rows<T> {
        self.select_with(filter, &SelectOptions::default())
    }

    pub fn select_with(&self, filter: &Filter, opts: &SelectOptions) -> E::Rows<T> {
        match self.prepare_select(filter, opts) {
            Ok((sql, params)) => {
                let core = Arc::clone(&self.core);
                self.exec.stream(move |conn, emit| {
                    query_records(conn, core.schema(), &sql, &params, emit)
                })
            }
            Err(err) => self.exec.reject_rows(err),
        }
    }

    /// First match in `opts` order, if any.
    pub fn select_one(&self, filter: &Filter, opts: &SelectOptions) -> E::Handle<Option<T>> {
        let opts = SelectOptions {
            limit: Some(1),
            ..opts.clone()
        };
        match self.prepare_select(filter, &opts) {
            Ok((sql, params)) => {
                let core = Arc::clone(&self.core);
                self.exec.execute(move |conn| {
                    let mut found = None;
                    query_records(conn, core.schema(), &sql, &params, &mut |record| {
                        found = Some(record);
                        false
                    })?;
                    Ok(found)
                })
            }
            Err(err) => self.exec.reject(err),
        }
    }

    /// Only `columns` of the matching rows, decoded per column type.
    pub fn select_mappings(
        &self,
        columns: &[&str],
        filter: &Filter,
        opts: &SelectOptions,
    ) -> E::Rows<RowMapping> {
        let prepared = (|| -> Result<_> {
            let schema = self.core.schema();
            let columns = schema.ordered(columns.iter().copied())?;
            let (predicate, mut params) = filter.compile(schema, "")?;
            let sql = self.core.select_sql(
                Projection::Columns(Columns::Only(columns)),
                predicate,
                opts,
                &mut params,
            )?;
            Ok((sql, params))
        })();
        match prepared {
            Ok((sql, params)) => {
                let core = Arc::clone(&self.core);
                self.exec.stream(move |conn, emit| {
                    let mut stmt = conn.prepare_cached(&sql).map_err(|e| OrmError::engine(&sql, e))?;
                    let layout = RowLayout::for_mapping(core.schema(), &stmt.column_names());
                    let mut rows = stmt
                        .query(params.as_refs().as_slice())
                        .map_err(|e| OrmError::engine(&sql, e))?;
                    while let Some(row) = rows.next().map_err(|e| OrmError::engine(&sql, e))? {
                        if !emit(layout.decode_mapping(core.schema(), row)?) {
                            break;
                        }
                    }
                    Ok(())
                })
            }
            Err(err) => self.exec.reject_rows(err),
        }
    }

    /// Every record, fetched in pages of `batch_size` by seeking on rowid.
    ///
    /// Fails at the engine on `WITHOUT ROWID` tables.
    pub fn select_paginated(&self, batch_size: u64) -> E::Rows<T> {
        if batch_size == 0 {
            return self
                .exec
                .reject_rows(OrmError::StatementError("batch_size must be positive".into()));
        }
        let opts = SelectOptions::new()
            .order_by("rowid", Order::Asc)
            .limit(batch_size);
        let predicate = Predicate::Raw {
            clause: "rowid > :not_before".into(),
            params: vec!["not_before".into()],
        };
        let mut params = NamedParams::new();
        let sql = match self
            .core
            .select_sql(Projection::RowidAll, predicate, &opts, &mut params)
        {
            Ok(sql) => sql,
            Err(err) => return self.exec.reject_rows(err),
        };
        let core = Arc::clone(&self.core);
        self.exec.stream(move |conn, emit| {
            let schema = core.schema();
            let mut stmt = conn.prepare_cached(&sql).map_err(|e| OrmError::engine(&sql, e))?;
            let layout = RowLayout::for_record(schema, &stmt.column_names(), 1);
            let mut not_before = 0_i64;
            loop {
                params.push("not_before", SqlValue::Integer(not_before));
                let mut last_rowid = None;
                let mut rows = stmt
                    .query(params.as_refs().as_slice())
                    .map_err(|e| OrmError::engine(&sql, e))?;
                while let Some(row) = rows.next().map_err(|e| OrmError::engine(&sql, e))? {
                    last_rowid = Some(row.get::<_, i64>(0)?);
                    if !emit(layout.decode::<T>(schema, row)?) {
                        return Ok(());
                    }
                }
                match last_rowid {
                    Some(rowid) => not_before = rowid,
                    None => return Ok(()),
                }
            }
        })
    }

    /// Number of matching rows.
    pub fn count(&self, filter: &Filter) -> E::Handle<u64> {
        match self.prepare_count(filter) {
            Ok((sql, params)) => self.exec.execute(move |conn| {
                Ok(u64::try_from(count_rows(conn, &sql, &params)?).unwrap_or(0))
            }),
            Err(err) => self.exec.reject(err),
        }
    }

    /// Whether at least one row matches.
    pub fn exists(&self, filter: &Filter) -> E::Handle<bool> {
        match self.prepare_count(filter) {
            Ok((sql, params)) => self
                .exec
                .execute(move |conn| Ok(count_rows(conn, &sql, &params)? > 0)),
            Err(err) => self.exec.reject(err),
        }
    }

    fn prepare_count(&self, filter: &Filter) -> Result<(Arc<str>, NamedParams)> {
        let (predicate, mut params) = filter.compile(self.core.schema(), "")?;
        let sql = self.core.select_sql(
            Projection::Count,
            predicate,
            &SelectOptions::default(),
            &mut params,
        )?;
        Ok((sql, params))
    }

    fn prepare_select(&self, filter: &Filter, opts: &SelectOptions) -> Result<(Arc<str>, NamedParams)> {
        let (predicate, mut params) = filter.compile(self.core.schema(), "")?;
        let sql = self.core.select_sql(
            Projection::Columns(Columns::All),
            predicate,
            opts,
            &mut params,
        )?;
        Ok((sql, params))
    }

    // ---- update ----

    /// Set the columns in `set` on every row matching `filter`; resolves to rows affected.
    pub fn update(&self, set: &RowMapping, filter: &Filter) -> E::Handle<usize> {
        self.update_with(set, filter, None)
    }

    pub fn update_with(
        &self,
        set: &RowMapping,
        filter: &Filter,
        or_option: Option<OrOption>,
    ) -> E::Handle<usize> {
        let schema = self.core.schema();
        let prepared = (|| -> Result<_> {
            let set_columns = schema.ordered_keys(set)?;
            let (predicate, where_params) = filter.compile(schema, WHERE_PREFIX)?;
            let sql = self.core.statements.get(StatementKey::Update(UpdateSpec {
                set: set_columns,
                predicate,
                or_option,
            }))?;
            let mut params = encode_mapping(schema, set, "")?;
            params.extend(where_params);
            Ok((sql, params))
        })();
        self.run_count(prepared)
    }

    /// Apply one UPDATE shape to a lazy sequence of `(set values, where values)` pairs in one
    /// transaction.
    ///
    /// Each set mapping must hold exactly `set_columns`. The where mapping must hold exactly the
    /// predicate's columns for [`Predicate::Columns`], exactly its declared placeholder names for
    /// [`Predicate::Raw`], and nothing for [`Predicate::All`]. Where-side column values are bound
    /// under the `__where_` prefix, so a column may appear on both sides.
    pub fn update_many<I>(
        &self,
        set_columns: &[&str],
        predicate: Predicate,
        rows: I,
    ) -> E::Handle<usize>
    where
        I: IntoIterator<Item = (RowMapping, RowMapping)>,
        I::IntoIter: Send + 'static,
    {
        let schema = self.core.schema();
        let prepared = schema.ordered(set_columns.iter().copied()).and_then(|set| {
            let predicate = match predicate {
                Predicate::Columns(columns) => {
                    Predicate::Columns(schema.ordered(columns.iter().map(String::as_str))?)
                }
                other => other,
            };
            let sql = self.core.statements.get(StatementKey::Update(UpdateSpec {
                set: set.clone(),
                predicate: predicate.clone(),
                or_option: None,
            }))?;
            Ok((sql, set, predicate))
        });
        let (sql, set, predicate) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.exec.reject(err),
        };
        let core = Arc::clone(&self.core);
        let rows = rows.into_iter();
        self.exec.execute(move |conn| {
            let schema = core.schema();
            run_batch(conn, &sql, rows, |(set_values, where_values)| {
                expect_keys(&set_values, &set, "update_many set values")?;
                let mut params = encode_mapping(schema, &set_values, "")?;
                match &predicate {
                    Predicate::All => expect_keys(&where_values, &[], "update_many where values")?,
                    Predicate::Columns(columns) => {
                        expect_keys(&where_values, columns, "update_many where values")?;
                        params.extend(encode_mapping(schema, &where_values, WHERE_PREFIX)?);
                    }
                    Predicate::Raw { params: names, .. } => {
                        expect_keys(&where_values, names, "update_many where values")?;
                        params.extend(encode_untyped(&where_values));
                    }
                }
                Ok(params)
            })
        })
    }

    // ---- delete ----

    /// Delete matching rows; resolves to rows deleted.
    pub fn delete(&self, filter: &Filter) -> E::Handle<usize> {
        let prepared = filter
            .compile(self.core.schema(), "")
            .and_then(|(predicate, params)| {
                let sql = self.core.statements.get(StatementKey::Delete(DeleteSpec {
                    predicate,
                    returning: None,
                }))?;
                Ok((sql, params))
            });
        self.run_count(prepared)
    }

    /// Delete matching rows and yield them as they were.
    pub fn delete_returning(&self, filter: &Filter) -> E::Rows<T> {
        let prepared = filter
            .compile(self.core.schema(), "")
            .and_then(|(predicate, params)| {
                let sql = self.core.statements.get(StatementKey::Delete(DeleteSpec {
                    predicate,
                    returning: Some(Returning::All),
                }))?;
                Ok((sql, params))
            });
        match prepared {
            Ok((sql, params)) => {
                let core = Arc::clone(&self.core);
                self.exec.stream(move |conn, emit| {
                    query_records(conn, core.schema(), &sql, &params, emit)
                })
            }
            Err(err) => self.exec.reject_rows(err),
        }
    }

    // ---- escape hatches ----

    /// Run caller-written SQL with named parameters (`:name`) and collect its rows untyped.
    pub fn execute_raw(&self, sql: &str, params: &RowMapping) -> E::Handle<ResultSet> {
        let sql = sql.to_owned();
        let params = encode_untyped(params);
        self.exec.execute(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| OrmError::engine(&sql, e))?;
            build_result_set(conn, &mut stmt, &sql, &params)
        })
    }

    /// Run `f` with a synchronous view of this table bound to one connection, so its steps run
    /// in order on the same worker.
    pub fn pinned<R, F>(&self, f: F) -> E::Handle<R>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&Table<T, Direct<&'c Connection>>) -> Result<R> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        self.exec.execute(move |conn| {
            let table = Table {
                core,
                exec: Direct::new(conn),
            };
            f(&table)
        })
    }

    fn run_count(&self, prepared: Result<(Arc<str>, NamedParams)>) -> E::Handle<usize> {
        match prepared {
            Ok((sql, params)) => self.exec.execute(move |conn| {
                let mut stmt = conn.prepare_cached(&sql).map_err(|e| OrmError::engine(&sql, e))?;
                stmt.execute(params.as_refs().as_slice())
                    .map_err(|e| OrmError::engine(&sql, e))
            }),
            Err(err) => self.exec.reject(err),
        }
    }
}

impl<T: TableSpec, C: std::borrow::Borrow<Connection>> Table<T, Direct<C>> {
    /// # Errors
    ///
    /// Returns [`OrmError::SchemaError`] for an invalid table name or declaration.
    pub fn new(conn: C, table_name: &str) -> Result<Self> {
        Self::with_executor(Direct::new(conn), table_name)
    }

    pub fn connection(&self) -> &Connection {
        self.exec.connection()
    }

    /// Visit matching records straight off the cursor, without collecting them. `visit`
    /// returns `false` to stop early. Resolves to the number of records visited.
    ///
    /// # Errors
    ///
    /// Returns the first schema, statement, engine or decode error.
    pub fn select_each<F>(&self, filter: &Filter, opts: &SelectOptions, mut visit: F) -> Result<usize>
    where
        F: FnMut(T) -> bool,
    {
        let (sql, params) = self.prepare_select(filter, opts)?;
        let mut visited = 0;
        query_records(self.connection(), self.core.schema(), &sql, &params, &mut |record| {
            visited += 1;
            visit(record)
        })?;
        Ok(visited)
    }
}

impl<T: TableSpec> Table<T, WorkerPool> {
    /// Start a pool with one connection per worker, each opened by `factory`.
    ///
    /// # Errors
    ///
    /// Returns connection or schema errors.
    pub fn new(factory: &ConnectionFactory, options: &PoolOptions, table_name: &str) -> Result<Self> {
        Self::with_executor(WorkerPool::new(factory, options)?, table_name)
    }

    /// Stop accepting work, drain the queue and close every worker connection.
    pub fn shutdown(&self) {
        self.exec.shutdown();
    }
}

impl<T: TableSpec> Table<T, AsyncExecutor> {
    /// # Errors
    ///
    /// Returns connection or schema errors.
    pub fn new(factory: &ConnectionFactory, table_name: &str) -> Result<Self> {
        Self::with_executor(AsyncExecutor::new(factory)?, table_name)
    }

    pub async fn shutdown(&self) {
        self.exec.shutdown().await;
    }
}

fn query_records<T: TableSpec>(
    conn: &Connection,
    schema: &TableSchema,
    sql: &str,
    params: &NamedParams,
    emit: Emit<'_, T>,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(sql).map_err(|e| OrmError::engine(sql, e))?;
    let layout = RowLayout::for_record(schema, &stmt.column_names(), 0);
    let mut rows = stmt
        .query(params.as_refs().as_slice())
        .map_err(|e| OrmError::engine(sql, e))?;
    while let Some(row) = rows.next().map_err(|e| OrmError::engine(sql, e))? {
        if !emit(layout.decode::<T>(schema, row)?) {
            break;
        }
    }
    Ok(())
}

fn count_rows(conn: &Connection, sql: &str, params: &NamedParams) -> Result<i64> {
    let mut stmt = conn.prepare_cached(sql).map_err(|e| OrmError::engine(sql, e))?;
    stmt.query_row(params.as_refs().as_slice(), |row| row.get(0))
        .map_err(|e| OrmError::engine(sql, e))
}

/// One prepared statement executed once per item inside a transaction; the transaction rolls
/// back on the first error.
fn run_batch<X>(
    conn: &Connection,
    sql: &str,
    items: impl Iterator<Item = X>,
    mut encode: impl FnMut(X) -> Result<NamedParams>,
) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut affected = 0;
    {
        let mut stmt = tx.prepare_cached(sql).map_err(|e| OrmError::engine(sql, e))?;
        for item in items {
            let params = encode(item)?;
            affected += stmt
                .execute(params.as_refs().as_slice())
                .map_err(|e| OrmError::engine(sql, e))?;
        }
    }
    tx.commit()?;
    Ok(affected)
}

fn expect_keys(row: &RowMapping, expected: &[String], what: &str) -> Result<()> {
    let got: BTreeSet<&str> = row.columns().collect();
    let want: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    if got == want {
        Ok(())
    } else {
        Err(OrmError::StatementError(format!(
            "{what} carry columns {got:?}, expected {want:?}"
        )))
    }
}
