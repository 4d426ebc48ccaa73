//! Typed SQLite tables: a record type declares its columns once, and the crate derives the DDL,
//! the parameterized DML, the value codecs and the execution plumbing from that declaration.
//!
//! ```no_run
//! use sqlite_tablespec::prelude::*;
//!
//! # fn demo<T: TableSpec>(record: T) -> Result<(), OrmError> {
//! let conn = sqlite_tablespec::rusqlite::Connection::open("app.db")?;
//! let orm: Orm<T> = Orm::new(conn, "entries")?;
//! orm.bootstrap()?;
//! orm.insert(&record)?;
//! for record in orm.select(&Filter::All)? {
//!     let _ = record;
//! }
//! # Ok(())
//! # }
//! ```

pub mod affinity;
pub mod async_exec;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod orm;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod schema;
pub mod statement;
pub mod types;
pub mod utils;

mod worker;

pub use rusqlite;

pub use affinity::{Affinity, ColumnCodec, DatetimeRepr, FieldType, ResolvedType, resolve};
pub use async_exec::{AsyncExecutor, AsyncRows};
pub use config::{ConnectOptions, ConnectOptionsBuilder, ConnectionFactory, PoolOptions};
pub use error::OrmError;
pub use executor::{Direct, Emit, Executor};
pub use orm::{AsyncOrm, Filter, Orm, PoolOrm, SelectOptions, Table};
pub use pool::{JobHandle, RowStream, WorkerPool};
pub use results::{EngineRow, ResultSet};
pub use schema::{FieldDecl, FieldSpec, TableSchema, TableSpec, schema_of};
pub use statement::{
    CreateTableOptions, IndexSpec, StatementCache, StatementKey, TableBootstrap, TableName,
};
pub use types::{FieldValue, FromFieldValue, IntEnum, OrOption, Order, RowMapping, SqlValue, StrEnum};
