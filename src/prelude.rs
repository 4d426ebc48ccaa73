//! Convenient imports for declaring tables and running operations against them.

pub use crate::affinity::{Affinity, ColumnCodec, DatetimeRepr, FieldType};
pub use crate::async_exec::{AsyncExecutor, AsyncRows};
pub use crate::config::{ConnectOptions, ConnectionFactory, PoolOptions};
pub use crate::error::OrmError;
pub use crate::executor::{Direct, Executor};
pub use crate::orm::{AsyncOrm, Filter, Orm, PoolOrm, SelectOptions, Table};
pub use crate::pool::{JobHandle, RowStream, WorkerPool};
pub use crate::results::ResultSet;
pub use crate::schema::{FieldDecl, TableSchema, TableSpec};
pub use crate::statement::{CreateTableOptions, IndexSpec, Predicate, TableBootstrap};
pub use crate::types::{FieldValue, IntEnum, OrOption, Order, RowMapping, StrEnum};
