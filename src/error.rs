use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrmError {
    /// A column, table or type reference cannot be resolved against the declared schema.
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Placeholder construction is ambiguous or colliding.
    #[error("Statement error: {0}")]
    StatementError(String),

    /// A value failed the typed-model validation on its way into the database.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A stored row could not be turned back into a typed record.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The engine rejected a synthesized or caller-supplied statement.
    #[error("SQLite error while executing `{statement}`: {source}")]
    EngineError {
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Worker pool has been shut down")]
    PoolClosed,

    #[error("Operation cancelled before dispatch")]
    Cancelled,

    #[error("Timed out after {0:?} waiting for a free worker")]
    Timeout(Duration),

    #[error("Worker panicked while running an operation: {0}")]
    WorkerPanic(String),
}

impl OrmError {
    pub(crate) fn engine(statement: &str, source: rusqlite::Error) -> Self {
        OrmError::EngineError {
            statement: statement.to_owned(),
            source,
        }
    }

    /// Whether this error was raised before the engine saw any statement.
    #[must_use]
    pub fn is_build_time(&self) -> bool {
        matches!(
            self,
            OrmError::SchemaError(_) | OrmError::StatementError(_) | OrmError::ValidationError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;
