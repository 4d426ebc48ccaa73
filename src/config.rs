use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrmError, Result};
use crate::utils;

/// Opens one engine connection per call; each worker calls it once at startup.
pub type ConnectionFactory = Arc<dyn Fn() -> Result<Connection> + Send + Sync>;

/// Options for opening a `SQLite` connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub db_path: String,
    /// `journal_mode=WAL` with `synchronous=NORMAL`
    #[serde(default)]
    pub wal: bool,
    #[serde(default, with = "millis")]
    pub busy_timeout: Option<Duration>,
    #[serde(default)]
    pub foreign_keys: bool,
    #[serde(default)]
    pub temp_store_memory: bool,
    #[serde(default)]
    pub mmap_size: Option<u64>,
    #[serde(default)]
    pub read_only: bool,
}

impl ConnectOptions {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            wal: false,
            busy_timeout: None,
            foreign_keys: false,
            temp_store_memory: false,
            mmap_size: None,
            read_only: false,
        }
    }

    #[must_use]
    pub fn builder(db_path: impl Into<String>) -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new(db_path)
    }

    /// Open and configure a connection.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ConnectionError`] if the file cannot be opened, or
    /// [`OrmError::SqliteError`] if a pragma is rejected.
    pub fn open(&self) -> Result<Connection> {
        let flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI
        } else {
            OpenFlags::default()
        };
        let conn = Connection::open_with_flags(&self.db_path, flags).map_err(|e| {
            OrmError::ConnectionError(format!("failed to open `{}`: {e}", self.db_path))
        })?;
        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout)?;
        }
        if self.wal {
            utils::enable_wal_mode(&conn)?;
        }
        if self.foreign_keys {
            conn.pragma_update(None, "foreign_keys", true)?;
        }
        if self.temp_store_memory {
            utils::enable_tmp_store_at_memory(&conn)?;
        }
        if let Some(size) = self.mmap_size {
            utils::enable_mmap(&conn, size)?;
        }
        debug!(db_path = %self.db_path, wal = self.wal, "opened connection");
        Ok(conn)
    }

    /// Shareable factory that opens a fresh connection with these options on every call.
    #[must_use]
    pub fn factory(&self) -> ConnectionFactory {
        let opts = self.clone();
        Arc::new(move || opts.open())
    }
}

/// Fluent builder for [`ConnectOptions`].
#[derive(Debug, Clone)]
pub struct ConnectOptionsBuilder {
    opts: ConnectOptions,
}

impl ConnectOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            opts: ConnectOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, on: bool) -> Self {
        self.opts.foreign_keys = on;
        self
    }

    #[must_use]
    pub fn temp_store_memory(mut self, on: bool) -> Self {
        self.opts.temp_store_memory = on;
        self
    }

    #[must_use]
    pub fn mmap_size(mut self, bytes: u64) -> Self {
        self.opts.mmap_size = Some(bytes);
        self
    }

    #[must_use]
    pub fn read_only(mut self, on: bool) -> Self {
        self.opts.read_only = on;
        self
    }

    #[must_use]
    pub fn finish(self) -> ConnectOptions {
        self.opts
    }

    /// Open a connection with the accumulated options.
    ///
    /// # Errors
    ///
    /// See [`ConnectOptions::open`].
    pub fn open(self) -> Result<Connection> {
        self.opts.open()
    }
}

/// Sizing and naming of a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub workers: usize,
    #[serde(default = "default_thread_prefix")]
    pub thread_name_prefix: String,
    /// Longest time a job may wait in the queue before a worker picks it up.
    #[serde(default, with = "millis")]
    pub acquire_timeout: Option<Duration>,
}

fn default_thread_prefix() -> String {
    "tablespec-worker".into()
}

impl PoolOptions {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            thread_name_prefix: default_thread_prefix(),
            acquire_timeout: None,
        }
    }

    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
                .min(8),
        )
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub(super) fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_load_from_json() {
        let opts: ConnectOptions = serde_json::from_str(
            r#"{"db_path": "data.db", "wal": true, "busy_timeout": 1500}"#,
        )
        .unwrap();
        assert_eq!(
            opts,
            ConnectOptions::builder("data.db")
                .wal(true)
                .busy_timeout(Duration::from_millis(1500))
                .finish()
        );
    }

    #[test]
    fn pool_options_clamp_worker_count() {
        assert_eq!(PoolOptions::new(0).workers, 1);
        let opts: PoolOptions = serde_json::from_str(r#"{"workers": 3}"#).unwrap();
        assert_eq!(opts.thread_name_prefix, "tablespec-worker");
        assert_eq!(opts.acquire_timeout, None);
    }

    #[test]
    fn in_memory_open_applies_pragmas() {
        let conn = ConnectOptions::builder(":memory:")
            .foreign_keys(true)
            .temp_store_memory(true)
            .open()
            .unwrap();
        let fk: i64 = conn
            .pragma_query_value(None, "foreign_keys", |r| r.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
