//! Execution strategies. A [`crate::Table`] builds statements and codecs once and hands each
//! operation to its executor as a closure over a borrowed connection; the executor decides on
//! which thread that closure runs and how the caller receives the outcome.

use std::borrow::Borrow;
use std::vec;

use rusqlite::Connection;

use crate::error::{OrmError, Result};

/// Callback a streaming job uses to hand out one item. Returns `false` once the consumer is gone,
/// after which the job should stop producing.
pub type Emit<'a, T> = &'a mut dyn FnMut(T) -> bool;

pub trait Executor {
    /// What a single-result operation returns to the caller.
    type Handle<R: Send + 'static>;
    /// What a multi-row operation returns to the caller.
    type Rows<T: Send + 'static>;

    fn execute<R, F>(&self, job: F) -> Self::Handle<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static;

    fn stream<T, F>(&self, job: F) -> Self::Rows<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, Emit<'_, T>) -> Result<()> + Send + 'static;

    /// A handle that fails with `err` without touching any connection.
    fn reject<R: Send + 'static>(&self, err: OrmError) -> Self::Handle<R>;

    fn reject_rows<T: Send + 'static>(&self, err: OrmError) -> Self::Rows<T>;
}

/// Runs every operation on the calling thread against one connection.
///
/// `C` is either an owned `Connection` or a borrow of one.
#[derive(Debug)]
pub struct Direct<C> {
    conn: C,
}

impl<C: Borrow<Connection>> Direct<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        self.conn.borrow()
    }

    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C: Borrow<Connection>> Executor for Direct<C> {
    type Handle<R: Send + 'static> = Result<R>;
    type Rows<T: Send + 'static> = Result<vec::IntoIter<T>>;

    fn execute<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    {
        job(self.conn.borrow())
    }

    fn stream<T, F>(&self, job: F) -> Result<vec::IntoIter<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, Emit<'_, T>) -> Result<()> + Send + 'static,
    {
        let mut items = Vec::new();
        job(self.conn.borrow(), &mut |item| {
            items.push(item);
            true
        })?;
        Ok(items.into_iter())
    }

    fn reject<R: Send + 'static>(&self, err: OrmError) -> Result<R> {
        Err(err)
    }

    fn reject_rows<T: Send + 'static>(&self, err: OrmError) -> Result<vec::IntoIter<T>> {
        Err(err)
    }
}
