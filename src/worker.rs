//! Dedicated threads that each own one connection and pull jobs from a shared queue.

mod admission;
mod channel;
mod dispatcher;

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use rusqlite::Connection;

use crate::error::{OrmError, Result};

pub(crate) use admission::Admission;
pub(crate) use channel::{Command, Envelope, ReplyTask, RowSink, StreamTask, Task};

pub(crate) fn spawn_worker(
    name: String,
    conn: Connection,
    receiver: Arc<Mutex<Receiver<Command>>>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || dispatcher::run_worker(&name, conn, &receiver))
        .map_err(|err| OrmError::ConnectionError(format!("failed to spawn worker thread: {err}")))
}
