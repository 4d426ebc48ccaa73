use std::sync::Mutex;
use std::sync::mpsc::Receiver;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::OrmError;

use super::channel::{Command, Envelope};

pub(super) fn run_worker(
    name: &str,
    conn: Connection,
    receiver: &Mutex<Receiver<Command>>,
) {
    debug!(worker = name, "worker started");
    loop {
        // Only one idle worker waits in `recv` at a time; the rest queue on the mutex.
        let command = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(poisoned) => poisoned.into_inner().recv(),
        };
        match command {
            Ok(Command::Run(envelope)) => dispatch(envelope, &conn),
            Ok(Command::Shutdown) | Err(_) => break,
        }
    }
    if let Err((_, err)) = conn.close() {
        warn!(worker = name, error = %err, "failed to close worker connection");
    }
    debug!(worker = name, "worker stopped");
}

fn dispatch(envelope: Envelope, conn: &Connection) {
    let Envelope {
        task,
        cancel,
        admission,
    } = envelope;
    // Settle the admission first so a caller blocked on it wakes up either way.
    let admitted = admission.as_ref().is_none_or(|a| a.leave_queue());
    if cancel.is_cancelled() {
        task.reject(OrmError::Cancelled);
        return;
    }
    if let Some(admission) = admission.filter(|_| !admitted) {
        warn!(limit = ?admission.limit(), "queued job exceeded acquire timeout");
        task.reject(OrmError::Timeout(admission.limit()));
        return;
    }
    task.run(conn);
}
