use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{OrmError, Result};
use crate::executor::Emit;

use super::admission::Admission;

/// Unit of work a worker thread runs against its connection.
pub(crate) trait Task: Send {
    fn run(self: Box<Self>, conn: &Connection);

    /// Report `err` to the submitter instead of running.
    fn reject(self: Box<Self>, err: OrmError);
}

pub(crate) struct Envelope {
    pub(crate) task: Box<dyn Task>,
    pub(crate) cancel: CancellationToken,
    pub(crate) admission: Option<Arc<Admission>>,
}

pub(crate) enum Command {
    Run(Envelope),
    Shutdown,
}

/// Single result delivered through a oneshot.
pub(crate) struct ReplyTask<F, R> {
    pub(crate) job: F,
    pub(crate) respond_to: oneshot::Sender<Result<R>>,
}

impl<F, R> Task for ReplyTask<F, R>
where
    F: FnOnce(&Connection) -> Result<R> + Send,
    R: Send,
{
    fn run(self: Box<Self>, conn: &Connection) {
        let ReplyTask { job, respond_to } = *self;
        let outcome = guarded(|| job(conn));
        let _ = respond_to.send(outcome);
    }

    fn reject(self: Box<Self>, err: OrmError) {
        let _ = self.respond_to.send(Err(err));
    }
}

/// Outcome of a non-blocking push into a stream channel.
pub(crate) enum Push<T> {
    Sent,
    Full(T),
    Gone,
}

/// Receiving side of a streamed result. Never blocks, so a push is safe from any thread.
pub(crate) trait RowSink<T>: Send {
    fn try_push(&self, item: Result<T>) -> Push<Result<T>>;
}

impl<T: Send> RowSink<T> for std::sync::mpsc::SyncSender<Result<T>> {
    fn try_push(&self, item: Result<T>) -> Push<Result<T>> {
        match self.try_send(item) {
            Ok(()) => Push::Sent,
            Err(std::sync::mpsc::TrySendError::Full(item)) => Push::Full(item),
            Err(std::sync::mpsc::TrySendError::Disconnected(_)) => Push::Gone,
        }
    }
}

impl<T: Send> RowSink<T> for tokio_mpsc::Sender<Result<T>> {
    fn try_push(&self, item: Result<T>) -> Push<Result<T>> {
        match self.try_send(item) {
            Ok(()) => Push::Sent,
            Err(tokio_mpsc::error::TrySendError::Full(item)) => Push::Full(item),
            Err(tokio_mpsc::error::TrySendError::Closed(_)) => Push::Gone,
        }
    }
}

const MIN_BACKOFF: Duration = Duration::from_micros(50);
const MAX_BACKOFF: Duration = Duration::from_millis(1);

enum Delivery {
    Sent,
    ConsumerGone,
    PoolClosing,
}

/// Push `item`, backing off while the channel is full. Gives up once the pool starts closing,
/// since the consumer may be the thread waiting for shutdown to return.
fn deliver<T>(sink: &impl RowSink<T>, item: Result<T>, closing: &CancellationToken) -> Delivery {
    let mut item = item;
    let mut backoff = MIN_BACKOFF;
    loop {
        match sink.try_push(item) {
            Push::Sent => return Delivery::Sent,
            Push::Gone => return Delivery::ConsumerGone,
            Push::Full(rejected) => {
                if closing.is_cancelled() {
                    return Delivery::PoolClosing;
                }
                item = rejected;
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Many results pushed through a bounded channel; an error ends the stream.
///
/// If the pool shuts down while the channel is full, the job stops and `truncated` is set so
/// the consumer can report [`OrmError::PoolClosed`] instead of a silently short result.
pub(crate) struct StreamTask<F, S, T> {
    job: F,
    sink: S,
    closing: CancellationToken,
    truncated: Arc<AtomicBool>,
    item: PhantomData<fn() -> T>,
}

impl<F, S, T> StreamTask<F, S, T> {
    pub(crate) fn new(
        job: F,
        sink: S,
        closing: CancellationToken,
        truncated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            job,
            sink,
            closing,
            truncated,
            item: PhantomData,
        }
    }
}

impl<F, S, T> Task for StreamTask<F, S, T>
where
    F: FnOnce(&Connection, Emit<'_, T>) -> Result<()> + Send,
    S: RowSink<T>,
    T: Send,
{
    fn run(self: Box<Self>, conn: &Connection) {
        let StreamTask {
            job,
            sink,
            closing,
            truncated,
            ..
        } = *self;
        let push = |item: Result<T>| match deliver(&sink, item, &closing) {
            Delivery::Sent => true,
            Delivery::ConsumerGone => false,
            Delivery::PoolClosing => {
                warn!("pool closing with an unconsumed stream; truncating it");
                truncated.store(true, Ordering::Release);
                false
            }
        };
        let outcome = guarded(|| job(conn, &mut |item| push(Ok(item))));
        if let Err(err) = outcome {
            push(Err(err));
        }
    }

    fn reject(self: Box<Self>, err: OrmError) {
        // A job is rejected before it pushes anything, so the channel has room.
        let _ = self.sink.try_push(Err(err));
    }
}

fn guarded<R>(job: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "worker job panicked");
            Err(OrmError::WorkerPanic(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
