//! Async adapter: operations run on worker threads while the calling task awaits.
//!
//! Experimental. It adds no transactional guarantees beyond what the engine itself provides,
//! and its surface may still change.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures_util::Stream;
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectOptions, ConnectionFactory, PoolOptions};
use crate::error::{OrmError, Result};
use crate::executor::{Emit, Executor};
use crate::pool::{JobHandle, STREAM_CAPACITY, StreamTicket, WorkerPool, poll_admission};
use crate::worker::Admission;

/// Hands every operation to a worker and resolves when it completes.
///
/// One worker by default, so the caller sees a single logical connection.
#[derive(Clone, Debug)]
pub struct AsyncExecutor {
    pool: WorkerPool,
}

impl AsyncExecutor {
    /// # Errors
    ///
    /// See [`WorkerPool::new`].
    pub fn new(factory: &ConnectionFactory) -> Result<Self> {
        Self::with_options(factory, &PoolOptions::new(1).thread_name_prefix("tablespec-async"))
    }

    /// # Errors
    ///
    /// See [`WorkerPool::new`].
    pub fn with_options(factory: &ConnectionFactory, options: &PoolOptions) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::new(factory, options)?,
        })
    }

    /// # Errors
    ///
    /// See [`WorkerPool::new`].
    pub fn open(connect: &ConnectOptions) -> Result<Self> {
        Self::new(&connect.factory())
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Stop the workers and close their connections.
    ///
    /// Joining happens on a blocking thread so the runtime keeps making progress.
    pub async fn shutdown(&self) {
        let pool = self.pool.clone();
        if tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .is_err()
        {
            tracing::warn!("async executor shutdown task failed");
        }
    }
}

/// Rows streamed from a worker; consume with [`AsyncRows::next`] or as a [`Stream`].
///
/// Dropping it stops the producing job at its next row. If the executor shuts down before the
/// rows are drained, the stream ends with [`OrmError::PoolClosed`].
#[derive(Debug)]
pub struct AsyncRows<T> {
    rx: mpsc::Receiver<Result<T>>,
    cancel: CancellationToken,
    truncated: Arc<AtomicBool>,
    admission: Option<Arc<Admission>>,
    timer: Option<Pin<Box<Sleep>>>,
    finished: bool,
}

impl<T> AsyncRows<T> {
    pub async fn next(&mut self) -> Option<Result<T>> {
        std::future::poll_fn(|cx| self.poll_item(cx)).await
    }

    /// Drain the stream, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error the producing job reported.
    pub async fn try_collect(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    /// Withdraw the query if it has not started yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn poll_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<T>>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(item))) => {
                self.admission = None;
                self.timer = None;
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Err(err))) => {
                self.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                let truncated = self.truncated.load(Ordering::Acquire);
                Poll::Ready(truncated.then_some(Err(OrmError::PoolClosed)))
            }
            Poll::Pending => match poll_admission(&mut self.admission, &mut self.timer, cx) {
                Some(limit) => {
                    self.cancel.cancel();
                    self.finished = true;
                    Poll::Ready(Some(Err(OrmError::Timeout(limit))))
                }
                None => Poll::Pending,
            },
        }
    }
}

impl<T> Stream for AsyncRows<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_item(cx)
    }
}

impl Executor for AsyncExecutor {
    type Handle<R: Send + 'static> = JobHandle<R>;
    type Rows<T: Send + 'static> = AsyncRows<T>;

    fn execute<R, F>(&self, job: F) -> JobHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    {
        self.pool.submit(job)
    }

    fn stream<T, F>(&self, job: F) -> AsyncRows<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, Emit<'_, T>) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let StreamTicket {
            cancel,
            truncated,
            admission,
        } = self.pool.submit_stream(job, tx);
        AsyncRows {
            rx,
            cancel,
            truncated,
            admission,
            timer: None,
            finished: false,
        }
    }

    fn reject<R: Send + 'static>(&self, err: OrmError) -> JobHandle<R> {
        JobHandle::failed(err)
    }

    fn reject_rows<T: Send + 'static>(&self, err: OrmError) -> AsyncRows<T> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Err(err));
        AsyncRows {
            rx,
            cancel: CancellationToken::new(),
            truncated: Arc::new(AtomicBool::new(false)),
            admission: None,
            timer: None,
            finished: false,
        }
    }
}
