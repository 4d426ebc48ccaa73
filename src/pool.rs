//! Fixed-size worker pool: `N` threads, each exclusively owning one connection.
//!
//! Jobs go into one FIFO queue and run on whichever worker frees up first, so two jobs from the
//! same caller may run concurrently and finish in either order. Await a handle before submitting
//! a dependent job, or run the dependent steps together through `pinned`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::oneshot;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ConnectOptions, ConnectionFactory, PoolOptions};
use crate::error::{OrmError, Result};
use crate::executor::{Emit, Executor};
use crate::worker::{self, Admission, Command, Envelope, ReplyTask, RowSink, StreamTask, Task};

/// Capacity of the channel between a streaming job and its consumer.
pub const STREAM_CAPACITY: usize = 128;

/// Cloneable handle to a set of worker threads.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    sender: Mutex<Option<Sender<Command>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
    acquire_timeout: Option<Duration>,
    closed: AtomicBool,
    /// Cancelled when shutdown starts; streams stuck on a full channel give up on it.
    closing: CancellationToken,
}

/// Caller-side state of a queued stream.
pub(crate) struct StreamTicket {
    pub(crate) cancel: CancellationToken,
    pub(crate) truncated: Arc<AtomicBool>,
    pub(crate) admission: Option<Arc<Admission>>,
}

impl WorkerPool {
    /// Open one connection per worker and start the threads.
    ///
    /// Connections are opened before any thread starts, so a bad path fails here rather than
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, or [`OrmError::ConnectionError`] if a thread cannot be spawned.
    pub fn new(factory: &ConnectionFactory, options: &PoolOptions) -> Result<Self> {
        let workers = options.workers.max(1);
        let connections = (0..workers)
            .map(|_| factory())
            .collect::<Result<Vec<Connection>>>()?;

        let (sender, receiver) = mpsc::channel::<Command>();
        let receiver = Arc::new(Mutex::new(receiver));
        let inner = PoolInner {
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(Vec::with_capacity(workers)),
            workers,
            acquire_timeout: options.acquire_timeout,
            closed: AtomicBool::new(false),
            closing: CancellationToken::new(),
        };
        for (i, conn) in connections.into_iter().enumerate() {
            let handle = worker::spawn_worker(
                format!("{}-{i}", options.thread_name_prefix),
                conn,
                Arc::clone(&receiver),
            )?;
            inner
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
        debug!(workers, "worker pool started");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// # Errors
    ///
    /// See [`WorkerPool::new`].
    pub fn open(connect: &ConnectOptions, options: &PoolOptions) -> Result<Self> {
        Self::new(&connect.factory(), options)
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, let the workers drain what is already queued, then join them and
    /// close their connections. Calling it again is a no-op.
    ///
    /// A streaming job whose channel is full stops instead of waiting for its consumer, which
    /// then sees [`OrmError::PoolClosed`] after the rows already delivered.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Queue a job that borrows a worker's connection.
    ///
    /// With an acquire timeout configured, waiting on the handle gives up with
    /// [`OrmError::Timeout`] once the job has sat in the queue that long.
    pub fn submit<R, F>(&self, job: F) -> JobHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    {
        let (respond_to, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let admission = self.admission();
        self.enqueue(
            Box::new(ReplyTask { job, respond_to }),
            cancel.clone(),
            admission.clone(),
        );
        JobHandle {
            rx,
            cancel,
            admission,
            timer: None,
        }
    }

    pub(crate) fn submit_stream<T, F, S>(&self, job: F, sink: S) -> StreamTicket
    where
        T: Send + 'static,
        F: FnOnce(&Connection, Emit<'_, T>) -> Result<()> + Send + 'static,
        S: RowSink<T> + 'static,
    {
        let cancel = CancellationToken::new();
        let truncated = Arc::new(AtomicBool::new(false));
        let admission = self.admission();
        let task = StreamTask::<F, S, T>::new(
            job,
            sink,
            self.inner.closing.clone(),
            Arc::clone(&truncated),
        );
        self.enqueue(Box::new(task), cancel.clone(), admission.clone());
        StreamTicket {
            cancel,
            truncated,
            admission,
        }
    }

    fn admission(&self) -> Option<Arc<Admission>> {
        self.inner
            .acquire_timeout
            .map(|limit| Arc::new(Admission::new(limit)))
    }

    fn enqueue(
        &self,
        task: Box<dyn Task>,
        cancel: CancellationToken,
        admission: Option<Arc<Admission>>,
    ) {
        let envelope = Envelope {
            task,
            cancel,
            admission,
        };
        let rejected = {
            let guard = self.inner.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(sender) => sender
                    .send(Command::Run(envelope))
                    .err()
                    .map(|mpsc::SendError(command)| command),
                None => Some(Command::Run(envelope)),
            }
        };
        if let Some(Command::Run(envelope)) = rejected {
            if let Some(admission) = &envelope.admission {
                admission.leave_queue();
            }
            envelope.task.reject(OrmError::PoolClosed);
        }
    }
}

impl PoolInner {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closing.cancel();
        if let Some(sender) = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            for _ in 0..self.workers {
                let _ = sender.send(Command::Shutdown);
            }
        }
        let threads =
            std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in threads {
            if handle.join().is_err() {
                warn!("worker thread terminated abnormally");
            }
        }
        debug!(workers = self.workers, "worker pool shut down");
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pending result of a queued job.
///
/// Await it from async code, or call [`JobHandle::wait`] from a plain thread.
#[derive(Debug)]
#[must_use = "a job handle does nothing unless waited on"]
pub struct JobHandle<R> {
    rx: oneshot::Receiver<Result<R>>,
    cancel: CancellationToken,
    admission: Option<Arc<Admission>>,
    timer: Option<Pin<Box<Sleep>>>,
}

impl<R> JobHandle<R> {
    pub(crate) fn failed(err: OrmError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self {
            rx,
            cancel: CancellationToken::new(),
            admission: None,
            timer: None,
        }
    }

    /// Block the current thread until the job finishes.
    ///
    /// Must not be called from inside an async runtime; await the handle there instead.
    ///
    /// # Errors
    ///
    /// Returns the job's own error, [`OrmError::Cancelled`], [`OrmError::Timeout`], or
    /// [`OrmError::PoolClosed`] if the worker went away without answering.
    pub fn wait(mut self) -> Result<R> {
        if let Ok(outcome) = self.rx.try_recv() {
            return outcome;
        }
        if let Some(admission) = self.admission.take() {
            if !admission.wait_admitted() {
                self.cancel.cancel();
                return Err(OrmError::Timeout(admission.limit()));
            }
        }
        self.rx.blocking_recv().unwrap_or(Err(OrmError::PoolClosed))
    }

    /// Withdraw the job if no worker has picked it up yet. A job already running finishes
    /// normally and its result is still delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<R> Future for JobHandle<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Poll::Ready(received) = Pin::new(&mut this.rx).poll(cx) {
            return Poll::Ready(received.unwrap_or(Err(OrmError::PoolClosed)));
        }
        match poll_admission(&mut this.admission, &mut this.timer, cx) {
            Some(limit) => {
                this.cancel.cancel();
                Poll::Ready(Err(OrmError::Timeout(limit)))
            }
            None => Poll::Pending,
        }
    }
}

/// Poll the acquire deadline of a job that has not produced anything yet. Returns the limit
/// once the job is given up on; clears `admission` once a worker has taken the job.
///
/// Without a tokio timer in reach the deadline is left to the worker that dequeues the job.
pub(crate) fn poll_admission(
    admission: &mut Option<Arc<Admission>>,
    timer: &mut Option<Pin<Box<Sleep>>>,
    cx: &mut Context<'_>,
) -> Option<Duration> {
    let Some(pending) = admission.as_ref() else {
        return None;
    };
    if timer.is_none() {
        if tokio::runtime::Handle::try_current().is_err() {
            *admission = None;
            return None;
        }
        *timer = Some(Box::pin(tokio::time::sleep_until(pending.deadline().into())));
    }
    let fired = timer.as_mut().is_some_and(|t| t.as_mut().poll(cx).is_ready());
    if !fired {
        return None;
    }
    let limit = pending.limit();
    let timed_out = pending.expire();
    *admission = None;
    *timer = None;
    timed_out.then_some(limit)
}

/// Rows streamed from a worker through a bounded channel.
///
/// Single pass. Dropping the stream stops the producing job at its next row.
#[derive(Debug)]
pub struct RowStream<T> {
    rx: mpsc::Receiver<Result<T>>,
    cancel: CancellationToken,
    truncated: Arc<AtomicBool>,
    admission: Option<Arc<Admission>>,
    finished: bool,
}

impl<T> RowStream<T> {
    fn failed(err: OrmError) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        let _ = tx.send(Err(err));
        Self {
            rx,
            cancel: CancellationToken::new(),
            truncated: Arc::new(AtomicBool::new(false)),
            admission: None,
            finished: false,
        }
    }

    /// Withdraw the query if it has not started yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<T> Iterator for RowStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(admission) = self.admission.take() {
            if !admission.wait_admitted() {
                self.cancel.cancel();
                self.finished = true;
                return Some(Err(OrmError::Timeout(admission.limit())));
            }
        }
        match self.rx.recv() {
            Ok(Ok(item)) => Some(Ok(item)),
            Ok(Err(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            Err(_) => {
                self.finished = true;
                self.truncated
                    .load(Ordering::Acquire)
                    .then_some(Err(OrmError::PoolClosed))
            }
        }
    }
}

impl Executor for WorkerPool {
    type Handle<R: Send + 'static> = JobHandle<R>;
    type Rows<T: Send + 'static> = RowStream<T>;

    fn execute<R, F>(&self, job: F) -> JobHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    {
        self.submit(job)
    }

    fn stream<T, F>(&self, job: F) -> RowStream<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, Emit<'_, T>) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(STREAM_CAPACITY);
        let StreamTicket {
            cancel,
            truncated,
            admission,
        } = self.submit_stream(job, tx);
        RowStream {
            rx,
            cancel,
            truncated,
            admission,
            finished: false,
        }
    }

    fn reject<R: Send + 'static>(&self, err: OrmError) -> JobHandle<R> {
        JobHandle::failed(err)
    }

    fn reject_rows<T: Send + 'static>(&self, err: OrmError) -> RowStream<T> {
        RowStream::failed(err)
    }
}
