//! Workers: asynchronous tasks a workflow keeps running while it renders them.
//!
//! A worker is declared from a render function with
//! [`RenderContext::run_worker`](crate::RenderContext::run_worker). While the
//! same key keeps being declared the task keeps running; when the key
//! disappears the task is cancelled. If a declaration at an existing key does
//! *not* do the same work as the running one (see
//! [`Worker::does_same_work_as`]) the old task is cancelled and the new one
//! started.
//!
//! # Example
//!
//! ```ignore
//! struct Poll { url: String }
//!
//! #[async_trait]
//! impl Worker for Poll {
//!     type Output = Status;
//!
//!     async fn run(&self, emitter: Emitter<Status>) -> anyhow::Result<()> {
//!         loop {
//!             emitter.emit(fetch(&self.url).await?).await?;
//!             tokio::time::sleep(Duration::from_secs(5)).await;
//!         }
//!     }
//!
//!     fn does_same_work_as(&self, other: &Self) -> bool {
//!         self.url == other.url
//!     }
//! }
//! ```

use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::WorkflowError;

/// An asynchronous task that emits values to the workflow that runs it.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Values this worker emits.
    type Output: Debug + Send + 'static;

    /// Run the task. Returning ends the worker; an error ends the whole run.
    ///
    /// Emissions are delivered one at a time, each converted into an action
    /// for the owning workflow. `emit` waits while earlier emissions are
    /// still queued.
    async fn run(&self, emitter: Emitter<Self::Output>) -> Result<()>;

    /// Whether `other`, declared at the same key, can keep this task running
    /// instead of restarting it. Defaults to true: workers of the same type
    /// are equivalent unless they say otherwise.
    fn does_same_work_as(&self, _other: &Self) -> bool {
        true
    }

    /// Human readable description for logs and diagnostics.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Handle a running worker uses to emit values.
pub struct Emitter<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Emitter<T> {
    pub(crate) fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }

    /// Emit a value, waiting for room in the worker's queue.
    ///
    /// Fails with [`WorkflowError::Cancelled`] once the worker has been torn
    /// down. Returning that error from `run` is not reported as a failure.
    pub async fn emit(&self, value: T) -> Result<(), WorkflowError> {
        self.tx.send(value).await.map_err(|_| WorkflowError::Cancelled)
    }

    /// Returns true once the worker has been torn down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// What a worker registered with
/// [`run_worker_until_finished`](crate::RenderContext::run_worker_until_finished)
/// reports to its mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent<T> {
    /// The worker emitted a value.
    Output(T),
    /// The worker's task completed normally. Reported once, after every
    /// emitted value.
    Finished,
}

// =============================================================================
// Builders
// =============================================================================

/// A worker backed by an async closure.
///
/// Every `FnWorker` built from the same closure type does the same work, so
/// re-declaring it at the same key never restarts it.
pub struct FnWorker<T, F> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

/// Create a worker from an async closure.
///
/// ```ignore
/// ctx.run_worker(
///     worker::from_fn(|emitter| async move {
///         emitter.emit(load().await?).await?;
///         Ok(())
///     }),
///     "load",
///     |loaded| WorkflowAction::new("loaded", move |s: &mut State| { s.data = Some(loaded); None }),
/// )?;
/// ```
pub fn from_fn<T, F, Fut>(f: F) -> FnWorker<T, F>
where
    T: Debug + Send + 'static,
    F: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnWorker {
        f,
        _output: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> Worker for FnWorker<T, F>
where
    T: Debug + Send + 'static,
    F: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    type Output = T;

    async fn run(&self, emitter: Emitter<T>) -> Result<()> {
        (self.f)(emitter).await
    }

    fn describe(&self) -> String {
        format!("from_fn<{}>", std::any::type_name::<T>())
    }
}

/// A worker that forwards every item of a stream.
///
/// The stream is consumed by the first run; the worker finishes when the
/// stream ends.
pub struct StreamWorker<T> {
    stream: Mutex<Option<BoxStream<'static, T>>>,
}

/// Create a worker from a stream.
pub fn from_stream<St>(stream: St) -> StreamWorker<St::Item>
where
    St: Stream + Send + 'static,
    St::Item: Debug + Send + 'static,
{
    StreamWorker {
        stream: Mutex::new(Some(stream.boxed())),
    }
}

#[async_trait]
impl<T: Debug + Send + 'static> Worker for StreamWorker<T> {
    type Output = T;

    async fn run(&self, emitter: Emitter<T>) -> Result<()> {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let Some(mut stream) = stream else {
            return Ok(());
        };
        while let Some(item) = stream.next().await {
            emitter.emit(item).await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("from_stream<{}>", std::any::type_name::<T>())
    }
}

/// Emits `()` once after `delay`, then finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    delay: Duration,
}

impl Timer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl Worker for Timer {
    type Output = ();

    async fn run(&self, emitter: Emitter<()>) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        emitter.emit(()).await?;
        Ok(())
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.delay == other.delay
    }

    fn describe(&self) -> String {
        format!("Timer({:?})", self.delay)
    }
}
