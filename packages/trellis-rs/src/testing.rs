//! Testing utilities for workflows and workers.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! trellis = { version = "0.1", features = ["testing"] }
//! ```
//!
//! ## Driving a worker by hand
//!
//! ```ignore
//! use trellis::testing::ManualWorker;
//!
//! let (worker, driver) = ManualWorker::<u32>::new("poll");
//! // render a workflow that runs `worker`...
//! driver.send(7);   // delivered as one emission
//! driver.finish();  // the worker's task completes
//! assert_eq!(driver.starts(), 1);
//! ```
//!
//! ## Using `EventLatch` to wait for callbacks
//!
//! ```ignore
//! use trellis::testing::EventLatch;
//!
//! let latch = Arc::new(EventLatch::new(3));
//! // count down from a diagnostic listener or a worker...
//! latch.await_zero().await;
//! ```

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::worker::{Emitter, Worker};

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    finished: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl<T> Shared<T> {
    fn pop(&self) -> Option<T> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

/// A worker whose emissions are pushed in by a test through its
/// [`WorkerDriver`].
///
/// Two manual workers do the same work when they were created with the same
/// token, so a test controls whether a re-render keeps or restarts it.
pub struct ManualWorker<T> {
    token: String,
    shared: Arc<Shared<T>>,
}

impl<T: Debug + Send + 'static> ManualWorker<T> {
    pub fn new(token: &str) -> (Self, WorkerDriver<T>) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            finished: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        (
            Self {
                token: token.to_string(),
                shared: shared.clone(),
            },
            WorkerDriver { shared },
        )
    }
}

impl<T> Clone for ManualWorker<T> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Counts a stop when the running task is dropped or returns.
struct StopGuard<T>(Arc<Shared<T>>);

impl<T> Drop for StopGuard<T> {
    fn drop(&mut self) {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Debug + Send + 'static> Worker for ManualWorker<T> {
    type Output = T;

    async fn run(&self, emitter: Emitter<T>) -> Result<()> {
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        let _guard = StopGuard(self.shared.clone());
        loop {
            let notified = self.shared.notify.notified();
            if let Some(value) = self.shared.pop() {
                emitter.emit(value).await?;
                continue;
            }
            if self.shared.finished.load(Ordering::SeqCst) {
                return Ok(());
            }
            notified.await;
        }
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.token == other.token
    }

    fn describe(&self) -> String {
        format!("ManualWorker({})", self.token)
    }
}

/// The test's side of a [`ManualWorker`].
pub struct WorkerDriver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> WorkerDriver<T> {
    /// Queue one emission.
    pub fn send(&self, value: T) {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(value);
        self.shared.notify.notify_one();
    }

    /// Let the worker's task complete once its queue is drained.
    pub fn finish(&self) {
        self.shared.finished.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    /// How many times the worker's task has started.
    pub fn starts(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    /// How many times a started task has ended, by returning or by being
    /// cancelled.
    pub fn stops(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }

    /// Emissions queued but not yet picked up.
    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl<T> Debug for WorkerDriver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDriver")
            .field("starts", &self.starts())
            .field("stops", &self.stops())
            .finish_non_exhaustive()
    }
}

/// Count-down latch for tests that expect a known number of callbacks.
///
/// Tests should wait for meaning, not time. Wrap in an `Arc` to share it
/// with a listener or worker.
#[derive(Debug)]
pub struct EventLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl EventLatch {
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        }
    }

    /// Count one event. Extra events past zero are ignored.
    pub fn dec(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    /// Wait for the count to reach zero. Returns immediately if it already has.
    pub async fn await_zero(&self) {
        loop {
            // Register before checking so a concurrent `dec` is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}
