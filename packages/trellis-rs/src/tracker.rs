//! Worker lifecycle tracking for one workflow node.
//!
//! Workers are polled inline by the node that owns them rather than spawned,
//! so tearing a worker down is just dropping its future: by the time the
//! render pass that dropped it returns, the task has observably stopped and
//! nothing it emitted can still be delivered.

use std::any::Any;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::action::WorkflowAction;
use crate::diagnostic::DiagnosticId;
use crate::error::{self, guarded, WorkflowError};
use crate::key::Key;
use crate::node::TreeContext;
use crate::reconcile::Reconciler;
use crate::worker::{Emitter, Worker, WorkerEvent};

/// Converts a worker event into an action for the owning workflow. `None`
/// means the event is not of interest.
pub(crate) type EventMapper<T, S, O> =
    Box<dyn Fn(WorkerEvent<T>) -> Option<WorkflowAction<S, O>> + Send>;

type Emission<S, O> = Poll<Result<Option<WorkflowAction<S, O>>, WorkflowError>>;

/// Type-erased worker handle.
pub(crate) trait WorkerSlot<S, O>: Send {
    /// Poll for the next emission.
    ///
    /// `Ready(Ok(Some(action)))` delivers an action, `Ready(Ok(None))` reports
    /// an event the mapper ignored.
    fn poll_emission(&mut self, cx: &mut Context<'_>) -> Emission<S, O>;

    /// Cancel the task. Idempotent.
    fn stop(&mut self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct WorkerHandle<W: Worker, S, O> {
    key: Key,
    worker: Arc<W>,
    id: DiagnosticId,
    parent: DiagnosticId,
    run: Option<BoxFuture<'static, anyhow::Result<()>>>,
    rx: Option<mpsc::Receiver<W::Output>>,
    mapper: EventMapper<W::Output, S, O>,
    /// Failure of the task, reported once everything it queued is delivered.
    failed: Option<WorkflowError>,
    finished: bool,
    stopped: bool,
    stop_reported: bool,
    tree: TreeContext,
}

impl<W: Worker, S, O> WorkerHandle<W, S, O> {
    fn start(
        key: Key,
        worker: W,
        mapper: EventMapper<W::Output, S, O>,
        parent: DiagnosticId,
        tree: TreeContext,
    ) -> Self {
        let id = tree.next_id();
        let worker = Arc::new(worker);
        let (tx, rx) = mpsc::channel(tree.config().worker_buffer.max(1));
        let emitter = Emitter::new(tx);
        let runner = worker.clone();
        let run = async move { runner.run(emitter).await }.boxed();

        let description = worker.describe();
        debug!(%id, %parent, key = %key, worker = %description, "worker started");
        if let Some(listener) = tree.listener() {
            listener.on_worker_started(id, parent, key.name(), &description);
        }

        Self {
            key,
            worker,
            id,
            parent,
            run: Some(run),
            rx: Some(rx),
            mapper,
            failed: None,
            finished: false,
            stopped: false,
            stop_reported: false,
            tree,
        }
    }

    fn deliver(
        &self,
        event: WorkerEvent<W::Output>,
    ) -> Result<Option<WorkflowAction<S, O>>, WorkflowError> {
        if let (WorkerEvent::Output(value), Some(listener)) = (&event, self.tree.listener()) {
            listener.on_worker_output(self.id, self.parent, value);
        }
        let mapper = &self.mapper;
        let key = &self.key;
        guarded(
            self.tree.config().catch_panics,
            || format!("worker mapper of {key}"),
            || mapper(event),
        )
    }

    /// Drop the task and its queue. Nothing it emitted is delivered afterwards.
    fn halt(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.run = None;
        self.rx = None;
        self.report_stopped();
    }

    /// Fires once per task, whether it ended on its own or was halted.
    fn report_stopped(&mut self) {
        if self.stop_reported {
            return;
        }
        self.stop_reported = true;
        debug!(id = %self.id, key = %self.key, "worker stopped");
        if let Some(listener) = self.tree.listener() {
            listener.on_worker_stopped(self.id, self.parent);
        }
    }

    fn poll_rx(&mut self, cx: &mut Context<'_>) -> Option<W::Output> {
        let rx = self.rx.as_mut()?;
        match rx.poll_recv(cx) {
            Poll::Ready(Some(value)) => Some(value),
            Poll::Ready(None) => {
                // Every emitter is gone; the task can no longer emit.
                self.rx = None;
                None
            }
            Poll::Pending => None,
        }
    }
}

impl<W, S, O> WorkerSlot<S, O> for WorkerHandle<W, S, O>
where
    W: Worker,
    S: 'static,
    O: 'static,
{
    fn poll_emission(&mut self, cx: &mut Context<'_>) -> Emission<S, O> {
        if self.stopped || self.finished {
            return Poll::Pending;
        }

        if let Some(value) = self.poll_rx(cx) {
            return Poll::Ready(self.deliver(WorkerEvent::Output(value)));
        }

        let catch_panics = self.tree.config().catch_panics;
        if let Some(run) = self.run.as_mut() {
            let key = &self.key;
            let polled = guarded(catch_panics, || format!("worker {key}"), || run.poll_unpin(cx));
            match polled {
                Ok(Poll::Pending) => {
                    // The task may have emitted while it was being polled.
                    return match self.poll_rx(cx) {
                        Some(value) => Poll::Ready(self.deliver(WorkerEvent::Output(value))),
                        None => Poll::Pending,
                    };
                }
                Ok(Poll::Ready(result)) => {
                    self.run = None;
                    if let Err(e) = result {
                        if !error::is_cancellation(&e) {
                            self.failed = Some(error::lift(e, |source| WorkflowError::Worker {
                                worker: self.key.to_string(),
                                source,
                            }));
                        }
                    }
                    self.report_stopped();
                }
                Err(panicked) => {
                    self.run = None;
                    self.failed = Some(panicked);
                    self.report_stopped();
                }
            }
        }

        // The task is done: drain what it queued, then report how it ended once.
        if let Some(rx) = self.rx.as_mut() {
            if let Ok(value) = rx.try_recv() {
                return Poll::Ready(self.deliver(WorkerEvent::Output(value)));
            }
            self.rx = None;
        }
        self.finished = true;
        if let Some(e) = self.failed.take() {
            return Poll::Ready(Err(e));
        }
        debug!(id = %self.id, key = %self.key, "worker finished");
        Poll::Ready(self.deliver(WorkerEvent::Finished))
    }

    fn stop(&mut self) {
        self.halt();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<W: Worker, S, O> Drop for WorkerHandle<W, S, O> {
    fn drop(&mut self) {
        self.halt();
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Keyed set of running workers for one node.
pub(crate) struct WorkerTracker<S, O> {
    workers: Reconciler<Box<dyn WorkerSlot<S, O>>>,
    parent: DiagnosticId,
    tree: TreeContext,
}

impl<S: 'static, O: 'static> WorkerTracker<S, O> {
    pub fn new(parent: DiagnosticId, tree: TreeContext) -> Self {
        Self {
            workers: Reconciler::new(),
            parent,
            tree,
        }
    }

    /// Declare `worker` at `name` for the current render pass.
    ///
    /// An equivalent worker already running at the key keeps running with the
    /// new mapper; anything else is stopped and replaced.
    pub fn run<W: Worker>(
        &mut self,
        name: &str,
        worker: W,
        mapper: EventMapper<W::Output, S, O>,
    ) -> Result<(), WorkflowError> {
        let key = Key::of::<W>(name);
        let slot = match self.workers.claim(&key)? {
            Some(mut slot) => {
                let handle = slot
                    .as_any_mut()
                    .downcast_mut::<WorkerHandle<W, S, O>>()
                    .ok_or_else(|| WorkflowError::TypeMismatch {
                        key: key.to_string(),
                    })?;
                if handle.worker.does_same_work_as(&worker) {
                    handle.mapper = mapper;
                    slot
                } else {
                    slot.stop();
                    drop(slot);
                    Box::new(WorkerHandle::start(
                        key.clone(),
                        worker,
                        mapper,
                        self.parent,
                        self.tree.clone(),
                    ))
                }
            }
            None => Box::new(WorkerHandle::start(
                key.clone(),
                worker,
                mapper,
                self.parent,
                self.tree.clone(),
            )),
        };
        self.workers.stage(key, slot);
        Ok(())
    }

    pub fn duplicates(&self) -> Vec<(String, usize)> {
        self.workers.duplicates()
    }

    /// Stop every worker not declared this pass.
    pub fn commit(&mut self) {
        self.workers.commit(|_, mut slot| slot.stop());
    }

    pub fn rollback(&mut self) {
        self.workers.rollback();
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn poll_emission(&mut self, idx: usize, cx: &mut Context<'_>) -> Emission<S, O> {
        match self.workers.get_mut(idx) {
            Some((_, slot)) => slot.poll_emission(cx),
            None => Poll::Pending,
        }
    }

    pub fn dispose_all(&mut self) {
        for (_, mut slot) in self.workers.drain_all() {
            slot.stop();
        }
    }
}
