//! The render context: what a render function uses to declare its children,
//! workers and sinks.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::action::WorkflowAction;
use crate::diagnostic::DiagnosticId;
use crate::error::WorkflowError;
use crate::node::TreeContext;
use crate::subtree::SubtreeManager;
use crate::tracker::WorkerTracker;
use crate::worker::{Worker, WorkerEvent};
use crate::workflow::Workflow;

/// Collects the children, workers and sinks of one render pass.
///
/// A context is handed to exactly one call of [`Workflow::render`] and is
/// frozen when that call returns.
pub struct RenderContext<'a, S, O> {
    workflow: &'static str,
    id: DiagnosticId,
    subtree: &'a mut SubtreeManager<S, O>,
    workers: &'a mut WorkerTracker<S, O>,
    sink: &'a mpsc::UnboundedSender<WorkflowAction<S, O>>,
    pass: &'a Arc<AtomicBool>,
    tree: &'a TreeContext,
    frozen: bool,
}

impl<'a, S: Send + 'static, O: Send + 'static> RenderContext<'a, S, O> {
    pub(crate) fn new(
        workflow: &'static str,
        id: DiagnosticId,
        subtree: &'a mut SubtreeManager<S, O>,
        workers: &'a mut WorkerTracker<S, O>,
        sink: &'a mpsc::UnboundedSender<WorkflowAction<S, O>>,
        pass: &'a Arc<AtomicBool>,
        tree: &'a TreeContext,
    ) -> Self {
        Self {
            workflow,
            id,
            subtree,
            workers,
            sink,
            pass,
            tree,
            frozen: false,
        }
    }

    /// Render a child workflow and return its rendering.
    ///
    /// The child at `(C, key)` keeps its state across passes for as long as it
    /// keeps being rendered. Its outputs are turned into actions on this
    /// workflow by `mapper`; the mapper from the latest pass is the one used.
    ///
    /// Requesting the same `(C, key)` twice in one pass is an error.
    pub fn render_child<C, F>(
        &mut self,
        child: C,
        props: C::Props,
        key: &str,
        mapper: F,
    ) -> Result<C::Rendering, WorkflowError>
    where
        C: Workflow,
        F: Fn(C::Output) -> WorkflowAction<S, O> + Send + 'static,
    {
        self.ensure_active()?;
        self.subtree.render(child, props, key, Box::new(mapper))
    }

    /// Keep `worker` running at `(W, key)` and turn its emissions into actions.
    ///
    /// If a worker already runs at the key and
    /// [does the same work](Worker::does_same_work_as), it keeps running and
    /// only the mapper is replaced. Otherwise it is cancelled and `worker`
    /// started in its place.
    pub fn run_worker<W, F>(&mut self, worker: W, key: &str, mapper: F) -> Result<(), WorkflowError>
    where
        W: Worker,
        F: Fn(W::Output) -> WorkflowAction<S, O> + Send + 'static,
    {
        self.ensure_active()?;
        self.workers.run(
            key,
            worker,
            Box::new(move |event| match event {
                WorkerEvent::Output(value) => Some(mapper(value)),
                WorkerEvent::Finished => None,
            }),
        )
    }

    /// Like [`run_worker`](Self::run_worker), but the mapper is also told,
    /// once, when the worker's task completes normally.
    pub fn run_worker_until_finished<W, F>(
        &mut self,
        worker: W,
        key: &str,
        mapper: F,
    ) -> Result<(), WorkflowError>
    where
        W: Worker,
        F: Fn(WorkerEvent<W::Output>) -> WorkflowAction<S, O> + Send + 'static,
    {
        self.ensure_active()?;
        self.workers
            .run(key, worker, Box::new(move |event| Some(mapper(event))))
    }

    /// Create a sink that turns each value sent to it into an action.
    ///
    /// The sink may be used from anywhere once this render pass has finished,
    /// and stays usable across later passes until the workflow is torn down.
    pub fn make_sink<E, F>(&mut self, mapper: F) -> Result<Sink<E>, WorkflowError>
    where
        E: 'static,
        F: Fn(E) -> WorkflowAction<S, O> + Send + Sync + 'static,
    {
        self.ensure_active()?;
        let workflow = self.workflow;
        let id = self.id;
        let tx = self.sink.clone();
        let pass = self.pass.clone();
        let listener = self.tree.shared_listener();
        Ok(Sink {
            send: Arc::new(move |event| {
                if !pass.load(Ordering::Acquire) {
                    return Err(WorkflowError::SinkUsedDuringRender { workflow });
                }
                let action = mapper(event);
                if let Some(listener) = &listener {
                    listener.on_sink_received(id, action.name());
                }
                tx.send(action)
                    .map_err(|_| WorkflowError::SinkClosed { workflow })
            }),
        })
    }

    /// A sink that accepts actions directly.
    pub fn action_sink(&mut self) -> Result<Sink<WorkflowAction<S, O>>, WorkflowError> {
        self.make_sink(|action| action)
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    fn ensure_active(&self) -> Result<(), WorkflowError> {
        if self.frozen {
            return Err(WorkflowError::RenderContextFrozen {
                workflow: self.workflow,
            });
        }
        Ok(())
    }
}

impl<S, O> fmt::Debug for RenderContext<'_, S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("workflow", &self.workflow)
            .field("id", &self.id)
            .field("frozen", &self.frozen)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Sink
// =============================================================================

/// Sends values into a workflow, each becoming one action.
///
/// Cheap to clone, and usable from any thread.
pub struct Sink<E> {
    send: Arc<dyn Fn(E) -> Result<(), WorkflowError> + Send + Sync>,
}

impl<E> Sink<E> {
    /// Queue `event` for the workflow that created this sink.
    ///
    /// Fails with [`WorkflowError::SinkUsedDuringRender`] if the render pass
    /// that created the sink has not finished, and with
    /// [`WorkflowError::SinkClosed`] once the workflow has been torn down.
    pub fn send(&self, event: E) -> Result<(), WorkflowError> {
        (self.send)(event)
    }
}

impl<E> Clone for Sink<E> {
    fn clone(&self) -> Self {
        Self {
            send: self.send.clone(),
        }
    }
}

impl<E> fmt::Debug for Sink<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sink<{}>", std::any::type_name::<E>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::workflow::StatelessWorkflow;
    use crate::Stateless;

    struct Leaf;

    impl StatelessWorkflow for Leaf {
        type Props = ();
        type Output = ();
        type Rendering = &'static str;

        fn render(&self, _: &(), _: &mut RenderContext<'_, (), ()>) -> anyhow::Result<&'static str> {
            Ok("leaf")
        }
    }

    struct Parts {
        subtree: SubtreeManager<u32, ()>,
        workers: WorkerTracker<u32, ()>,
        tx: mpsc::UnboundedSender<WorkflowAction<u32, ()>>,
        rx: mpsc::UnboundedReceiver<WorkflowAction<u32, ()>>,
        pass: Arc<AtomicBool>,
        tree: TreeContext,
    }

    fn parts() -> Parts {
        let tree = TreeContext::new(None, Arc::new(RuntimeConfig::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        Parts {
            subtree: SubtreeManager::new(DiagnosticId(1), tree.clone()),
            workers: WorkerTracker::new(DiagnosticId(1), tree.clone()),
            tx,
            rx,
            pass: Arc::new(AtomicBool::new(false)),
            tree,
        }
    }

    #[tokio::test]
    async fn test_frozen_context_rejects_everything() {
        let mut p = parts();
        let mut ctx = RenderContext::new(
            "Test",
            DiagnosticId(1),
            &mut p.subtree,
            &mut p.workers,
            &p.tx,
            &p.pass,
            &p.tree,
        );
        assert_eq!(
            ctx.render_child(Stateless(Leaf), (), "a", |()| WorkflowAction::noop())
                .unwrap(),
            "leaf"
        );
        ctx.freeze();

        let err = ctx
            .render_child(Stateless(Leaf), (), "b", |()| WorkflowAction::noop())
            .expect_err("frozen");
        assert!(matches!(err, WorkflowError::RenderContextFrozen { workflow: "Test" }));
        assert!(ctx.action_sink().is_err());
        assert!(ctx
            .run_worker(crate::worker::Timer::new(std::time::Duration::from_secs(1)), "t", |()| {
                WorkflowAction::noop()
            })
            .is_err());
        assert!(format!("{ctx:?}").contains("frozen: true"));
    }

    #[tokio::test]
    async fn test_sink_waits_for_pass_to_finish() {
        let mut p = parts();
        let sink = {
            let mut ctx = RenderContext::new(
                "Test",
                DiagnosticId(1),
                &mut p.subtree,
                &mut p.workers,
                &p.tx,
                &p.pass,
                &p.tree,
            );
            ctx.make_sink(|n: u32| {
                WorkflowAction::new("add", move |total: &mut u32| {
                    *total += n;
                    None
                })
            })
            .unwrap()
        };

        assert!(matches!(
            sink.send(1),
            Err(WorkflowError::SinkUsedDuringRender { .. })
        ));
        p.pass.store(true, Ordering::Release);
        sink.clone().send(5).unwrap();

        let mut total = 0;
        p.rx.recv().await.unwrap().apply_to(&mut total).unwrap();
        assert_eq!(total, 5);

        drop(p.rx);
        assert!(matches!(sink.send(1), Err(WorkflowError::SinkClosed { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_child_key_fails_at_the_call() {
        let mut p = parts();
        let mut ctx = RenderContext::new(
            "Test",
            DiagnosticId(1),
            &mut p.subtree,
            &mut p.workers,
            &p.tx,
            &p.pass,
            &p.tree,
        );
        ctx.render_child(Stateless(Leaf), (), "dup", |()| WorkflowAction::noop())
            .unwrap();
        let err = ctx
            .render_child(Stateless(Leaf), (), "dup", |()| WorkflowAction::noop())
            .expect_err("duplicate");
        assert!(err.to_string().contains("2×"), "{err}");
        drop(ctx);
        p.subtree.rollback();
    }
}
