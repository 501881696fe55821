//! The runtime loop: drives one root workflow.
//!
//! ```text
//!        props ──┐
//!                ▼
//!   ┌──────► render pass ──► renderings (watch, conflating)
//!   │            │
//!   │            ▼
//!   └── next_action() ──► outputs (mpsc, ordered)
//!        (children, workers, sinks)
//! ```
//!
//! Every accepted props push and every applied action is followed by exactly
//! one render pass of the whole tree. The loop ends when the handle asks it to
//! (or is dropped), or when anything in the tree fails; either way the whole
//! tree is torn down before the loop returns.
//!
//! # Usage
//!
//! ```ignore
//! use trellis::{Runtime, RuntimeConfig};
//!
//! let mut runtime = Runtime::builder(Checkout, cart)
//!     .with_config(RuntimeConfig::from_env()?)
//!     .with_listener(Arc::new(TracingListener))
//!     .launch()?;
//!
//! let mut renderings = runtime.renderings();
//! let mut outputs = runtime.take_outputs().expect("first take");
//!
//! while renderings.changed().await.is_ok() {
//!     show(&renderings.borrow().rendering);
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::RuntimeConfig;
use crate::diagnostic::{RunId, WorkflowDiagnosticListener};
use crate::error::{panic_message, WorkflowError};
use crate::node::{TreeContext, WorkflowNode};
use crate::snapshot::Snapshot;
use crate::workflow::Workflow;

/// A rendering together with the snapshot of the tree that produced it.
#[derive(Debug, Clone)]
pub struct RenderingAndSnapshot<R> {
    pub rendering: R,
    /// Lazily encoded; reading its bytes does not touch the running tree.
    pub snapshot: Snapshot,
}

/// Entry point for launching a workflow runtime.
pub struct Runtime;

impl Runtime {
    /// Start configuring a runtime for `workflow` with initial `props`.
    pub fn builder<W: Workflow>(workflow: W, props: W::Props) -> RuntimeBuilder<W> {
        RuntimeBuilder {
            workflow,
            props,
            snapshot: None,
            listener: None,
            config: RuntimeConfig::default(),
        }
    }
}

/// Builder for a workflow runtime.
pub struct RuntimeBuilder<W: Workflow> {
    workflow: W,
    props: W::Props,
    snapshot: Option<Vec<u8>>,
    listener: Option<Arc<dyn WorkflowDiagnosticListener>>,
    config: RuntimeConfig,
}

impl<W> RuntimeBuilder<W>
where
    W: Workflow,
    W::Rendering: Sync,
{
    /// Restore the tree from snapshot bytes captured by an earlier run.
    pub fn with_snapshot(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.snapshot = Some(bytes.into());
        self
    }

    /// Attach a diagnostic listener.
    pub fn with_listener(mut self, listener: Arc<dyn WorkflowDiagnosticListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Render the tree once and start the loop on the current tokio runtime.
    ///
    /// The first render pass runs before this returns, so its errors are
    /// returned here and a rendering is always available from the handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn launch(self) -> Result<RuntimeHandle<W>, WorkflowError> {
        let Self {
            workflow,
            props,
            snapshot,
            listener,
            config,
        } = self;
        let run_id = RunId::new();
        let name = std::any::type_name::<W>();
        let span = info_span!("workflow_runtime", run = %run_id, workflow = name);
        let _entered = span.enter();

        let output_buffer = config.output_buffer.max(1);
        let props_buffer = config.props_buffer.max(1);
        let tree = TreeContext::new(listener, Arc::new(config));

        info!(workflow = name, restored = snapshot.is_some(), "workflow runtime starting");
        if let Some(listener) = tree.listener() {
            listener.on_runtime_started(run_id, name);
        }

        let first = WorkflowNode::new(
            workflow,
            props.clone(),
            String::new(),
            None,
            snapshot.as_deref(),
            tree.clone(),
        )
        .and_then(|mut root| {
            let first = render_pass(&mut root, props.clone(), &tree)?;
            Ok((root, first))
        });
        let (root, first) = match first {
            Ok(started) => started,
            Err(e) => {
                error!(error = %e, "workflow runtime failed to start");
                if let Some(listener) = tree.listener() {
                    listener.on_runtime_stopped(run_id, Some(&e));
                }
                return Err(e);
            }
        };

        let (renderings_tx, renderings_rx) = watch::channel(first);
        let (outputs_tx, outputs_rx) = mpsc::channel(output_buffer);
        let (props_tx, props_rx) = mpsc::channel(props_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(
            run_loop(
                root,
                props,
                props_rx,
                renderings_tx,
                outputs_tx,
                shutdown_rx,
                tree,
                run_id,
            )
            .instrument(span.clone()),
        );

        Ok(RuntimeHandle {
            run_id,
            renderings: renderings_rx,
            outputs: Some(outputs_rx),
            props: PropsSender { tx: props_tx },
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

fn render_pass<W: Workflow>(
    root: &mut WorkflowNode<W>,
    props: W::Props,
    tree: &TreeContext,
) -> Result<RenderingAndSnapshot<W::Rendering>, WorkflowError> {
    let listener = tree.listener();
    if let Some(listener) = listener {
        listener.on_before_render_pass(&props);
    }
    let rendering = root.render(props)?;
    if let Some(listener) = listener {
        listener.on_after_render_pass(&rendering);
        listener.on_before_snapshot_pass();
    }
    let snapshot = root.snapshot()?;
    if let Some(listener) = listener {
        listener.on_after_snapshot_pass();
    }
    Ok(RenderingAndSnapshot {
        rendering,
        snapshot,
    })
}

enum Step<P, O> {
    Shutdown,
    Props(P),
    PropsClosed,
    Tick(Result<Option<O>, WorkflowError>),
}

#[allow(clippy::too_many_arguments)]
async fn run_loop<W: Workflow>(
    mut root: WorkflowNode<W>,
    mut props: W::Props,
    mut props_rx: mpsc::Receiver<W::Props>,
    renderings: watch::Sender<RenderingAndSnapshot<W::Rendering>>,
    outputs: mpsc::Sender<W::Output>,
    mut shutdown: oneshot::Receiver<()>,
    tree: TreeContext,
    run_id: RunId,
) -> Result<(), WorkflowError> {
    let mut props_open = true;

    let result = loop {
        let step = tokio::select! {
            biased;
            _ = &mut shutdown => Step::Shutdown,
            incoming = props_rx.recv(), if props_open => match incoming {
                Some(next) => Step::Props(next),
                None => Step::PropsClosed,
            },
            tick = root.next_action() => Step::Tick(tick),
        };

        let output = match step {
            Step::Shutdown => break Ok(()),
            Step::PropsClosed => {
                props_open = false;
                continue;
            }
            Step::Props(next) => {
                props = next;
                None
            }
            Step::Tick(Ok(output)) => output,
            Step::Tick(Err(e)) => break Err(e),
        };

        match render_pass(&mut root, props.clone(), &tree) {
            Ok(next) => {
                renderings.send_replace(next);
            }
            Err(e) => break Err(e),
        }

        if let Some(output) = output {
            tokio::select! {
                biased;
                _ = &mut shutdown => break Ok(()),
                sent = outputs.send(output) => {
                    if let Err(mpsc::error::SendError(dropped)) = sent {
                        warn!(output = ?dropped, "output receiver closed, dropping output");
                    }
                }
            }
        }
    };

    root.dispose();
    match &result {
        Ok(()) => info!("workflow runtime stopped"),
        Err(e) => error!(error = %e, category = %e.category(), "workflow runtime failed"),
    }
    if let Some(listener) = tree.listener() {
        listener.on_runtime_stopped(run_id, result.as_ref().err());
    }
    result
}

// =============================================================================
// Handle
// =============================================================================

/// Pushes new props into a running workflow.
pub struct PropsSender<P> {
    tx: mpsc::Sender<P>,
}

impl<P> PropsSender<P> {
    /// Queue new props. Each accepted value causes exactly one render pass.
    pub async fn send(&self, props: P) -> Result<(), WorkflowError> {
        self.tx
            .send(props)
            .await
            .map_err(|_| WorkflowError::RuntimeStopped)
    }

    /// Returns true once the runtime loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<P> Clone for PropsSender<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Handle to a running workflow runtime.
///
/// Dropping the handle stops the runtime and tears the tree down.
pub struct RuntimeHandle<W: Workflow> {
    run_id: RunId,
    renderings: watch::Receiver<RenderingAndSnapshot<W::Rendering>>,
    outputs: Option<mpsc::Receiver<W::Output>>,
    props: PropsSender<W::Props>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), WorkflowError>>,
}

impl<W: Workflow> RuntimeHandle<W> {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The latest rendering and snapshot. Intermediate values may be skipped.
    pub fn renderings(&self) -> watch::Receiver<RenderingAndSnapshot<W::Rendering>> {
        self.renderings.clone()
    }

    /// Take the root output stream. Returns `None` after the first call.
    ///
    /// Outputs are buffered up to `output_buffer`; once the buffer is full the
    /// loop waits for them to be read.
    pub fn take_outputs(&mut self) -> Option<mpsc::Receiver<W::Output>> {
        self.outputs.take()
    }

    pub fn props(&self) -> PropsSender<W::Props> {
        self.props.clone()
    }

    /// Ask the loop to stop, then wait for it.
    pub async fn shutdown(mut self) -> Result<(), WorkflowError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join().await
    }

    /// Wait for the loop to end on its own.
    pub async fn join(mut self) -> Result<(), WorkflowError> {
        // Keep the shutdown sender alive so waiting does not stop the loop.
        let _shutdown = self.shutdown.take();
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(WorkflowError::Panicked {
                context: "workflow runtime loop".to_string(),
                message: panic_message(e.into_panic().as_ref()),
            }),
            Err(_) => Err(WorkflowError::RuntimeStopped),
        }
    }

    /// Wait for the first root output, then stop the runtime.
    ///
    /// Fails with the loop's error if it ends first, or with
    /// [`WorkflowError::RuntimeStopped`] if it ended without one.
    pub async fn until_output(mut self) -> Result<W::Output, WorkflowError> {
        let mut outputs = self.take_outputs().ok_or(WorkflowError::RuntimeStopped)?;
        match outputs.recv().await {
            Some(output) => {
                drop(outputs);
                self.shutdown().await?;
                Ok(output)
            }
            None => {
                self.join().await?;
                Err(WorkflowError::RuntimeStopped)
            }
        }
    }
}
