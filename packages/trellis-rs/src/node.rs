//! One running workflow: its state, its children and its workers.
//!
//! A [`WorkflowNode`] has exactly two entry points:
//!
//! - [`render`](WorkflowNode::render): run the workflow's render function and
//!   reconcile the children and workers it declared.
//! - [`poll_tick`](WorkflowNode::poll_tick) / [`next_action`](WorkflowNode::next_action):
//!   wait for one child output, worker emission or sink value, and apply the
//!   resulting action to the state.
//!
//! Both take `&mut self`, so a render can never overlap an action and two
//! actions can never overlap each other.

use std::fmt::Debug;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::action::WorkflowAction;
use crate::config::RuntimeConfig;
use crate::context::RenderContext;
use crate::diagnostic::{DebugText, DiagnosticId, WorkflowDiagnosticListener};
use crate::error::{guarded, lift, WorkflowError};
use crate::snapshot::{self, ParsedTree, Snapshot};
use crate::subtree::SubtreeManager;
use crate::tracker::WorkerTracker;
use crate::workflow::Workflow;

/// Shared by every node of one runtime.
#[derive(Clone)]
pub(crate) struct TreeContext {
    listener: Option<Arc<dyn WorkflowDiagnosticListener>>,
    ids: Arc<AtomicU64>,
    config: Arc<RuntimeConfig>,
}

impl TreeContext {
    pub fn new(
        listener: Option<Arc<dyn WorkflowDiagnosticListener>>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            listener,
            ids: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    pub fn next_id(&self) -> DiagnosticId {
        DiagnosticId(self.ids.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn listener(&self) -> Option<&dyn WorkflowDiagnosticListener> {
        self.listener.as_deref()
    }

    pub fn shared_listener(&self) -> Option<Arc<dyn WorkflowDiagnosticListener>> {
        self.listener.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

/// What happened when a child was ticked.
pub(crate) enum Tick<S, O> {
    /// The child applied an action that produced no output.
    Changed,
    /// The child produced an output, already mapped to a parent action.
    Action(WorkflowAction<S, O>),
}

pub(crate) struct WorkflowNode<W: Workflow> {
    id: DiagnosticId,
    key: String,
    workflow: W,
    props: W::Props,
    state: W::State,
    subtree: SubtreeManager<W::State, W::Output>,
    workers: WorkerTracker<W::State, W::Output>,
    sink_tx: mpsc::UnboundedSender<WorkflowAction<W::State, W::Output>>,
    sink_rx: mpsc::UnboundedReceiver<WorkflowAction<W::State, W::Output>>,
    tree: TreeContext,
    cursor: usize,
    disposed: bool,
}

impl<W: Workflow> WorkflowNode<W> {
    /// Start a node. `snapshot` is this node's tree snapshot from an earlier run.
    pub fn new(
        workflow: W,
        props: W::Props,
        key: String,
        parent: Option<DiagnosticId>,
        snapshot: Option<&[u8]>,
        tree: TreeContext,
    ) -> Result<Self, WorkflowError> {
        let name = std::any::type_name::<W>();
        let id = tree.next_id();
        let ParsedTree { own, children } = match snapshot {
            Some(bytes) => snapshot::parse_tree(bytes)?,
            None => ParsedTree::default(),
        };
        let restored = own.is_some();

        let state = guarded(
            tree.config().catch_panics,
            || format!("initial_state of {name}"),
            || workflow.initial_state(&props, own.as_deref()),
        )?
        .map_err(|e| {
            lift(e, |source| WorkflowError::InitialState {
                workflow: name,
                key: key.clone(),
                source,
            })
        })?;

        let mut subtree = SubtreeManager::new(id, tree.clone());
        subtree.restore(children);
        let workers = WorkerTracker::new(id, tree.clone());
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();

        debug!(workflow = name, %id, key = %key, restored, "workflow started");
        if let Some(listener) = tree.listener() {
            listener.on_workflow_started(id, parent, name, &key, &props, restored);
        }

        Ok(Self {
            id,
            key,
            workflow,
            props,
            state,
            subtree,
            workers,
            sink_tx,
            sink_rx,
            tree,
            cursor: 0,
            disposed: false,
        })
    }

    pub fn id(&self) -> DiagnosticId {
        self.id
    }

    pub fn state(&self) -> &W::State {
        &self.state
    }

    /// Replace the workflow value a parent rendered this node with.
    pub fn set_workflow(&mut self, workflow: W) {
        self.workflow = workflow;
    }

    /// Render with `props`, reconciling children and workers.
    ///
    /// Anything this pass no longer declares is torn down before this
    /// returns. On error nothing is torn down; the caller is expected to
    /// dispose the whole tree.
    pub fn render(&mut self, props: W::Props) -> Result<W::Rendering, WorkflowError> {
        let name = std::any::type_name::<W>();
        let catch_panics = self.tree.config().catch_panics;

        if props != self.props {
            let old_props = std::mem::replace(&mut self.props, props);
            let old_state = self
                .tree
                .listener()
                .map(|_| DebugText(format!("{:?}", self.state)));
            guarded(
                catch_panics,
                || format!("on_props_changed of {name}"),
                || {
                    self.workflow
                        .on_props_changed(&old_props, &self.props, &mut self.state)
                },
            )?;
            if let (Some(listener), Some(old_state)) = (self.tree.listener(), old_state) {
                listener.on_props_changed(self.id, &old_props, &self.props, &old_state, &self.state);
            }
        }

        if let Some(listener) = self.tree.listener() {
            listener.on_before_workflow_rendered(self.id, &self.props, &self.state);
        }

        let pass = Arc::new(AtomicBool::new(false));
        let result = {
            let mut ctx = RenderContext::new(
                name,
                self.id,
                &mut self.subtree,
                &mut self.workers,
                &self.sink_tx,
                &pass,
                &self.tree,
            );
            let result = guarded(
                catch_panics,
                || format!("render of {name}"),
                || self.workflow.render(&self.props, &self.state, &mut ctx),
            );
            ctx.freeze();
            result
        };
        let result = match result {
            Ok(Ok(rendering)) => Ok(rendering),
            Ok(Err(e)) => Err(lift(e, |source| WorkflowError::Render {
                workflow: name,
                key: self.key.clone(),
                source,
            })),
            Err(panicked) => Err(panicked),
        };

        let mut duplicates = self.subtree.duplicates();
        duplicates.extend(self.workers.duplicates());
        if !duplicates.is_empty() {
            self.subtree.rollback();
            self.workers.rollback();
            return Err(WorkflowError::DuplicateKeys { keys: duplicates });
        }

        match result {
            Ok(rendering) => {
                self.subtree.commit();
                self.workers.commit();
                pass.store(true, Ordering::Release);
                if let Some(listener) = self.tree.listener() {
                    listener.on_after_workflow_rendered(self.id, &rendering);
                }
                Ok(rendering)
            }
            Err(e) => {
                self.subtree.rollback();
                self.workers.rollback();
                Err(e)
            }
        }
    }

    /// Poll every child, worker and sink once, starting after the source that
    /// fired last, and apply the first action that is ready.
    ///
    /// `Ready(Ok(None))` means something in the subtree changed without
    /// producing an output here; the tree needs a new render pass either way.
    pub fn poll_tick(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<W::Output>, WorkflowError>> {
        let children = self.subtree.len();
        let workers = self.workers.len();
        let sources = children + workers + 1;
        let start = self.cursor % sources;

        for offset in 0..sources {
            let idx = (start + offset) % sources;
            let tick = if idx < children {
                self.subtree.poll_tick(idx, cx)
            } else if idx < children + workers {
                match self.workers.poll_emission(idx - children, cx) {
                    Poll::Ready(Ok(Some(action))) => Poll::Ready(Ok(Tick::Action(action))),
                    // A worker finished and nobody asked to hear about it.
                    Poll::Ready(Ok(None)) => continue,
                    Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                    Poll::Pending => Poll::Pending,
                }
            } else {
                match self.sink_rx.poll_recv(cx) {
                    Poll::Ready(Some(action)) => Poll::Ready(Ok(Tick::Action(action))),
                    // The node holds a sender, so the channel never closes while polled.
                    Poll::Ready(None) | Poll::Pending => Poll::Pending,
                }
            };

            match tick {
                Poll::Pending => continue,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(Tick::Changed)) => {
                    self.cursor = idx + 1;
                    return Poll::Ready(Ok(None));
                }
                Poll::Ready(Ok(Tick::Action(action))) => {
                    self.cursor = idx + 1;
                    return Poll::Ready(self.apply_action(action));
                }
            }
        }
        Poll::Pending
    }

    /// Wait for the next action and apply it, returning its output.
    pub async fn next_action(&mut self) -> Result<Option<W::Output>, WorkflowError> {
        poll_fn(|cx| self.poll_tick(cx)).await
    }

    fn apply_action(
        &mut self,
        action: WorkflowAction<W::State, W::Output>,
    ) -> Result<Option<W::Output>, WorkflowError> {
        let name = std::any::type_name::<W>();
        let action_name = action.name().to_string();
        let old_state = self
            .tree
            .listener()
            .map(|_| DebugText(format!("{:?}", self.state)));

        let state = &mut self.state;
        let output = guarded(
            self.tree.config().catch_panics,
            || format!("action {action_name} of {name}"),
            || action.apply_to(state),
        )?
        .map_err(|e| {
            lift(e, |source| WorkflowError::Action {
                workflow: name,
                action: action_name.clone(),
                source,
            })
        })?;

        trace!(
            workflow = name,
            id = %self.id,
            action = %action_name,
            has_output = output.is_some(),
            "action applied"
        );
        if let (Some(listener), Some(old_state)) = (self.tree.listener(), old_state) {
            listener.on_workflow_action(
                self.id,
                &action_name,
                &old_state,
                &self.state,
                output.as_ref().map(|o| o as &dyn Debug),
            );
        }
        Ok(output)
    }

    /// Capture this node's state and, recursively, its children's.
    ///
    /// Nothing is encoded until the returned snapshot's bytes are read.
    pub fn snapshot(&self) -> Result<Snapshot, WorkflowError> {
        let name = std::any::type_name::<W>();
        let own = guarded(
            self.tree.config().catch_panics,
            || format!("snapshot_state of {name}"),
            || self.workflow.snapshot_state(&self.state),
        )?;
        Ok(snapshot::tree(own, self.subtree.child_snapshots()?))
    }

    /// Tear down every child and worker. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.subtree.dispose_all();
        self.workers.dispose_all();
        self.sink_rx.close();
        debug!(workflow = std::any::type_name::<W>(), id = %self.id, "workflow stopped");
        if let Some(listener) = self.tree.listener() {
            listener.on_workflow_stopped(self.id);
        }
    }
}

impl<W: Workflow> Drop for WorkflowNode<W> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{DiagnosticEvent, RecordingListener};
    use crate::snapshot::SnapshotReader;
    use crate::testing::ManualWorker;
    use crate::worker::WorkerEvent;
    use crate::Sink;

    fn tree() -> (TreeContext, Arc<RecordingListener>) {
        let recorder = Arc::new(RecordingListener::new());
        let listener: Arc<dyn WorkflowDiagnosticListener> = recorder.clone();
        (
            TreeContext::new(Some(listener), Arc::new(RuntimeConfig::default())),
            recorder,
        )
    }

    // -------------------------------------------------------------------------
    // Fixtures
    // -------------------------------------------------------------------------

    /// Counts up from its props; remembers how often its props changed.
    struct Counter;

    #[derive(Debug, Default)]
    struct CounterState {
        count: u32,
        props_seen: Vec<u32>,
    }

    #[derive(Debug)]
    struct CounterScreen {
        count: u32,
        props_seen: Vec<u32>,
        bump: Sink<()>,
    }

    impl Workflow for Counter {
        type Props = u32;
        type State = CounterState;
        type Output = u32;
        type Rendering = CounterScreen;

        fn initial_state(&self, props: &u32, snapshot: Option<&[u8]>) -> anyhow::Result<CounterState> {
            let count = match snapshot {
                Some(bytes) => SnapshotReader::new(bytes).read_u32()?,
                None => 0,
            };
            Ok(CounterState {
                count,
                props_seen: vec![*props],
            })
        }

        fn on_props_changed(&self, _old: &u32, new: &u32, state: &mut CounterState) {
            state.props_seen.push(*new);
        }

        fn render(
            &self,
            _props: &u32,
            state: &CounterState,
            ctx: &mut RenderContext<'_, CounterState, u32>,
        ) -> anyhow::Result<CounterScreen> {
            let bump = ctx.make_sink(|()| {
                WorkflowAction::new("bump", |s: &mut CounterState| {
                    s.count += 1;
                    (s.count % 2 == 0).then_some(s.count)
                })
            })?;
            Ok(CounterScreen {
                count: state.count,
                props_seen: state.props_seen.clone(),
                bump,
            })
        }

        fn snapshot_state(&self, state: &CounterState) -> Snapshot {
            Snapshot::of_u32(state.count)
        }
    }

    /// Renders one `Counter` per name in its props.
    struct Parent;

    #[derive(Debug)]
    struct ParentScreen {
        children: Vec<(String, CounterScreen)>,
        received: Vec<u32>,
    }

    impl Workflow for Parent {
        type Props = Vec<String>;
        type State = Vec<u32>;
        type Output = String;
        type Rendering = ParentScreen;

        fn initial_state(&self, _props: &Vec<String>, _snapshot: Option<&[u8]>) -> anyhow::Result<Vec<u32>> {
            Ok(Vec::new())
        }

        fn render(
            &self,
            props: &Vec<String>,
            state: &Vec<u32>,
            ctx: &mut RenderContext<'_, Vec<u32>, String>,
        ) -> anyhow::Result<ParentScreen> {
            let mut children = Vec::new();
            for name in props {
                let label = name.clone();
                let screen = ctx.render_child(Counter, 7, name, move |n| {
                    let label = label.clone();
                    WorkflowAction::new("child_output", move |received: &mut Vec<u32>| {
                        received.push(n);
                        (n >= 4).then(|| label)
                    })
                })?;
                children.push((name.clone(), screen));
            }
            Ok(ParentScreen {
                children,
                received: state.clone(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_sink_action_is_applied_and_output_returned() {
        let (tree, _) = tree();
        let mut node = WorkflowNode::new(Counter, 1, String::new(), None, None, tree).unwrap();
        let screen = node.render(1).unwrap();
        assert_eq!(screen.count, 0);

        screen.bump.send(()).unwrap();
        assert_eq!(node.next_action().await.unwrap(), None);
        screen.bump.send(()).unwrap();
        assert_eq!(node.next_action().await.unwrap(), Some(2));
        assert_eq!(node.render(1).unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_props_change_hook_runs_only_on_difference() {
        let (tree, recorder) = tree();
        let mut node = WorkflowNode::new(Counter, 1, String::new(), None, None, tree).unwrap();
        node.render(1).unwrap();
        node.render(1).unwrap();
        node.render(2).unwrap();
        let screen = node.render(2).unwrap();
        assert_eq!(screen.props_seen, vec![1, 2]);

        let changes = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, DiagnosticEvent::PropsChanged { .. }))
            .count();
        assert_eq!(changes, 1);
    }

    #[tokio::test]
    async fn test_sink_used_during_render_is_rejected() {
        struct Eager;
        impl Workflow for Eager {
            type Props = ();
            type State = ();
            type Output = ();
            type Rendering = ();

            fn initial_state(&self, _: &(), _: Option<&[u8]>) -> anyhow::Result<()> {
                Ok(())
            }

            fn render(&self, _: &(), _: &(), ctx: &mut RenderContext<'_, (), ()>) -> anyhow::Result<()> {
                let sink = ctx.make_sink(|()| WorkflowAction::noop())?;
                sink.send(())?;
                Ok(())
            }
        }

        let (tree, _) = tree();
        let mut node = WorkflowNode::new(Eager, (), String::new(), None, None, tree).unwrap();
        let err = node.render(()).expect_err("sink used while rendering");
        assert!(matches!(err, WorkflowError::SinkUsedDuringRender { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_child_output_is_mapped_to_parent_action() {
        let (tree, _) = tree();
        let mut node =
            WorkflowNode::new(Parent, vec!["a".into()], String::new(), None, None, tree).unwrap();
        let screen = node.render(vec!["a".into()]).unwrap();
        let bump = screen.children[0].1.bump.clone();

        bump.send(()).unwrap();
        // Child applied an action without output: a change, nothing for the parent.
        assert_eq!(node.next_action().await.unwrap(), None);
        assert!(node.state().is_empty());

        bump.send(()).unwrap();
        assert_eq!(node.next_action().await.unwrap(), None);
        assert_eq!(node.state(), &vec![2]);

        bump.send(()).unwrap();
        bump.send(()).unwrap();
        node.next_action().await.unwrap();
        assert_eq!(node.next_action().await.unwrap(), Some("a".to_string()));
        assert_eq!(node.state(), &vec![2, 4]);
    }

    #[tokio::test]
    async fn test_dropped_child_is_disposed_before_render_returns() {
        let (tree, recorder) = tree();
        let mut node = WorkflowNode::new(
            Parent,
            vec!["a".into(), "b".into()],
            String::new(),
            None,
            None,
            tree,
        )
        .unwrap();
        node.render(vec!["a".into(), "b".into()]).unwrap();
        let stale = node.render(vec!["a".into(), "b".into()]).unwrap().children[1]
            .1
            .bump
            .clone();
        node.render(vec!["a".into()]).unwrap();

        let stopped = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, DiagnosticEvent::WorkflowStopped { .. }))
            .count();
        assert_eq!(stopped, 1);
        let err = stale.send(()).expect_err("child is gone");
        assert!(matches!(err, WorkflowError::SinkClosed { .. }));
    }

    #[tokio::test]
    async fn test_panicking_output_mapper_becomes_an_error() {
        struct Fussy;
        impl Workflow for Fussy {
            type Props = ();
            type State = ();
            type Output = ();
            type Rendering = CounterScreen;

            fn initial_state(&self, _: &(), _: Option<&[u8]>) -> anyhow::Result<()> {
                Ok(())
            }

            fn render(
                &self,
                _: &(),
                _: &(),
                ctx: &mut RenderContext<'_, (), ()>,
            ) -> anyhow::Result<CounterScreen> {
                Ok(ctx.render_child(Counter, 0, "c", |n| -> WorkflowAction<(), ()> {
                    panic!("refused {n}")
                })?)
            }
        }

        let (tree, _) = tree();
        let mut node = WorkflowNode::new(Fussy, (), String::new(), None, None, tree).unwrap();
        let screen = node.render(()).unwrap();
        screen.bump.send(()).unwrap();
        assert_eq!(node.next_action().await.unwrap(), None);

        screen.bump.send(()).unwrap();
        match node.next_action().await {
            Err(WorkflowError::Panicked { context, message }) => {
                assert!(context.starts_with("output mapper of"), "{context}");
                assert!(context.ends_with(":c"), "{context}");
                assert_eq!(message, "refused 2");
            }
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_snapshot_state_becomes_an_error() {
        struct Unsaveable;
        impl Workflow for Unsaveable {
            type Props = ();
            type State = ();
            type Output = ();
            type Rendering = ();

            fn initial_state(&self, _: &(), _: Option<&[u8]>) -> anyhow::Result<()> {
                Ok(())
            }

            fn render(&self, _: &(), _: &(), _: &mut RenderContext<'_, (), ()>) -> anyhow::Result<()> {
                Ok(())
            }

            fn snapshot_state(&self, _: &()) -> Snapshot {
                panic!("disk full")
            }
        }

        let (tree, _) = tree();
        let mut parent =
            WorkflowNode::new(Parent, vec!["a".into()], String::new(), None, None, tree.clone())
                .unwrap();
        parent.render(vec!["a".into()]).unwrap();
        assert!(parent.snapshot().is_ok());

        let mut node = WorkflowNode::new(Unsaveable, (), String::new(), None, None, tree).unwrap();
        node.render(()).unwrap();
        match node.snapshot() {
            Err(WorkflowError::Panicked { context, message }) => {
                assert!(context.starts_with("snapshot_state of"), "{context}");
                assert_eq!(message, "disk full");
            }
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_snapshot_restores_child_state() {
        let (tree, _) = tree();
        let mut node =
            WorkflowNode::new(Parent, vec!["a".into()], String::new(), None, None, tree).unwrap();
        let screen = node.render(vec!["a".into()]).unwrap();
        screen.children[0].1.bump.send(()).unwrap();
        node.next_action().await.unwrap();
        let before = node.render(vec!["a".into()]).unwrap();
        let bytes = node.snapshot().unwrap().bytes().to_vec();
        assert_eq!(node.snapshot().unwrap().bytes(), &bytes[..]);

        let (tree, recorder) = self::tree();
        let mut restored =
            WorkflowNode::new(Parent, vec!["a".into()], String::new(), None, Some(&bytes), tree)
                .unwrap();
        let after = restored.render(vec!["a".into()]).unwrap();
        assert_eq!(after.children[0].1.count, before.children[0].1.count);
        assert_eq!(after.children[0].1.count, 1);
        assert!(recorder.events().iter().any(|e| matches!(
            e,
            DiagnosticEvent::WorkflowStarted { restored: true, .. }
        )));
    }

    #[tokio::test]
    async fn test_dispose_stops_workers_and_children_once() {
        struct Holder;
        impl Workflow for Holder {
            type Props = ();
            type State = ();
            type Output = ();
            type Rendering = ();

            fn initial_state(&self, _: &(), _: Option<&[u8]>) -> anyhow::Result<()> {
                Ok(())
            }

            fn render(&self, _: &(), _: &(), ctx: &mut RenderContext<'_, (), ()>) -> anyhow::Result<()> {
                let (worker, _driver) = ManualWorker::<u8>::new("held");
                ctx.run_worker_until_finished(worker, "held", |event| match event {
                    WorkerEvent::Output(_) | WorkerEvent::Finished => WorkflowAction::noop(),
                })?;
                ctx.render_child(Counter, 0, "c", |_| WorkflowAction::noop())?;
                Ok(())
            }
        }

        let (tree, recorder) = tree();
        let mut node = WorkflowNode::new(Holder, (), String::new(), None, None, tree).unwrap();
        node.render(()).unwrap();
        node.dispose();
        node.dispose();
        drop(node);

        let events = recorder.events();
        let worker_stops = events
            .iter()
            .filter(|e| matches!(e, DiagnosticEvent::WorkerStopped { .. }))
            .count();
        let node_stops = events
            .iter()
            .filter(|e| matches!(e, DiagnosticEvent::WorkflowStopped { .. }))
            .count();
        assert_eq!(worker_stops, 1);
        assert_eq!(node_stops, 2);
    }

    #[tokio::test]
    async fn test_action_error_is_wrapped_with_action_name() {
        let (tree, _) = tree();
        let mut node = WorkflowNode::new(Counter, 1, String::new(), None, None, tree).unwrap();
        node.render(1).unwrap();
        node.sink_tx
            .send(WorkflowAction::try_new("explode", |_| Err(anyhow::anyhow!("kaboom"))))
            .unwrap();
        match node.next_action().await {
            Err(WorkflowError::Action { action, source, .. }) => {
                assert_eq!(action, "explode");
                assert_eq!(source.to_string(), "kaboom");
            }
            other => panic!("expected action error, got {other:?}"),
        }
    }
}
