//! Child workflow reconciliation for one workflow node.
//!
//! Children are rendered inline, in the order the parent's render function
//! asks for them. A child keeps its state for as long as its key keeps being
//! rendered; a child whose key is missing at the end of a render pass is
//! disposed, recursively, before that pass returns.

use std::any::Any;
use std::collections::HashMap;
use std::task::{Context, Poll};

use crate::action::WorkflowAction;
use crate::diagnostic::DiagnosticId;
use crate::error::{guarded, WorkflowError};
use crate::key::Key;
use crate::node::{Tick, TreeContext, WorkflowNode};
use crate::reconcile::Reconciler;
use crate::snapshot::{Snapshot, SnapshotKey};
use crate::workflow::Workflow;

/// Converts a child's output into an action for its parent.
pub(crate) type OutputMapper<T, S, O> = Box<dyn Fn(T) -> WorkflowAction<S, O> + Send>;

/// Type-erased child handle.
pub(crate) trait ChildSlot<S, O>: Send {
    fn poll_tick(&mut self, cx: &mut Context<'_>) -> Poll<Result<Tick<S, O>, WorkflowError>>;

    fn snapshot(&self) -> Result<Snapshot, WorkflowError>;

    fn dispose(&mut self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct ChildHandle<C: Workflow, S, O> {
    node: WorkflowNode<C>,
    mapper: OutputMapper<C::Output, S, O>,
    key: Key,
    catch_panics: bool,
}

impl<C, S, O> ChildSlot<S, O> for ChildHandle<C, S, O>
where
    C: Workflow,
    S: 'static,
    O: 'static,
{
    fn poll_tick(&mut self, cx: &mut Context<'_>) -> Poll<Result<Tick<S, O>, WorkflowError>> {
        let output = match self.node.poll_tick(cx) {
            Poll::Ready(Ok(Some(output))) => output,
            Poll::Ready(Ok(None)) => return Poll::Ready(Ok(Tick::Changed)),
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        };
        let mapper = &self.mapper;
        let key = &self.key;
        Poll::Ready(
            guarded(
                self.catch_panics,
                || format!("output mapper of {key}"),
                || mapper(output),
            )
            .map(Tick::Action),
        )
    }

    fn snapshot(&self) -> Result<Snapshot, WorkflowError> {
        self.node.snapshot()
    }

    fn dispose(&mut self) {
        self.node.dispose();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) struct SubtreeManager<S, O> {
    children: Reconciler<Box<dyn ChildSlot<S, O>>>,
    /// Child snapshots restored from a parent snapshot, waiting for the first
    /// render pass to claim them.
    snapshot_cache: HashMap<SnapshotKey, Vec<u8>>,
    parent: DiagnosticId,
    tree: TreeContext,
}

impl<S: 'static, O: 'static> SubtreeManager<S, O> {
    pub fn new(parent: DiagnosticId, tree: TreeContext) -> Self {
        Self {
            children: Reconciler::new(),
            snapshot_cache: HashMap::new(),
            parent,
            tree,
        }
    }

    pub fn restore(&mut self, children: Vec<(SnapshotKey, Vec<u8>)>) {
        self.snapshot_cache.extend(children);
    }

    /// Render the child at `(C, name)`, starting it if the key is new.
    pub fn render<C: Workflow>(
        &mut self,
        child: C,
        props: C::Props,
        name: &str,
        mapper: OutputMapper<C::Output, S, O>,
    ) -> Result<C::Rendering, WorkflowError> {
        let key = Key::of::<C>(name);
        let slot: Box<dyn ChildSlot<S, O>> = match self.children.claim(&key)? {
            Some(mut slot) => {
                let handle = downcast::<C, S, O>(slot.as_mut(), &key)?;
                handle.node.set_workflow(child);
                handle.mapper = mapper;
                slot
            }
            None => {
                let cached = self.snapshot_cache.remove(&SnapshotKey::from(&key));
                let node = WorkflowNode::new(
                    child,
                    props.clone(),
                    key.to_string(),
                    Some(self.parent),
                    cached.as_deref(),
                    self.tree.clone(),
                )?;
                Box::new(ChildHandle {
                    node,
                    mapper,
                    key: key.clone(),
                    catch_panics: self.tree.config().catch_panics,
                })
            }
        };
        let slot = self.children.stage(key.clone(), slot);
        downcast::<C, S, O>(slot.as_mut(), &key)?.node.render(props)
    }

    pub fn duplicates(&self) -> Vec<(String, usize)> {
        self.children.duplicates()
    }

    /// Dispose every child not rendered this pass.
    pub fn commit(&mut self) {
        self.children.commit(|_, mut slot| slot.dispose());
        // Snapshots not claimed by the first pass belong to children that
        // were not started again.
        self.snapshot_cache.clear();
    }

    pub fn rollback(&mut self) {
        self.children.rollback();
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn poll_tick(
        &mut self,
        idx: usize,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Tick<S, O>, WorkflowError>> {
        match self.children.get_mut(idx) {
            Some((_, slot)) => slot.poll_tick(cx),
            None => Poll::Pending,
        }
    }

    pub fn child_snapshots(&self) -> Result<Vec<(Key, Snapshot)>, WorkflowError> {
        self.children
            .iter()
            .map(|(key, slot)| Ok((key.clone(), slot.snapshot()?)))
            .collect()
    }

    pub fn dispose_all(&mut self) {
        for (_, mut slot) in self.children.drain_all() {
            slot.dispose();
        }
        self.snapshot_cache.clear();
    }
}

fn downcast<'a, C: Workflow, S: 'static, O: 'static>(
    slot: &'a mut dyn ChildSlot<S, O>,
    key: &Key,
) -> Result<&'a mut ChildHandle<C, S, O>, WorkflowError> {
    slot.as_any_mut()
        .downcast_mut::<ChildHandle<C, S, O>>()
        .ok_or_else(|| WorkflowError::TypeMismatch {
            key: key.to_string(),
        })
}
