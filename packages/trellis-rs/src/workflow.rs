//! The workflow trait: one stateful node of the tree.
//!
//! A workflow turns `(props, state)` into a rendering. While rendering it may
//! declare child workflows, workers and sinks through its
//! [`RenderContext`]; everything it declares stays alive for as long as it
//! keeps declaring it under the same key.
//!
//! # Example
//!
//! ```ignore
//! struct Counter;
//!
//! impl Workflow for Counter {
//!     type Props = u32;
//!     type State = u32;
//!     type Output = Done;
//!     type Rendering = CounterScreen;
//!
//!     fn initial_state(&self, start: &u32, snapshot: Option<&[u8]>) -> anyhow::Result<u32> {
//!         match snapshot {
//!             Some(bytes) => Ok(SnapshotReader::new(bytes).read_u32()?),
//!             None => Ok(*start),
//!         }
//!     }
//!
//!     fn render(
//!         &self,
//!         _props: &u32,
//!         count: &u32,
//!         ctx: &mut RenderContext<'_, u32, Done>,
//!     ) -> anyhow::Result<CounterScreen> {
//!         let on_click = ctx.make_sink(|()| WorkflowAction::new("click", |c: &mut u32| {
//!             *c += 1;
//!             (*c == 10).then_some(Done)
//!         }))?;
//!         Ok(CounterScreen { count: *count, on_click })
//!     }
//!
//!     fn snapshot_state(&self, count: &u32) -> Snapshot {
//!         Snapshot::of_u32(*count)
//!     }
//! }
//! ```

use std::fmt::Debug;

use anyhow::Result;

use crate::context::RenderContext;
use crate::snapshot::Snapshot;

/// A stateful node of the workflow tree.
///
/// The workflow value itself is configuration: it is replaced every time a
/// parent renders it again, while the state survives.
pub trait Workflow: Send + 'static {
    /// Input from the parent (or the host, at the root).
    type Props: Clone + PartialEq + Debug + Send + 'static;
    /// Private state, changed only by actions.
    type State: Debug + Send + 'static;
    /// Values this workflow hands to its parent.
    type Output: Debug + Send + 'static;
    /// What this workflow renders to.
    type Rendering: Debug + Send + 'static;

    /// Create the state of a newly started node.
    ///
    /// `snapshot` holds the bytes this workflow's [`snapshot_state`] produced
    /// in an earlier run, if any were captured for this node.
    ///
    /// [`snapshot_state`]: Workflow::snapshot_state
    fn initial_state(&self, props: &Self::Props, snapshot: Option<&[u8]>) -> Result<Self::State>;

    /// Called before `render` when the parent supplies props that differ from
    /// the previous ones.
    fn on_props_changed(&self, _old: &Self::Props, _new: &Self::Props, _state: &mut Self::State) {}

    /// Produce a rendering. Must not block.
    fn render(
        &self,
        props: &Self::Props,
        state: &Self::State,
        ctx: &mut RenderContext<'_, Self::State, Self::Output>,
    ) -> Result<Self::Rendering>;

    /// Capture the state for persistence. Encoding should be deferred until the
    /// snapshot's bytes are read. Defaults to capturing nothing.
    fn snapshot_state(&self, _state: &Self::State) -> Snapshot {
        Snapshot::empty()
    }
}

/// A workflow without state of its own.
///
/// Wrap an implementation in [`Stateless`] to run it.
pub trait StatelessWorkflow: Send + 'static {
    type Props: Clone + PartialEq + Debug + Send + 'static;
    type Output: Debug + Send + 'static;
    type Rendering: Debug + Send + 'static;

    fn render(
        &self,
        props: &Self::Props,
        ctx: &mut RenderContext<'_, (), Self::Output>,
    ) -> Result<Self::Rendering>;
}

/// Adapts a [`StatelessWorkflow`] into a [`Workflow`] with `()` state.
#[derive(Debug, Clone, Default)]
pub struct Stateless<T>(pub T);

impl<T: StatelessWorkflow> Workflow for Stateless<T> {
    type Props = T::Props;
    type State = ();
    type Output = T::Output;
    type Rendering = T::Rendering;

    fn initial_state(&self, _props: &Self::Props, _snapshot: Option<&[u8]>) -> Result<()> {
        Ok(())
    }

    fn render(
        &self,
        props: &Self::Props,
        _state: &(),
        ctx: &mut RenderContext<'_, (), Self::Output>,
    ) -> Result<Self::Rendering> {
        self.0.render(props, ctx)
    }
}
