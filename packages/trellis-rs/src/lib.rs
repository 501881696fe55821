//! # Trellis
//!
//! A tree of stateful workflows. Each workflow renders from its props and
//! state, declares the children, workers and sinks it needs while rendering,
//! and changes its state only through actions applied one at a time.
//!
//! ## Core Concepts
//!
//! - [`Workflow`] = a node: `(props, state) -> rendering`
//! - [`WorkflowAction`] = the only way state changes; may emit one output
//! - [`Worker`] = async work kept alive for as long as it keeps being declared
//! - [`Sink`] = how the outside world (a UI, a callback) sends in actions
//!
//! ## Architecture
//!
//! ```text
//! host ── props ──► Runtime loop ──► renderings (latest wins)
//!                       │  ▲
//!              render   │  │ one action
//!                       ▼  │
//!                 WorkflowNode (root)
//!                  │      │       │
//!           children   workers   sink
//!      (keyed by type + name, reconciled every pass)
//!                       │
//!                       └──────────► outputs (in order)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One action at a time** - Actions never overlap each other or a render
//! 2. **One render pass per change** - Every props push and applied action
//!    re-renders the whole tree exactly once
//! 3. **Keys are identity** - A child or worker keeps running only while the
//!    same `(type, name)` is declared; anything undeclared is torn down
//!    before the render pass returns
//! 4. **Snapshots are lazy** - Nothing is encoded until the bytes are read
//!
//! ## Example
//!
//! ```ignore
//! use trellis::{Runtime, RenderContext, Workflow, WorkflowAction};
//!
//! struct Greeter;
//!
//! impl Workflow for Greeter {
//!     type Props = String;
//!     type State = u32;
//!     type Output = ();
//!     type Rendering = String;
//!
//!     fn initial_state(&self, _: &String, _: Option<&[u8]>) -> anyhow::Result<u32> {
//!         Ok(0)
//!     }
//!
//!     fn render(
//!         &self,
//!         name: &String,
//!         greeted: &u32,
//!         _ctx: &mut RenderContext<'_, u32, ()>,
//!     ) -> anyhow::Result<String> {
//!         Ok(format!("hello {name} ({greeted})"))
//!     }
//! }
//!
//! let handle = Runtime::builder(Greeter, "world".to_string()).launch()?;
//! println!("{}", handle.renderings().borrow().rendering);
//! ```

mod action;
mod config;
mod context;
mod diagnostic;
mod error;
mod key;
mod node;
mod reconcile;
mod runtime;
mod snapshot;
mod subtree;
mod tracker;
mod workflow;

// Worker builders (from_fn, from_stream, Timer)
pub mod worker;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;



// Re-export workflow types
pub use action::WorkflowAction;
pub use context::{RenderContext, Sink};
pub use workflow::{Stateless, StatelessWorkflow, Workflow};

// Re-export worker types
pub use worker::{Emitter, Timer, Worker, WorkerEvent};

// Re-export runtime types (primary entry point)
pub use config::RuntimeConfig;
pub use runtime::{PropsSender, RenderingAndSnapshot, Runtime, RuntimeBuilder, RuntimeHandle};

// Re-export snapshot types
pub use snapshot::{Snapshot, SnapshotReader, SnapshotWriter};

// Re-export error types
pub use error::{ErrorCategory, WorkflowError};
pub use key::Key;

// Re-export diagnostic types
pub use diagnostic::{
    ChainedListener, DiagnosticEvent, DiagnosticId, RecordedEvent, RecordingListener, RunId,
    TracingListener, WorkflowDiagnosticListener,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
