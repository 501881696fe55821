//! Structured error types for the workflow runtime.
//!
//! `WorkflowError` provides pattern-matchable errors instead of generic `anyhow::Error`.
//! User code (render functions, actions, workers, `initial_state`) returns
//! `anyhow::Result`; the runtime wraps those failures with the workflow, key and
//! action or worker that produced them and keeps the original as the `source`.
//!
//! # The Propagation Rule
//!
//! > **No error is recovered inside the tree.**
//!
//! A failure in any node travels up through every ancestor's dispatch loop and
//! ends the run at the root. A `WorkflowError` that comes back through `?` from a
//! child is passed through unchanged, so configuration errors stay matchable at
//! the top.
//!
//! # Example
//!
//! ```ignore
//! use trellis::{ErrorCategory, WorkflowError};
//!
//! match runtime.join().await {
//!     Ok(()) => println!("stopped"),
//!     Err(e) if e.category() == ErrorCategory::Configuration => {
//!         eprintln!("fix the render function: {e}");
//!     }
//!     Err(e) => eprintln!("run failed: {e:#}"),
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;

// =============================================================================
// Error Category
// =============================================================================

/// Coarse classification of a [`WorkflowError`].
///
/// - `Configuration`: misuse of the render API (duplicate keys, stale contexts,
///   sinks used during render). Fatal and never retried.
/// - `Render` / `Action` / `Worker`: failures raised by user code.
/// - `Snapshot`: bytes handed to a node could not be decoded.
/// - `Cancellation`: expected during teardown, never reported as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The render API was used incorrectly.
    Configuration,
    /// A render function, `on_props_changed` or `initial_state` failed.
    Render,
    /// An action failed while being applied.
    Action,
    /// A worker task failed.
    Worker,
    /// A snapshot could not be decoded.
    Snapshot,
    /// Work was cancelled by teardown.
    Cancellation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration_error"),
            ErrorCategory::Render => write!(f, "render_error"),
            ErrorCategory::Action => write!(f, "action_error"),
            ErrorCategory::Worker => write!(f, "worker_error"),
            ErrorCategory::Snapshot => write!(f, "snapshot_error"),
            ErrorCategory::Cancellation => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// Workflow Error
// =============================================================================

/// Structured error type for runtime operations.
///
/// Each variant includes context about what went wrong and, for failures raised
/// by user code, the original error as its source.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The same key was requested more than once in a single render pass.
    #[error("duplicate keys in one render pass: {}", format_duplicates(.keys))]
    DuplicateKeys {
        /// Each duplicated key with the number of times it was requested.
        keys: Vec<(String, usize)>,
    },

    /// A render context was used after its render function returned.
    #[error("render context of {workflow} used after its render pass returned")]
    RenderContextFrozen {
        /// Type name of the workflow that owned the context.
        workflow: &'static str,
    },

    /// A sink was invoked before the render pass that created it finished.
    #[error("sink of {workflow} invoked while its render pass was still running")]
    SinkUsedDuringRender {
        /// Type name of the workflow that created the sink.
        workflow: &'static str,
    },

    /// A sink was invoked after its workflow was torn down.
    #[error("sink of {workflow} invoked after the workflow was torn down")]
    SinkClosed {
        /// Type name of the workflow that created the sink.
        workflow: &'static str,
    },

    /// A reconciled slot held a different type than its key declared (internal error).
    #[error("slot {key} holds a different type than its key declares")]
    TypeMismatch {
        /// Display form of the key.
        key: String,
    },

    /// Snapshot bytes could not be decoded.
    #[error("malformed snapshot: {reason}")]
    SnapshotCorrupt {
        /// What was wrong with the bytes.
        reason: String,
    },

    /// `initial_state` failed.
    #[error("initial state of {workflow} ({key}) failed")]
    InitialState {
        /// Type name of the workflow.
        workflow: &'static str,
        /// Key the workflow was rendered under.
        key: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// A render function or `on_props_changed` failed.
    #[error("render of {workflow} ({key}) failed")]
    Render {
        /// Type name of the workflow.
        workflow: &'static str,
        /// Key the workflow was rendered under.
        key: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// An action failed while being applied.
    #[error("action {action} failed in {workflow}")]
    Action {
        /// Type name of the workflow whose state was being updated.
        workflow: &'static str,
        /// Name of the action.
        action: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// A worker task returned an error.
    #[error("worker {worker} failed")]
    Worker {
        /// Display form of the worker's key.
        worker: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// User code panicked.
    #[error("{context} panicked: {message}")]
    Panicked {
        /// What was running when the panic happened.
        context: String,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The worker's slot was torn down; further emissions are discarded.
    #[error("worker cancelled")]
    Cancelled,

    /// The runtime loop is no longer running.
    #[error("workflow runtime stopped")]
    RuntimeStopped,
}

impl WorkflowError {
    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            WorkflowError::DuplicateKeys { .. }
            | WorkflowError::RenderContextFrozen { .. }
            | WorkflowError::SinkUsedDuringRender { .. }
            | WorkflowError::SinkClosed { .. }
            | WorkflowError::TypeMismatch { .. } => ErrorCategory::Configuration,
            WorkflowError::SnapshotCorrupt { .. } => ErrorCategory::Snapshot,
            WorkflowError::InitialState { .. }
            | WorkflowError::Render { .. }
            | WorkflowError::Panicked { .. } => ErrorCategory::Render,
            WorkflowError::Action { .. } => ErrorCategory::Action,
            WorkflowError::Worker { .. } => ErrorCategory::Worker,
            WorkflowError::Cancelled | WorkflowError::RuntimeStopped => {
                ErrorCategory::Cancellation
            }
        }
    }

    /// Returns true if this error only reports cancellation.
    pub fn is_cancellation(&self) -> bool {
        self.category() == ErrorCategory::Cancellation
    }

    pub(crate) fn snapshot(reason: impl Into<String>) -> Self {
        WorkflowError::SnapshotCorrupt {
            reason: reason.into(),
        }
    }
}

fn format_duplicates(keys: &[(String, usize)]) -> String {
    keys.iter()
        .map(|(key, count)| format!("{count}×{key}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Converts an error raised by user code into a `WorkflowError`.
///
/// Errors that already are `WorkflowError`s (for example a child's duplicate
/// key error returned through `?`) are passed through unchanged.
pub(crate) fn lift(
    error: anyhow::Error,
    wrap: impl FnOnce(anyhow::Error) -> WorkflowError,
) -> WorkflowError {
    match error.downcast::<WorkflowError>() {
        Ok(error) => error,
        Err(error) => wrap(error),
    }
}

/// Returns true if a worker's error only reports that it was cancelled.
pub(crate) fn is_cancellation(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<WorkflowError>()
        .is_some_and(WorkflowError::is_cancellation)
}

/// Runs `f`, turning a panic into `WorkflowError::Panicked` when `enabled`.
pub(crate) fn guarded<T>(
    enabled: bool,
    context: impl FnOnce() -> String,
    f: impl FnOnce() -> T,
) -> Result<T, WorkflowError> {
    if !enabled {
        return Ok(f());
    }
    // AssertUnwindSafe: after a panic the runtime stops touching the node's state.
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| WorkflowError::Panicked {
        context: context(),
        message: panic_message(payload.as_ref()),
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keys_display_lists_counts() {
        let err = WorkflowError::DuplicateKeys {
            keys: vec![("Child:dup".to_string(), 2), ("Timer:t".to_string(), 3)],
        };
        let message = err.to_string();
        assert!(message.contains("2×Child:dup"), "{message}");
        assert!(message.contains("3×Timer:t"), "{message}");
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            WorkflowError::DuplicateKeys { keys: vec![] }.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            WorkflowError::SinkUsedDuringRender { workflow: "W" }.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            WorkflowError::snapshot("short").category(),
            ErrorCategory::Snapshot
        );
        assert_eq!(
            WorkflowError::Action {
                workflow: "W",
                action: "a".into(),
                source: anyhow::anyhow!("boom"),
            }
            .category(),
            ErrorCategory::Action
        );
        assert!(WorkflowError::Cancelled.is_cancellation());
        assert!(!WorkflowError::RenderContextFrozen { workflow: "W" }.is_cancellation());
    }

    #[test]
    fn test_lift_passes_workflow_errors_through() {
        let inner: anyhow::Error = WorkflowError::DuplicateKeys {
            keys: vec![("k".into(), 2)],
        }
        .into();
        let lifted = lift(inner, |source| WorkflowError::Render {
            workflow: "W",
            key: String::new(),
            source,
        });
        assert!(matches!(lifted, WorkflowError::DuplicateKeys { .. }));
    }

    #[test]
    fn test_lift_wraps_foreign_errors_and_keeps_source() {
        let lifted = lift(anyhow::anyhow!("disk on fire"), |source| {
            WorkflowError::Render {
                workflow: "W",
                key: "k".into(),
                source,
            }
        });
        assert!(matches!(lifted, WorkflowError::Render { .. }));
        let source = std::error::Error::source(&lifted).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk on fire"));
    }

    #[test]
    fn test_cancellation_detection_through_anyhow() {
        let err: anyhow::Error = WorkflowError::Cancelled.into();
        assert!(is_cancellation(&err));
        assert!(!is_cancellation(&anyhow::anyhow!("other")));
    }

    #[test]
    fn test_guarded_catches_panics() {
        let result: Result<(), _> = guarded(true, || "render of W".to_string(), || {
            panic!("intentional panic")
        });
        match result {
            Err(WorkflowError::Panicked { context, message }) => {
                assert_eq!(context, "render of W");
                assert!(message.contains("intentional panic"));
            }
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[test]
    fn test_guarded_passes_values_through() {
        let value = guarded(true, String::new, || 7).expect("no panic");
        assert_eq!(value, 7);
    }
}
