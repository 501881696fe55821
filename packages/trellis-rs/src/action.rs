//! Actions: the only way a workflow's state changes.
//!
//! An action is a named, one-shot function `(&mut State) -> Option<Output>`.
//! The runtime applies actions one at a time per node, and every applied
//! action is followed by a render pass.
//!
//! # Key Properties
//!
//! - **Synchronous and total**: no awaiting inside an action; waiting happens
//!   only between actions.
//! - **One output at most**: returning `Some(output)` hands the output to the
//!   parent's mapper (or to the host's output stream at the root).
//! - **Named**: the name shows up in logs and diagnostics.

use std::borrow::Cow;
use std::fmt;

use anyhow::Result;

type ApplyFn<S, O> = Box<dyn FnOnce(&mut S) -> Result<Option<O>> + Send>;

/// A state transition for a workflow with state `S` and output `O`.
///
/// # Example
///
/// ```ignore
/// let increment = WorkflowAction::new("increment", |count: &mut u32| {
///     *count += 1;
///     (*count >= 10).then_some(Done)
/// });
/// ```
pub struct WorkflowAction<S, O> {
    name: Cow<'static, str>,
    apply: ApplyFn<S, O>,
}

impl<S, O> WorkflowAction<S, O> {
    /// Create an infallible action.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, apply: F) -> Self
    where
        F: FnOnce(&mut S) -> Option<O> + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Box::new(move |state| Ok(apply(state))),
        }
    }

    /// Create an action that may fail.
    ///
    /// An error is not retried: it ends the run after propagating to the root.
    pub fn try_new<F>(name: impl Into<Cow<'static, str>>, apply: F) -> Self
    where
        F: FnOnce(&mut S) -> Result<Option<O>> + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Box::new(apply),
        }
    }

    /// An action that leaves state alone and emits `output`.
    pub fn emit_output(output: O) -> Self
    where
        O: Send + 'static,
    {
        Self::new("emit_output", move |_| Some(output))
    }

    /// An action that changes nothing. It still triggers a render pass.
    pub fn noop() -> Self {
        Self::new("noop", |_| None)
    }

    /// The action's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the action to `state`, returning the output it produced.
    pub fn apply_to(self, state: &mut S) -> Result<Option<O>> {
        (self.apply)(state)
    }
}

impl<S, O> fmt::Debug for WorkflowAction<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowAction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_mutates_state_and_emits() {
        let action = WorkflowAction::new("increment", |count: &mut u32| {
            *count += 1;
            Some(*count * 10)
        });
        let mut state = 4;
        assert_eq!(action.name(), "increment");
        assert_eq!(action.apply_to(&mut state).expect("infallible"), Some(50));
        assert_eq!(state, 5);
    }

    #[test]
    fn test_try_new_surfaces_errors() {
        let action = WorkflowAction::<u32, ()>::try_new("explode", |_| {
            Err(anyhow::anyhow!("kaboom"))
        });
        let err = action.apply_to(&mut 0).expect_err("should fail");
        assert_eq!(err.to_string(), "kaboom");
    }

    #[test]
    fn test_emit_output_leaves_state_alone() {
        let mut state = String::from("keep");
        let output = WorkflowAction::emit_output(3_u8)
            .apply_to(&mut state)
            .expect("infallible");
        assert_eq!(output, Some(3));
        assert_eq!(state, "keep");
    }

    #[test]
    fn test_noop() {
        let mut state = 1_i64;
        let action = WorkflowAction::<i64, ()>::noop();
        assert_eq!(format!("{action:?}"), "WorkflowAction { name: \"noop\", .. }");
        assert_eq!(action.apply_to(&mut state).expect("infallible"), None);
        assert_eq!(state, 1);
    }
}
