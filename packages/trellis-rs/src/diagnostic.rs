//! Observational hooks into the runtime.
//!
//! A [`WorkflowDiagnosticListener`] receives a sequenced callback for every
//! render pass, node and worker start/stop, applied action and sink delivery.
//! Listeners never influence scheduling; every method defaults to a no-op so an
//! implementation overrides only what it cares about.
//!
//! Values are passed as `&dyn Debug` so listeners can log any workflow's
//! props, state and rendering without knowing their types.
//!
//! # Provided listeners
//!
//! - [`TracingListener`]: logs every callback through `tracing`.
//! - [`RecordingListener`]: keeps a bounded, timestamped ring of
//!   [`DiagnosticEvent`]s, serialisable as JSON.
//! - [`ChainedListener`]: fans each callback out to several listeners.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::error::WorkflowError;

/// Maximum number of events a [`RecordingListener`] retains by default.
const MAX_RECORDED_EVENTS: usize = 10_000;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifies one workflow node or worker slot for the lifetime of a run.
///
/// Ids are assigned in start order and never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DiagnosticId(pub(crate) u64);

impl DiagnosticId {
    /// The raw id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DiagnosticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one runtime launch.
///
/// Every log line from a run's loop carries it in the `workflow_runtime` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random run id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value already rendered with `{:?}`, passed where a `&dyn Debug` is
/// expected after the original has been mutated.
pub(crate) struct DebugText(pub String);

impl Debug for DebugText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Receives runtime diagnostics. All methods default to doing nothing.
///
/// Callbacks run synchronously on the runtime loop, so they should be quick.
#[allow(unused_variables)]
pub trait WorkflowDiagnosticListener: Send + Sync {
    fn on_runtime_started(&self, run: RunId, workflow: &'static str) {}

    fn on_runtime_stopped(&self, run: RunId, error: Option<&WorkflowError>) {}

    fn on_before_render_pass(&self, props: &dyn Debug) {}

    fn on_after_render_pass(&self, rendering: &dyn Debug) {}

    fn on_before_snapshot_pass(&self) {}

    fn on_after_snapshot_pass(&self) {}

    /// A node was created. `restored` is true if it was handed snapshot bytes.
    fn on_workflow_started(
        &self,
        id: DiagnosticId,
        parent: Option<DiagnosticId>,
        workflow: &'static str,
        key: &str,
        props: &dyn Debug,
        restored: bool,
    ) {
    }

    fn on_workflow_stopped(&self, id: DiagnosticId) {}

    fn on_props_changed(
        &self,
        id: DiagnosticId,
        old_props: &dyn Debug,
        new_props: &dyn Debug,
        old_state: &dyn Debug,
        new_state: &dyn Debug,
    ) {
    }

    fn on_before_workflow_rendered(&self, id: DiagnosticId, props: &dyn Debug, state: &dyn Debug) {
    }

    fn on_after_workflow_rendered(&self, id: DiagnosticId, rendering: &dyn Debug) {}

    /// An action was applied to a node's state.
    fn on_workflow_action(
        &self,
        id: DiagnosticId,
        action: &str,
        old_state: &dyn Debug,
        new_state: &dyn Debug,
        output: Option<&dyn Debug>,
    ) {
    }

    fn on_worker_started(
        &self,
        worker: DiagnosticId,
        parent: DiagnosticId,
        key: &str,
        description: &str,
    ) {
    }

    fn on_worker_stopped(&self, worker: DiagnosticId, parent: DiagnosticId) {}

    fn on_worker_output(&self, worker: DiagnosticId, parent: DiagnosticId, output: &dyn Debug) {}

    /// A value was sent to a sink owned by `workflow`.
    fn on_sink_received(&self, workflow: DiagnosticId, action: &str) {}
}

// =============================================================================
// Chained
// =============================================================================

/// Forwards every callback to each listener in order.
#[derive(Default, Clone)]
pub struct ChainedListener {
    listeners: Vec<Arc<dyn WorkflowDiagnosticListener>>,
}

impl ChainedListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn with(mut self, listener: Arc<dyn WorkflowDiagnosticListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn each(&self, f: impl Fn(&dyn WorkflowDiagnosticListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }
}

impl WorkflowDiagnosticListener for ChainedListener {
    fn on_runtime_started(&self, run: RunId, workflow: &'static str) {
        self.each(|l| l.on_runtime_started(run, workflow));
    }

    fn on_runtime_stopped(&self, run: RunId, error: Option<&WorkflowError>) {
        self.each(|l| l.on_runtime_stopped(run, error));
    }

    fn on_before_render_pass(&self, props: &dyn Debug) {
        self.each(|l| l.on_before_render_pass(props));
    }

    fn on_after_render_pass(&self, rendering: &dyn Debug) {
        self.each(|l| l.on_after_render_pass(rendering));
    }

    fn on_before_snapshot_pass(&self) {
        self.each(|l| l.on_before_snapshot_pass());
    }

    fn on_after_snapshot_pass(&self) {
        self.each(|l| l.on_after_snapshot_pass());
    }

    fn on_workflow_started(
        &self,
        id: DiagnosticId,
        parent: Option<DiagnosticId>,
        workflow: &'static str,
        key: &str,
        props: &dyn Debug,
        restored: bool,
    ) {
        self.each(|l| l.on_workflow_started(id, parent, workflow, key, props, restored));
    }

    fn on_workflow_stopped(&self, id: DiagnosticId) {
        self.each(|l| l.on_workflow_stopped(id));
    }

    fn on_props_changed(
        &self,
        id: DiagnosticId,
        old_props: &dyn Debug,
        new_props: &dyn Debug,
        old_state: &dyn Debug,
        new_state: &dyn Debug,
    ) {
        self.each(|l| l.on_props_changed(id, old_props, new_props, old_state, new_state));
    }

    fn on_before_workflow_rendered(&self, id: DiagnosticId, props: &dyn Debug, state: &dyn Debug) {
        self.each(|l| l.on_before_workflow_rendered(id, props, state));
    }

    fn on_after_workflow_rendered(&self, id: DiagnosticId, rendering: &dyn Debug) {
        self.each(|l| l.on_after_workflow_rendered(id, rendering));
    }

    fn on_workflow_action(
        &self,
        id: DiagnosticId,
        action: &str,
        old_state: &dyn Debug,
        new_state: &dyn Debug,
        output: Option<&dyn Debug>,
    ) {
        self.each(|l| l.on_workflow_action(id, action, old_state, new_state, output));
    }

    fn on_worker_started(
        &self,
        worker: DiagnosticId,
        parent: DiagnosticId,
        key: &str,
        description: &str,
    ) {
        self.each(|l| l.on_worker_started(worker, parent, key, description));
    }

    fn on_worker_stopped(&self, worker: DiagnosticId, parent: DiagnosticId) {
        self.each(|l| l.on_worker_stopped(worker, parent));
    }

    fn on_worker_output(&self, worker: DiagnosticId, parent: DiagnosticId, output: &dyn Debug) {
        self.each(|l| l.on_worker_output(worker, parent, output));
    }

    fn on_sink_received(&self, workflow: DiagnosticId, action: &str) {
        self.each(|l| l.on_sink_received(workflow, action));
    }
}

// =============================================================================
// Tracing
// =============================================================================

/// Logs every callback with structured `tracing` fields.
///
/// Lifecycle events log at `debug`, per-render and per-action events at
/// `trace`, runtime start/stop at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl WorkflowDiagnosticListener for TracingListener {
    fn on_runtime_started(&self, run: RunId, workflow: &'static str) {
        info!(%run, workflow, "runtime started");
    }

    fn on_runtime_stopped(&self, run: RunId, error: Option<&WorkflowError>) {
        match error {
            Some(e) => info!(%run, error = %e, "runtime stopped with error"),
            None => info!(%run, "runtime stopped"),
        }
    }

    fn on_before_render_pass(&self, props: &dyn Debug) {
        trace!(?props, "render pass starting");
    }

    fn on_after_render_pass(&self, rendering: &dyn Debug) {
        trace!(?rendering, "render pass finished");
    }

    fn on_workflow_started(
        &self,
        id: DiagnosticId,
        parent: Option<DiagnosticId>,
        workflow: &'static str,
        key: &str,
        props: &dyn Debug,
        restored: bool,
    ) {
        debug!(%id, ?parent, workflow, key, ?props, restored, "workflow started");
    }

    fn on_workflow_stopped(&self, id: DiagnosticId) {
        debug!(%id, "workflow stopped");
    }

    fn on_props_changed(
        &self,
        id: DiagnosticId,
        old_props: &dyn Debug,
        new_props: &dyn Debug,
        _old_state: &dyn Debug,
        _new_state: &dyn Debug,
    ) {
        trace!(%id, ?old_props, ?new_props, "props changed");
    }

    fn on_workflow_action(
        &self,
        id: DiagnosticId,
        action: &str,
        old_state: &dyn Debug,
        new_state: &dyn Debug,
        output: Option<&dyn Debug>,
    ) {
        trace!(%id, action, ?old_state, ?new_state, ?output, "action applied");
    }

    fn on_worker_started(
        &self,
        worker: DiagnosticId,
        parent: DiagnosticId,
        key: &str,
        description: &str,
    ) {
        debug!(%worker, %parent, key, description, "worker started");
    }

    fn on_worker_stopped(&self, worker: DiagnosticId, parent: DiagnosticId) {
        debug!(%worker, %parent, "worker stopped");
    }

    fn on_worker_output(&self, worker: DiagnosticId, parent: DiagnosticId, output: &dyn Debug) {
        trace!(%worker, %parent, ?output, "worker output");
    }

    fn on_sink_received(&self, workflow: DiagnosticId, action: &str) {
        trace!(%workflow, action, "sink received");
    }
}

// =============================================================================
// Recording
// =============================================================================

/// One diagnostic callback, with its values rendered through `Debug`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    RuntimeStarted {
        run: RunId,
        workflow: String,
    },
    RuntimeStopped {
        run: RunId,
        error: Option<String>,
    },
    BeforeRenderPass {
        props: String,
    },
    AfterRenderPass {
        rendering: String,
    },
    BeforeSnapshotPass,
    AfterSnapshotPass,
    WorkflowStarted {
        id: DiagnosticId,
        parent: Option<DiagnosticId>,
        workflow: String,
        key: String,
        props: String,
        restored: bool,
    },
    WorkflowStopped {
        id: DiagnosticId,
    },
    PropsChanged {
        id: DiagnosticId,
        old_props: String,
        new_props: String,
        old_state: String,
        new_state: String,
    },
    BeforeWorkflowRendered {
        id: DiagnosticId,
        props: String,
        state: String,
    },
    AfterWorkflowRendered {
        id: DiagnosticId,
        rendering: String,
    },
    WorkflowAction {
        id: DiagnosticId,
        action: String,
        old_state: String,
        new_state: String,
        output: Option<String>,
    },
    WorkerStarted {
        id: DiagnosticId,
        parent: DiagnosticId,
        key: String,
        description: String,
    },
    WorkerStopped {
        id: DiagnosticId,
        parent: DiagnosticId,
    },
    WorkerOutput {
        id: DiagnosticId,
        parent: DiagnosticId,
        output: String,
    },
    SinkReceived {
        id: DiagnosticId,
        action: String,
    },
}

/// A [`DiagnosticEvent`] with the time it was observed.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    pub event: DiagnosticEvent,
}

/// Keeps the most recent diagnostic events in memory.
///
/// Useful in tests and for attaching a trace of recent activity to bug
/// reports. Only the newest `capacity` events are retained.
#[derive(Debug)]
pub struct RecordingListener {
    events: Mutex<VecDeque<RecordedEvent>>,
    capacity: usize,
}

impl Default for RecordingListener {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::with_capacity(MAX_RECORDED_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock_events(&self) -> std::sync::MutexGuard<'_, VecDeque<RecordedEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: DiagnosticEvent) {
        let mut events = self.lock_events();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(RecordedEvent {
            at: Utc::now(),
            event,
        });
    }

    /// All retained events, oldest first.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.lock_events().iter().map(|r| r.event.clone()).collect()
    }

    /// All retained events with their timestamps, oldest first.
    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.lock_events().iter().cloned().collect()
    }

    /// The newest `n` events, newest first.
    pub fn recent(&self, n: usize) -> Vec<DiagnosticEvent> {
        self.lock_events()
            .iter()
            .rev()
            .take(n)
            .map(|r| r.event.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.lock_events().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_events().is_empty()
    }

    /// Retained events as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&*self.lock_events())
    }
}

fn text(value: &dyn Debug) -> String {
    format!("{value:?}")
}

impl WorkflowDiagnosticListener for RecordingListener {
    fn on_runtime_started(&self, run: RunId, workflow: &'static str) {
        self.record(DiagnosticEvent::RuntimeStarted {
            run,
            workflow: workflow.to_string(),
        });
    }

    fn on_runtime_stopped(&self, run: RunId, error: Option<&WorkflowError>) {
        self.record(DiagnosticEvent::RuntimeStopped {
            run,
            error: error.map(|e| e.to_string()),
        });
    }

    fn on_before_render_pass(&self, props: &dyn Debug) {
        self.record(DiagnosticEvent::BeforeRenderPass { props: text(props) });
    }

    fn on_after_render_pass(&self, rendering: &dyn Debug) {
        self.record(DiagnosticEvent::AfterRenderPass {
            rendering: text(rendering),
        });
    }

    fn on_before_snapshot_pass(&self) {
        self.record(DiagnosticEvent::BeforeSnapshotPass);
    }

    fn on_after_snapshot_pass(&self) {
        self.record(DiagnosticEvent::AfterSnapshotPass);
    }

    fn on_workflow_started(
        &self,
        id: DiagnosticId,
        parent: Option<DiagnosticId>,
        workflow: &'static str,
        key: &str,
        props: &dyn Debug,
        restored: bool,
    ) {
        self.record(DiagnosticEvent::WorkflowStarted {
            id,
            parent,
            workflow: workflow.to_string(),
            key: key.to_string(),
            props: text(props),
            restored,
        });
    }

    fn on_workflow_stopped(&self, id: DiagnosticId) {
        self.record(DiagnosticEvent::WorkflowStopped { id });
    }

    fn on_props_changed(
        &self,
        id: DiagnosticId,
        old_props: &dyn Debug,
        new_props: &dyn Debug,
        old_state: &dyn Debug,
        new_state: &dyn Debug,
    ) {
        self.record(DiagnosticEvent::PropsChanged {
            id,
            old_props: text(old_props),
            new_props: text(new_props),
            old_state: text(old_state),
            new_state: text(new_state),
        });
    }

    fn on_before_workflow_rendered(&self, id: DiagnosticId, props: &dyn Debug, state: &dyn Debug) {
        self.record(DiagnosticEvent::BeforeWorkflowRendered {
            id,
            props: text(props),
            state: text(state),
        });
    }

    fn on_after_workflow_rendered(&self, id: DiagnosticId, rendering: &dyn Debug) {
        self.record(DiagnosticEvent::AfterWorkflowRendered {
            id,
            rendering: text(rendering),
        });
    }

    fn on_workflow_action(
        &self,
        id: DiagnosticId,
        action: &str,
        old_state: &dyn Debug,
        new_state: &dyn Debug,
        output: Option<&dyn Debug>,
    ) {
        self.record(DiagnosticEvent::WorkflowAction {
            id,
            action: action.to_string(),
            old_state: text(old_state),
            new_state: text(new_state),
            output: output.map(text),
        });
    }

    fn on_worker_started(
        &self,
        worker: DiagnosticId,
        parent: DiagnosticId,
        key: &str,
        description: &str,
    ) {
        self.record(DiagnosticEvent::WorkerStarted {
            id: worker,
            parent,
            key: key.to_string(),
            description: description.to_string(),
        });
    }

    fn on_worker_stopped(&self, worker: DiagnosticId, parent: DiagnosticId) {
        self.record(DiagnosticEvent::WorkerStopped { id: worker, parent });
    }

    fn on_worker_output(&self, worker: DiagnosticId, parent: DiagnosticId, output: &dyn Debug) {
        self.record(DiagnosticEvent::WorkerOutput {
            id: worker,
            parent,
            output: text(output),
        });
    }

    fn on_sink_received(&self, workflow: DiagnosticId, action: &str) {
        self.record(DiagnosticEvent::SinkReceived {
            id: workflow,
            action: action.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_listener_is_bounded() {
        let recorder = RecordingListener::with_capacity(2);
        recorder.on_workflow_stopped(DiagnosticId(1));
        recorder.on_workflow_stopped(DiagnosticId(2));
        recorder.on_workflow_stopped(DiagnosticId(3));

        assert_eq!(recorder.len(), 2);
        assert_eq!(
            recorder.events(),
            vec![
                DiagnosticEvent::WorkflowStopped { id: DiagnosticId(2) },
                DiagnosticEvent::WorkflowStopped { id: DiagnosticId(3) },
            ]
        );
        assert_eq!(
            recorder.recent(1),
            vec![DiagnosticEvent::WorkflowStopped { id: DiagnosticId(3) }]
        );

        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_chained_listener_fans_out_in_order() {
        let first = Arc::new(RecordingListener::new());
        let second = Arc::new(RecordingListener::new());
        let chained = ChainedListener::new()
            .with(first.clone())
            .with(second.clone())
            .with(Arc::new(TracingListener));

        chained.on_worker_started(DiagnosticId(4), DiagnosticId(1), "w", "Timer(1s)");
        chained.on_workflow_action(DiagnosticId(1), "tick", &1, &2, Some(&"out" as &dyn Debug));

        for recorder in [&first, &second] {
            let events = recorder.events();
            assert_eq!(events.len(), 2);
            assert!(matches!(events[0], DiagnosticEvent::WorkerStarted { .. }));
            assert_eq!(
                events[1],
                DiagnosticEvent::WorkflowAction {
                    id: DiagnosticId(1),
                    action: "tick".into(),
                    old_state: "1".into(),
                    new_state: "2".into(),
                    output: Some("\"out\"".into()),
                }
            );
        }
    }

    #[test]
    fn test_recorded_events_serialize_with_type_tag() {
        let recorder = RecordingListener::new();
        let run = RunId::new();
        recorder.on_runtime_started(run, "Root");
        recorder.on_runtime_stopped(run, Some(&WorkflowError::RuntimeStopped));

        let json = recorder.to_json().expect("serializable");
        assert_eq!(json[0]["event"]["type"], "runtime_started");
        assert_eq!(json[0]["event"]["workflow"], "Root");
        assert_eq!(json[0]["event"]["run"], run.to_string());
        assert_eq!(json[1]["event"]["error"], "workflow runtime stopped");
    }

    #[test]
    fn test_debug_text_is_verbatim() {
        assert_eq!(format!("{:?}", DebugText("State { n: 1 }".into())), "State { n: 1 }");
        assert_eq!(DiagnosticId(7).to_string(), "#7");
    }
}
