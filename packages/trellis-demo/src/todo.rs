//! The demo's workflow tree: a todo list with one child workflow per item,
//! and an idle timer that ends the session.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use trellis::{
    RenderContext, Sink, Snapshot, SnapshotReader, Timer, Workflow, WorkflowAction,
};

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    Idle,
}

// =============================================================================
// List
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListState {
    next_id: u64,
    items: Vec<(u64, String)>,
    /// Bumped by every user action; keys the idle timer.
    #[serde(skip)]
    activity: u64,
}

#[derive(Debug)]
pub struct ListScreen {
    pub items: Vec<ItemScreen>,
    pub add: Sink<String>,
    pub quit: Sink<()>,
}

/// Root workflow. Props are the idle timeout.
pub struct TodoList;

impl Workflow for TodoList {
    type Props = Duration;
    type State = ListState;
    type Output = SessionEnd;
    type Rendering = ListScreen;

    fn initial_state(&self, _idle: &Duration, snapshot: Option<&[u8]>) -> Result<ListState> {
        match snapshot {
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
            None => Ok(ListState::default()),
        }
    }

    fn render(
        &self,
        idle: &Duration,
        state: &ListState,
        ctx: &mut RenderContext<'_, ListState, SessionEnd>,
    ) -> Result<ListScreen> {
        let mut items = Vec::with_capacity(state.items.len());
        for (id, title) in &state.items {
            let id = *id;
            let item = ctx.render_child(TodoItem, title.clone(), &id.to_string(), move |event| {
                match event {
                    ItemEvent::Toggled => WorkflowAction::new("item_toggled", |s: &mut ListState| {
                        s.activity += 1;
                        None
                    }),
                    ItemEvent::Removed => WorkflowAction::new("remove_item", move |s: &mut ListState| {
                        s.items.retain(|(item, _)| *item != id);
                        s.activity += 1;
                        None
                    }),
                }
            })?;
            items.push(item);
        }

        // A fresh key per activity restarts the timer.
        ctx.run_worker(
            Timer::new(*idle),
            &format!("idle-{}", state.activity),
            |()| WorkflowAction::emit_output(SessionEnd::Idle),
        )?;

        let add = ctx.make_sink(|title: String| {
            WorkflowAction::new("add_item", move |s: &mut ListState| {
                s.next_id += 1;
                s.items.push((s.next_id, title));
                s.activity += 1;
                None
            })
        })?;
        let quit = ctx.make_sink(|()| WorkflowAction::emit_output(SessionEnd::Quit))?;

        Ok(ListScreen { items, add, quit })
    }

    fn snapshot_state(&self, state: &ListState) -> Snapshot {
        Snapshot::json(state.clone())
    }
}

// =============================================================================
// Item
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEvent {
    Toggled,
    Removed,
}

#[derive(Debug)]
pub struct ItemScreen {
    pub title: String,
    pub done: bool,
    pub toggle: Sink<()>,
    pub remove: Sink<()>,
}

/// One list entry. Props are its title; state is whether it is done.
pub struct TodoItem;

impl Workflow for TodoItem {
    type Props = String;
    type State = bool;
    type Output = ItemEvent;
    type Rendering = ItemScreen;

    fn initial_state(&self, _title: &String, snapshot: Option<&[u8]>) -> Result<bool> {
        match snapshot {
            Some(bytes) => Ok(SnapshotReader::new(bytes).read_bool()?),
            None => Ok(false),
        }
    }

    fn render(
        &self,
        title: &String,
        done: &bool,
        ctx: &mut RenderContext<'_, bool, ItemEvent>,
    ) -> Result<ItemScreen> {
        let toggle = ctx.make_sink(|()| {
            WorkflowAction::new("toggle", |done: &mut bool| {
                *done = !*done;
                Some(ItemEvent::Toggled)
            })
        })?;
        let remove = ctx.make_sink(|()| WorkflowAction::emit_output(ItemEvent::Removed))?;
        Ok(ItemScreen {
            title: title.clone(),
            done: *done,
            toggle,
            remove,
        })
    }

    fn snapshot_state(&self, done: &bool) -> Snapshot {
        let done = *done;
        Snapshot::write(move |w| {
            w.write_bool(done);
        })
    }
}
