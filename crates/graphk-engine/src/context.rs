//! Execution contexts.
//!
//! Each pipeline invocation gets its own `ExecutionContext` holding the values
//! bound so far, keyed `node.port`. Nested invocations create a child context
//! whose parent is the invoking context. Contexts are short-lived; the
//! `ContextJournal` keeps a summary of every context of a run so state can be
//! inspected while the run is going and after it ends.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use graphk_core::event::EventBus;
use graphk_core::types::{
    binding_key, Bindings, ContextId, EngineEvent, NodeId, RunState, Value,
};

/// Snapshot of one execution context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub id: ContextId,
    pub parent: Option<ContextId>,
    pub pipeline: String,
    pub depth: usize,
    pub state: RunState,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
}

/// One executed node, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub context: ContextId,
    pub pipeline: String,
    pub node: NodeId,
}

/// Shared record of every context and node activation of a run.
#[derive(Debug, Default)]
pub struct ContextJournal {
    contexts: Mutex<Vec<ContextSummary>>,
    trace: Mutex<Vec<TraceEntry>>,
}

impl ContextJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self, parent: Option<ContextId>, pipeline: &str, depth: usize) -> ContextId {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let id = ContextId(contexts.len());
        contexts.push(ContextSummary {
            id,
            parent,
            pipeline: pipeline.to_string(),
            depth,
            state: RunState::Pending,
            entered_at: Utc::now(),
            exited_at: None,
        });
        id
    }

    fn set_state(&self, id: ContextId, state: RunState) {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(summary) = contexts.get_mut(id.0) {
            summary.state = state;
            if state.is_terminal() {
                summary.exited_at = Some(Utc::now());
            }
        }
    }

    pub(crate) fn record(&self, entry: TraceEntry) {
        self.trace
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Every context opened so far, in creation order.
    pub fn contexts(&self) -> Vec<ContextSummary> {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self, id: ContextId) -> Option<RunState> {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id.0)
            .map(|c| c.state)
    }

    /// Executed nodes across all contexts, in execution order.
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.trace.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Bindings and lifecycle of one pipeline invocation.
///
/// Dropping a context that has not reached a terminal state marks it
/// `Aborted`. This covers contexts whose run future was dropped mid-flight.
pub struct ExecutionContext {
    id: ContextId,
    parent: Option<ContextId>,
    pipeline: String,
    depth: usize,
    state: RunState,
    bindings: Arc<Bindings>,
    journal: Arc<ContextJournal>,
    events: Arc<EventBus>,
}

impl ExecutionContext {
    pub(crate) fn open(
        journal: Arc<ContextJournal>,
        events: Arc<EventBus>,
        parent: Option<ContextId>,
        pipeline: &str,
        depth: usize,
    ) -> Self {
        let id = journal.open(parent, pipeline, depth);
        events.publish(EngineEvent::ContextEntered {
            context: id,
            parent,
            pipeline: pipeline.to_string(),
            depth,
        });
        debug!(context = %id, pipeline, depth, "Context opened");
        Self {
            id,
            parent,
            pipeline: pipeline.to_string(),
            depth,
            state: RunState::Pending,
            bindings: Arc::new(Bindings::new()),
            journal,
            events,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn journal(&self) -> &Arc<ContextJournal> {
        &self.journal
    }

    /// Move to `state`. Terminal states are final.
    pub(crate) fn transition(&mut self, state: RunState) {
        if self.state.is_terminal() || self.state == state {
            return;
        }
        self.state = state;
        self.journal.set_state(self.id, state);
        if state.is_terminal() {
            self.events.publish(EngineEvent::ContextExited {
                context: self.id,
                state,
            });
            debug!(context = %self.id, pipeline = %self.pipeline, %state, "Context closed");
        }
    }

    /// Record a produced value under `node.port`.
    pub(crate) fn bind(&mut self, node: &str, port: &str, value: Value) {
        Arc::make_mut(&mut self.bindings).insert(binding_key(node, port), value);
    }

    pub fn get(&self, node: &str, port: &str) -> Option<&Value> {
        self.bindings.get(&binding_key(node, port))
    }

    /// Cheap read-only view handed to node behaviors.
    pub fn snapshot(&self) -> Arc<Bindings> {
        Arc::clone(&self.bindings)
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.transition(RunState::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(journal: &Arc<ContextJournal>, parent: Option<ContextId>, depth: usize) -> ExecutionContext {
        ExecutionContext::open(
            Arc::clone(journal),
            Arc::new(EventBus::default()),
            parent,
            "p",
            depth,
        )
    }

    #[test]
    fn test_bindings_and_snapshot() {
        let journal = Arc::new(ContextJournal::new());
        let mut ctx = open(&journal, None, 0);
        ctx.bind("a", "x", serde_json::json!(1));
        let snap = ctx.snapshot();
        ctx.bind("a", "x", serde_json::json!(2));

        assert_eq!(snap.get(&binding_key("a", "x")), Some(&serde_json::json!(1)));
        assert_eq!(ctx.get("a", "x"), Some(&serde_json::json!(2)));
        assert_eq!(ctx.get("a", "y"), None);
    }

    #[test]
    fn test_transitions_recorded_in_journal() {
        let journal = Arc::new(ContextJournal::new());
        let mut root = open(&journal, None, 0);
        let child = open(&journal, Some(root.id()), 1);
        assert_eq!(child.parent(), Some(ContextId(0)));

        root.transition(RunState::Running);
        root.transition(RunState::Completed);
        root.transition(RunState::Failed);
        assert_eq!(root.state(), RunState::Completed);
        drop(child);

        let contexts = journal.contexts();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].state, RunState::Completed);
        assert!(contexts[0].exited_at.is_some());
        assert_eq!(contexts[1].state, RunState::Aborted);
        assert_eq!(contexts[1].depth, 1);
    }

    #[tokio::test]
    async fn test_lifecycle_events_published() {
        let journal = Arc::new(ContextJournal::new());
        let events = Arc::new(EventBus::new(8));
        let mut rx = events.subscribe();
        let mut ctx =
            ExecutionContext::open(journal, Arc::clone(&events), None, "main", 0);
        ctx.transition(RunState::Running);
        ctx.transition(RunState::Completed);

        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::ContextEntered { depth: 0, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::ContextExited {
                state: RunState::Completed,
                ..
            }
        ));
    }
}
