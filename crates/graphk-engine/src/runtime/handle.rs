use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use graphk_core::types::{ContextId, RunId, RunState};

use crate::context::{ContextJournal, ContextSummary, TraceEntry};

/// Observe or cancel a run from outside the future driving it.
#[derive(Clone)]
pub struct ExecutionHandle {
    run_id: RunId,
    cancel: CancellationToken,
    journal: Arc<ContextJournal>,
}

impl ExecutionHandle {
    pub(crate) fn new(
        run_id: RunId,
        cancel: CancellationToken,
        journal: Arc<ContextJournal>,
    ) -> Self {
        Self {
            run_id,
            cancel,
            journal,
        }
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn journal(&self) -> Arc<ContextJournal> {
        Arc::clone(&self.journal)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Request an abort. No new node starts afterwards; every open context
    /// ends `Aborted`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// State of the top-level context. `Pending` until the run starts.
    pub fn state(&self) -> RunState {
        self.journal
            .state(ContextId(0))
            .unwrap_or(RunState::Pending)
    }

    /// Every context opened by the run, nested ones included.
    pub fn contexts(&self) -> Vec<ContextSummary> {
        self.journal.contexts()
    }

    /// Executed nodes in execution order.
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.journal.trace()
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.is_cancelled())
            .field("state", &self.state())
            .finish()
    }
}
