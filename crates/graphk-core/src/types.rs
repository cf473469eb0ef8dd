use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Values flowing along edges are plain JSON.
pub type Value = serde_json::Value;

/// Port name to value. Ordered so that logs and outputs are reproducible.
pub type PortValues = BTreeMap<String, Value>;

/// Values produced in one execution context, keyed by (node, port).
pub type Bindings = BTreeMap<(NodeId, String), Value>;

/// Node identifier, unique within its owning pipeline.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an edge in its pipeline's edge list.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EdgeId(pub usize);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of one execution context within a run.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ContextId(pub usize);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKindTag {
    Plain,
    Branch,
    Pipeline,
}

/// A named port on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    /// A required input must be bound before the node may run.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl PortSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Lifecycle of a pipeline execution (and of each execution context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Read-only view handed to a node behavior for one activation.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub run_id: RunId,
    pub context: ContextId,
    pub pipeline: String,
    pub node: NodeId,
    /// Nesting depth of the owning context (0 for the top-level pipeline).
    pub depth: usize,
    /// Snapshot of values already bound in this context.
    pub bindings: Arc<Bindings>,
    pub cancel: CancellationToken,
}

impl NodeContext {
    /// Look up a value produced earlier in this context.
    pub fn binding(&self, node: &str, port: &str) -> Option<&Value> {
        self.bindings.get(&binding_key(node, port))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Key under which a node output is stored in an execution context.
pub fn binding_key(node: &str, port: &str) -> (NodeId, String) {
    (NodeId::from(node), port.to_string())
}

/// Events published on the [`crate::EventBus`] while pipelines run.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A top-level run started.
    RunStarted { run_id: RunId, pipeline: String },
    /// An execution context was created for a pipeline invocation.
    ContextEntered {
        context: ContextId,
        parent: Option<ContextId>,
        pipeline: String,
        depth: usize,
    },
    /// A node behavior (or nested pipeline) is about to run.
    NodeStarted { context: ContextId, node: NodeId },
    /// A node finished and its outputs were bound.
    NodeCompleted {
        context: ContextId,
        node: NodeId,
        elapsed_ms: u64,
    },
    /// A node was skipped because a required input can never be bound.
    NodeSkipped { context: ContextId, node: NodeId },
    /// A branch selected one of its outgoing edges.
    BranchSelected {
        context: ContextId,
        node: NodeId,
        edge: EdgeId,
    },
    /// A loop head started another iteration.
    LoopIteration {
        context: ContextId,
        head: NodeId,
        iteration: usize,
    },
    /// An execution context reached a terminal state.
    ContextExited { context: ContextId, state: RunState },
    /// A top-level run finished.
    RunFinished { run_id: RunId, state: RunState },
}
