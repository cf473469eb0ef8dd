use thiserror::Error;

use crate::types::{EdgeId, NodeId};

#[derive(Debug, Error)]
pub enum GraphkError {
    // Construction / validation errors
    #[error("Structural error: {0}")]
    Structural(Violations),

    #[error("Duplicate {scope} id: {id}")]
    DuplicateId { scope: String, id: String },

    #[error("Node kind already registered: {0}")]
    DuplicateRegistration(String),

    #[error("Node kind not registered: {0}")]
    UnknownKind(String),

    // Runtime errors
    #[error("Node {pipeline}/{node} failed: {cause}")]
    NodeExecution {
        pipeline: String,
        node: NodeId,
        #[source]
        cause: NodeFailure,
    },

    #[error("Branch {pipeline}/{node} matched no edge and has no default")]
    BranchUnresolved { pipeline: String, node: NodeId },

    #[error("Nested pipeline depth exceeded ({max_depth})")]
    DepthExceeded { max_depth: usize },

    #[error("Loop at {pipeline}/{node} exceeded {limit} iterations")]
    LoopLimitExceeded {
        pipeline: String,
        node: NodeId,
        limit: usize,
    },

    #[error("Input port {pipeline}/{node}.{port} bound by more than one active edge")]
    BindingConflict {
        pipeline: String,
        node: NodeId,
        port: String,
    },

    #[error("Pipeline {pipeline} missing required input: {port}")]
    MissingInput { pipeline: String, port: String },

    #[error("Execution cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphkError {
    /// Follow nested-pipeline failures down to the error that started them.
    pub fn root_cause(&self) -> &GraphkError {
        match self {
            Self::NodeExecution {
                cause: NodeFailure::Nested { error, .. },
                ..
            } => error.root_cause(),
            other => other,
        }
    }

    /// Pipeline/node frames from the outermost failure to the innermost.
    pub fn failure_path(&self) -> Vec<(String, NodeId)> {
        let mut path = Vec::new();
        let mut current = self;
        while let Self::NodeExecution {
            pipeline,
            node,
            cause,
        } = current
        {
            path.push((pipeline.clone(), node.clone()));
            match cause {
                NodeFailure::Nested { error, .. } => current = error,
                _ => break,
            }
        }
        if let Self::BranchUnresolved { pipeline, node }
        | Self::LoopLimitExceeded { pipeline, node, .. }
        | Self::BindingConflict { pipeline, node, .. } = current
        {
            path.push((pipeline.clone(), node.clone()));
        }
        path
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Violations carried by a structural error, if any.
    pub fn violations(&self) -> Option<&[Violation]> {
        match self {
            Self::Structural(v) => Some(&v.0),
            _ => None,
        }
    }
}

/// Why a node activation failed.
#[derive(Debug, Error)]
pub enum NodeFailure {
    #[error(transparent)]
    Behavior(#[from] anyhow::Error),

    #[error("behavior did not produce output port '{0}'")]
    MissingOutput(String),

    #[error("nested pipeline '{pipeline}' failed: {error}")]
    Nested {
        pipeline: String,
        #[source]
        error: Box<GraphkError>,
    },
}

/// Which side of a node a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// A single structural problem found while building or validating a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("edge {edge} references unknown node '{node}'")]
    EdgeUnknownNode { edge: EdgeId, node: NodeId },

    #[error("edge {edge} references unknown {direction} port '{node}.{port}'")]
    EdgeUnknownPort {
        edge: EdgeId,
        node: NodeId,
        port: String,
        direction: PortDirection,
    },

    #[error("edge {edge} from non-branch node '{node}' carries a predicate or default marker")]
    PredicateOnPlainEdge { edge: EdgeId, node: NodeId },

    #[error("invalid predicate expression: {expr}")]
    InvalidPredicate { expr: String },

    #[error("branch '{node}' has more than one default edge")]
    MultipleDefaults { node: NodeId },

    #[error("required input '{node}.{port}' has no incoming edge")]
    UnfedInput { node: NodeId, port: String },

    #[error("node '{node}' is not reachable from any entry node")]
    Unreachable { node: NodeId },

    #[error("cycle through [{}] has no loop-capable node", join_ids(.nodes))]
    UnmarkedCycle { nodes: Vec<NodeId> },

    #[error("cycle through [{}] has more than one loop-capable node", join_ids(.nodes))]
    AmbiguousLoopHead { nodes: Vec<NodeId> },

    #[error("pipeline has no entry node")]
    NoEntry,

    #[error("entry node '{0}' does not exist")]
    UnknownEntry(NodeId),

    #[error("exit node '{0}' does not exist")]
    UnknownExit(NodeId),

    #[error("node '{node}' references unknown pipeline '{pipeline}'")]
    UnknownPipeline { node: NodeId, pipeline: String },

    #[error(
        "node '{node}' {direction} ports [{}] do not match pipeline '{pipeline}' [{}]",
        .declared.join(", "),
        .expected.join(", ")
    )]
    SignatureMismatch {
        node: NodeId,
        pipeline: String,
        direction: PortDirection,
        declared: Vec<String>,
        expected: Vec<String>,
    },

    #[error("in nested pipeline '{pipeline}': {inner}")]
    InNested {
        pipeline: String,
        inner: Box<Violation>,
    },
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every violation found in one pass, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    /// `Ok(())` when empty, otherwise a structural error.
    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(GraphkError::Structural(self))
        }
    }
}

impl From<Vec<Violation>> for Violations {
    fn from(v: Vec<Violation>) -> Self {
        Self(v)
    }
}

impl std::fmt::Display for Violations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{} violation(s): {}", self.0.len(), parts.join("; "))
    }
}

pub type Result<T> = std::result::Result<T, GraphkError>;
