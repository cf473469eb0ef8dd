use std::sync::Arc;

use graphk_core::traits::NodeBehavior;
use graphk_core::types::{NodeId, NodeKindTag, PortSpec, Value};

/// What a node does when activated.
#[derive(Clone)]
pub enum NodeKind {
    /// Runs an externally supplied behavior, resolved by kind id.
    Plain {
        kind: String,
        behavior: Arc<dyn NodeBehavior>,
    },
    /// Selects one outgoing edge; inputs pass through to the selected edge.
    Branch,
    /// Invokes another pipeline from the catalog.
    Pipeline { pipeline: String },
}

impl NodeKind {
    pub fn tag(&self) -> NodeKindTag {
        match self {
            Self::Plain { .. } => NodeKindTag::Plain,
            Self::Branch => NodeKindTag::Branch,
            Self::Pipeline { .. } => NodeKindTag::Pipeline,
        }
    }
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain { kind, .. } => f.debug_struct("Plain").field("kind", kind).finish(),
            Self::Branch => f.write_str("Branch"),
            Self::Pipeline { pipeline } => f
                .debug_struct("Pipeline")
                .field("pipeline", pipeline)
                .finish(),
        }
    }
}

/// Everything needed to add a node to a pipeline.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    /// Marks the head of an explicit loop construct.
    pub loop_capable: bool,
    /// Descriptive only. Branch selection is first-match and ignores it.
    pub weight: Option<i64>,
    pub metadata: Value,
}

impl NodeSpec {
    fn with_kind(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs: vec![],
            outputs: vec![],
            loop_capable: false,
            weight: None,
            metadata: Value::Null,
        }
    }

    /// A plain node running `behavior`, registered under `kind`.
    pub fn plain(
        id: impl Into<NodeId>,
        kind: impl Into<String>,
        behavior: Arc<dyn NodeBehavior>,
    ) -> Self {
        Self::with_kind(
            id,
            NodeKind::Plain {
                kind: kind.into(),
                behavior,
            },
        )
    }

    /// A branch node. Its output ports mirror its input ports.
    pub fn branch(id: impl Into<NodeId>) -> Self {
        Self::with_kind(id, NodeKind::Branch)
    }

    /// A node invoking the catalog pipeline `pipeline`.
    pub fn pipeline(id: impl Into<NodeId>, pipeline: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            NodeKind::Pipeline {
                pipeline: pipeline.into(),
            },
        )
    }

    /// Add a required input port.
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(PortSpec::required(name));
        self
    }

    /// Add an optional input port.
    pub fn optional_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(PortSpec::optional(name));
        self
    }

    /// Add an output port.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(PortSpec::required(name));
        self
    }

    pub fn loop_capable(mut self) -> Self {
        self.loop_capable = true;
        self
    }

    /// Attach a weight reported by `describe`. It has no effect on execution.
    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A node owned by a pipeline.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: Vec<PortSpec>,
    pub(crate) outputs: Vec<PortSpec>,
    pub(crate) loop_capable: bool,
    pub(crate) weight: Option<i64>,
    pub(crate) metadata: Value,
}

impl Node {
    pub(crate) fn from_spec(spec: NodeSpec) -> Self {
        // Branches forward their inputs unchanged.
        let outputs = match spec.kind {
            NodeKind::Branch => spec
                .inputs
                .iter()
                .map(|p| PortSpec::required(p.name.clone()))
                .collect(),
            _ => spec.outputs,
        };
        Self {
            id: spec.id,
            kind: spec.kind,
            inputs: spec.inputs,
            outputs,
            loop_capable: spec.loop_capable,
            weight: spec.weight,
            metadata: spec.metadata,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, NodeKind::Branch)
    }

    pub fn is_loop_capable(&self) -> bool {
        self.loop_capable
    }

    pub fn weight(&self) -> Option<i64> {
        self.weight
    }

    pub fn has_input(&self, port: &str) -> bool {
        self.inputs.iter().any(|p| p.name == port)
    }

    pub fn has_output(&self, port: &str) -> bool {
        self.outputs.iter().any(|p| p.name == port)
    }

    /// Drop an input port. Edges targeting it become invalid.
    pub fn remove_input(&mut self, port: &str) -> bool {
        let before = self.inputs.len();
        self.inputs.retain(|p| p.name != port);
        if self.is_branch() {
            self.outputs.retain(|p| p.name != port);
        }
        self.inputs.len() != before
    }

    /// Drop an output port. Edges leaving it become invalid.
    pub fn remove_output(&mut self, port: &str) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|p| p.name != port);
        self.outputs.len() != before
    }

    /// Health of the node's behavior. Non-plain nodes are always healthy here.
    pub fn ping(&self) -> bool {
        match &self.kind {
            NodeKind::Plain { behavior, .. } => behavior.ping(),
            _ => true,
        }
    }

    pub fn describe(&self) -> Value {
        let mut data = serde_json::json!({
            "id": self.id.as_str(),
            "type": self.kind.tag(),
            "inputs": self.inputs,
            "outputs": self.outputs,
        });
        match &self.kind {
            NodeKind::Plain { kind, behavior } => {
                data["kind"] = Value::String(kind.clone());
                data["behavior"] = behavior.describe();
            }
            NodeKind::Pipeline { pipeline } => {
                data["pipeline"] = Value::String(pipeline.clone());
            }
            NodeKind::Branch => {}
        }
        if self.loop_capable {
            data["loop_capable"] = Value::Bool(true);
        }
        if let Some(weight) = self.weight {
            data["weight"] = Value::from(weight);
        }
        if !self.metadata.is_null() {
            data["metadata"] = self.metadata.clone();
        }
        data
    }
}
