use graphk_core::types::{EdgeId, NodeId, Value};

use super::gate::Gate;

/// One end of an edge: a node and one of its ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub node: NodeId,
    pub port: String,
}

impl Endpoint {
    pub fn new(node: impl Into<NodeId>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
        }
    }
}

impl From<(&str, &str)> for Endpoint {
    fn from((node, port): (&str, &str)) -> Self {
        Self::new(node, port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

/// A directed connection from an output port to an input port.
#[derive(Debug, Clone)]
pub struct Edge {
    pub(crate) id: EdgeId,
    pub(crate) source: Endpoint,
    pub(crate) dest: Endpoint,
    /// Activation predicate; only meaningful on edges leaving a branch.
    pub(crate) predicate: Option<Gate>,
    /// Taken by a branch when no predicate holds.
    pub(crate) default: bool,
}

impl Edge {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    pub fn dest(&self) -> &Endpoint {
        &self.dest
    }

    pub fn predicate(&self) -> Option<&Gate> {
        self.predicate.as_ref()
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    /// Whether a branch may activate this edge in the first-match pass.
    /// Edges without a predicate always hold.
    pub fn holds(&self, inputs: &graphk_core::types::PortValues) -> bool {
        self.predicate.as_ref().map_or(true, |gate| gate.assess(inputs))
    }

    pub fn describe(&self) -> Value {
        let mut data = serde_json::json!({
            "id": self.id.0,
            "source": self.source.to_string(),
            "dest": self.dest.to_string(),
        });
        if let Some(gate) = &self.predicate {
            data["predicate"] = gate.describe();
        }
        if self.default {
            data["default"] = Value::Bool(true);
        }
        data
    }
}
