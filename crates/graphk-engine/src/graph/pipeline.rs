use std::collections::HashMap;

use graphk_core::error::{GraphkError, PortDirection, Result, Violation, Violations};
use graphk_core::types::{EdgeId, NodeId, PortSpec, Value};

use super::edge::{Edge, Endpoint};
use super::gate::Gate;
use super::node::{Node, NodeKind, NodeSpec};
use super::topology::Topology;

/// A named directed graph of nodes and edges.
///
/// The pipeline owns its nodes and edges. Nodes keep their registration order,
/// which is also the runtime's tie-break order. Edges refer to nodes by id so a
/// pipeline can be edited freely; [`crate::graph::validate`] reports whatever
/// no longer lines up.
#[derive(Debug, Clone)]
pub struct Pipeline {
    id: String,
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    entry: Vec<NodeId>,
    exit: Vec<NodeId>,
}

impl Pipeline {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            entry: Vec::new(),
            exit: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a node. Fails if the id is already taken.
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId> {
        if self.index.contains_key(spec.id.as_str()) {
            return Err(GraphkError::DuplicateId {
                scope: format!("node in pipeline '{}'", self.id),
                id: spec.id.0,
            });
        }
        let id = spec.id.clone();
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node::from_spec(spec));
        Ok(id)
    }

    /// Remove a node. Edges touching it are kept and reported by validation.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let pos = self.index.remove(id)?;
        let node = self.nodes.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        self.entry.retain(|n| n.as_str() != id);
        self.exit.retain(|n| n.as_str() != id);
        Some(node)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.index.get(id).map(|&i| &mut self.nodes[i])
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Ids of catalog pipelines invoked by this pipeline's nodes.
    pub fn nested_pipelines(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().filter_map(|n| match n.kind() {
            NodeKind::Pipeline { pipeline } => Some(pipeline.as_str()),
            _ => None,
        })
    }

    /// Connect an output port to an input port.
    ///
    /// `predicate` is only accepted on edges leaving a branch node.
    pub fn add_edge(
        &mut self,
        source: impl Into<Endpoint>,
        dest: impl Into<Endpoint>,
        predicate: Option<Gate>,
    ) -> Result<EdgeId> {
        self.push_edge(source.into(), dest.into(), predicate, false)
    }

    /// Add the edge a branch takes when none of its predicates hold.
    pub fn add_default_edge(
        &mut self,
        source: impl Into<Endpoint>,
        dest: impl Into<Endpoint>,
    ) -> Result<EdgeId> {
        self.push_edge(source.into(), dest.into(), None, true)
    }

    fn push_edge(
        &mut self,
        source: Endpoint,
        dest: Endpoint,
        predicate: Option<Gate>,
        default: bool,
    ) -> Result<EdgeId> {
        let id = EdgeId(self.edges.len());
        let mut violations = Vec::new();

        match self.node(source.node.as_str()) {
            None => violations.push(Violation::EdgeUnknownNode {
                edge: id,
                node: source.node.clone(),
            }),
            Some(node) => {
                if !node.has_output(&source.port) {
                    violations.push(Violation::EdgeUnknownPort {
                        edge: id,
                        node: source.node.clone(),
                        port: source.port.clone(),
                        direction: PortDirection::Output,
                    });
                }
                if (predicate.is_some() || default) && !node.is_branch() {
                    violations.push(Violation::PredicateOnPlainEdge {
                        edge: id,
                        node: source.node.clone(),
                    });
                }
                if default && self.has_default_edge(&source.node) {
                    violations.push(Violation::MultipleDefaults {
                        node: source.node.clone(),
                    });
                }
            }
        }

        match self.node(dest.node.as_str()) {
            None => violations.push(Violation::EdgeUnknownNode {
                edge: id,
                node: dest.node.clone(),
            }),
            Some(node) if !node.has_input(&dest.port) => {
                violations.push(Violation::EdgeUnknownPort {
                    edge: id,
                    node: dest.node.clone(),
                    port: dest.port.clone(),
                    direction: PortDirection::Input,
                });
            }
            Some(_) => {}
        }

        Violations(violations).into_result()?;
        self.edges.push(Edge {
            id,
            source,
            dest,
            predicate,
            default,
        });
        Ok(id)
    }

    fn has_default_edge(&self, node: &NodeId) -> bool {
        self.edges
            .iter()
            .any(|e| e.default && &e.source.node == node)
    }

    /// Designate the entry nodes. Replaces any previous designation.
    pub fn set_entry<I, T>(&mut self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.entry = ids.into_iter().map(Into::into).collect();
    }

    /// Designate the exit nodes. Replaces any previous designation.
    pub fn set_exit<I, T>(&mut self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.exit = ids.into_iter().map(Into::into).collect();
    }

    pub fn entry(&self) -> &[NodeId] {
        &self.entry
    }

    pub fn exit(&self) -> &[NodeId] {
        &self.exit
    }

    /// The pipeline's own inputs: entry-node input ports not fed by an
    /// internal edge. A name is required if any port carrying it is.
    pub fn input_ports(&self) -> Vec<PortSpec> {
        let topo = Topology::build(self);
        let mut ports: Vec<PortSpec> = Vec::new();
        for id in &self.entry {
            let Some(&n) = self.index.get(id.as_str()) else {
                continue;
            };
            let fed = topo.forward_fed_ports(self, n);
            for port in self.nodes[n].inputs() {
                if fed.contains(port.name.as_str()) {
                    continue;
                }
                match ports.iter_mut().find(|p| p.name == port.name) {
                    Some(existing) => existing.required |= port.required,
                    None => ports.push(port.clone()),
                }
            }
        }
        ports
    }

    /// The pipeline's own outputs: the union of exit-node output ports.
    pub fn output_ports(&self) -> Vec<PortSpec> {
        let mut ports: Vec<PortSpec> = Vec::new();
        for id in &self.exit {
            let Some(node) = self.node(id.as_str()) else {
                continue;
            };
            for port in node.outputs() {
                if !ports.iter().any(|p| p.name == port.name) {
                    ports.push(port.clone());
                }
            }
        }
        ports
    }

    pub fn describe(&self) -> Value {
        serde_json::json!({
            "type": "pipeline",
            "id": self.id,
            "entry": self.entry.iter().map(|n| n.as_str()).collect::<Vec<_>>(),
            "exit": self.exit.iter().map(|n| n.as_str()).collect::<Vec<_>>(),
            "inputs": self.input_ports(),
            "outputs": self.output_ports(),
            "nodes": self.nodes.iter().map(Node::describe).collect::<Vec<_>>(),
            "edges": self.edges.iter().map(Edge::describe).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::FnBehavior;
    use crate::graph::gate::port_gt;
    use graphk_core::traits::NodeBehavior;
    use std::sync::Arc;

    fn pass() -> Arc<dyn NodeBehavior> {
        Arc::new(FnBehavior::new(|inputs| Ok(inputs.clone())))
    }

    #[test]
    fn test_add_node_rejects_duplicate_id() {
        let mut p = Pipeline::new("p");
        p.add_node(NodeSpec::plain("a", "pass", pass())).unwrap();
        let err = p.add_node(NodeSpec::plain("a", "pass", pass())).unwrap_err();
        assert!(matches!(err, GraphkError::DuplicateId { ref id, .. } if id == "a"));
        assert_eq!(p.nodes().len(), 1);
    }

    #[test]
    fn test_add_edge_checks_ports_and_reports_all() {
        let mut p = Pipeline::new("p");
        p.add_node(NodeSpec::plain("a", "pass", pass()).output("x")).unwrap();
        p.add_node(NodeSpec::plain("b", "pass", pass()).input("x")).unwrap();

        let id = p.add_edge(("a", "x"), ("b", "x"), None).unwrap();
        assert_eq!(id, EdgeId(0));

        let err = p.add_edge(("a", "nope"), ("ghost", "x"), None).unwrap_err();
        let violations = err.violations().unwrap();
        assert_eq!(violations.len(), 2);
        assert!(matches!(
            violations[0],
            Violation::EdgeUnknownPort { direction: PortDirection::Output, .. }
        ));
        assert!(matches!(violations[1], Violation::EdgeUnknownNode { .. }));
        assert_eq!(p.edges().len(), 1);
    }

    #[test]
    fn test_predicate_only_on_branch_edges() {
        let mut p = Pipeline::new("p");
        p.add_node(NodeSpec::plain("a", "pass", pass()).output("x")).unwrap();
        p.add_node(NodeSpec::branch("b").input("x")).unwrap();
        p.add_node(NodeSpec::plain("c", "pass", pass()).input("x")).unwrap();

        let err = p
            .add_edge(("a", "x"), ("b", "x"), Some(port_gt("x", 0.0)))
            .unwrap_err();
        assert!(matches!(
            err.violations(),
            Some([Violation::PredicateOnPlainEdge { .. }])
        ));

        p.add_edge(("a", "x"), ("b", "x"), None).unwrap();
        p.add_edge(("b", "x"), ("c", "x"), Some(port_gt("x", 0.0))).unwrap();
        p.add_default_edge(("b", "x"), ("c", "x")).unwrap();
        let err = p.add_default_edge(("b", "x"), ("c", "x")).unwrap_err();
        assert!(matches!(
            err.violations(),
            Some([Violation::MultipleDefaults { .. }])
        ));
    }

    #[test]
    fn test_signatures() {
        let mut p = Pipeline::new("p");
        p.add_node(
            NodeSpec::plain("a", "pass", pass())
                .input("v")
                .optional_input("scale")
                .output("x"),
        )
        .unwrap();
        p.add_node(NodeSpec::plain("b", "pass", pass()).input("x").output("w"))
            .unwrap();
        p.add_edge(("a", "x"), ("b", "x"), None).unwrap();
        p.set_entry(["a"]);
        p.set_exit(["b"]);

        assert_eq!(
            p.input_ports(),
            vec![PortSpec::required("v"), PortSpec::optional("scale")]
        );
        assert_eq!(p.output_ports(), vec![PortSpec::required("w")]);
    }

    #[test]
    fn test_remove_node_keeps_dangling_edges() {
        let mut p = Pipeline::new("p");
        p.add_node(NodeSpec::plain("a", "pass", pass()).output("x")).unwrap();
        p.add_node(NodeSpec::plain("b", "pass", pass()).input("x")).unwrap();
        p.add_node(NodeSpec::plain("c", "pass", pass())).unwrap();
        p.add_edge(("a", "x"), ("b", "x"), None).unwrap();
        p.set_exit(["b"]);

        assert!(p.remove_node("b").is_some());
        assert!(p.remove_node("b").is_none());
        assert_eq!(p.edges().len(), 1);
        assert!(p.exit().is_empty());
        assert_eq!(p.node("c").map(|n| n.id().as_str()), Some("c"));
    }

    #[test]
    fn test_describe_lists_nodes_and_edges() {
        let mut p = Pipeline::new("p");
        p.add_node(NodeSpec::plain("a", "pass", pass()).output("x")).unwrap();
        p.add_node(NodeSpec::branch("b").input("x")).unwrap();
        p.add_edge(("a", "x"), ("b", "x"), None).unwrap();
        p.set_entry(["a"]);

        let desc = p.describe();
        assert_eq!(desc["id"], "p");
        assert_eq!(desc["entry"], serde_json::json!(["a"]));
        assert_eq!(desc["nodes"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(desc["nodes"][1]["type"], "branch");
        assert_eq!(desc["edges"][0]["source"], "a.x");
    }
}
