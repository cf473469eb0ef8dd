use std::collections::{BTreeSet, HashMap, VecDeque};

use graphk_core::error::{PortDirection, Violation};
use graphk_core::types::{EdgeId, NodeId, PortSpec};

use super::node::NodeKind;
use super::pipeline::Pipeline;
use super::topology::Topology;
use crate::catalog::PipelineCatalog;

/// Check one pipeline and return every violation found.
///
/// Nested pipeline nodes are checked against the catalog for existence and
/// signature only; the nested pipelines themselves are not descended into.
/// See [`validate_reachable`] for that.
pub fn validate(pipeline: &Pipeline, catalog: &PipelineCatalog) -> Vec<Violation> {
    let mut violations = Vec::new();
    let topo = Topology::build(pipeline);

    check_designations(pipeline, &topo, &mut violations);
    check_edges(pipeline, &mut violations);
    check_cycles(pipeline, &topo, &mut violations);
    check_inputs(pipeline, &topo, &mut violations);
    check_reachability(pipeline, &topo, &mut violations);
    check_nested(pipeline, catalog, &mut violations);

    violations
}

/// Validate `root` and every catalog pipeline reachable from it through
/// nested-pipeline nodes. Violations found inside a nested pipeline are
/// wrapped in [`Violation::InNested`].
pub fn validate_reachable(root: &Pipeline, catalog: &PipelineCatalog) -> Vec<Violation> {
    let mut violations = validate(root, catalog);
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<String> = root.nested_pipelines().map(str::to_string).collect();
    seen.insert(root.id().to_string());

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        // Unknown ids were already reported by the referencing pipeline.
        let Some(nested) = catalog.get(&id) else {
            continue;
        };
        violations.extend(
            validate(nested, catalog)
                .into_iter()
                .map(|inner| Violation::InNested {
                    pipeline: id.clone(),
                    inner: Box::new(inner),
                }),
        );
        queue.extend(nested.nested_pipelines().map(str::to_string));
    }
    violations
}

fn check_designations(pipeline: &Pipeline, topo: &Topology, out: &mut Vec<Violation>) {
    if pipeline.entry().is_empty() {
        out.push(Violation::NoEntry);
    }
    for id in pipeline.entry() {
        if !topo.index.contains_key(id.as_str()) {
            out.push(Violation::UnknownEntry(id.clone()));
        }
    }
    for id in pipeline.exit() {
        if !topo.index.contains_key(id.as_str()) {
            out.push(Violation::UnknownExit(id.clone()));
        }
    }
}

/// Edges are checked when added, but nodes and ports can be removed later.
fn check_edges(pipeline: &Pipeline, out: &mut Vec<Violation>) {
    let mut defaults: HashMap<&NodeId, usize> = HashMap::new();
    for edge in pipeline.edges() {
        let id = edge.id();
        match pipeline.node(edge.source().node.as_str()) {
            None => out.push(Violation::EdgeUnknownNode {
                edge: id,
                node: edge.source().node.clone(),
            }),
            Some(node) => {
                if !node.has_output(&edge.source().port) {
                    out.push(unknown_port(
                        id,
                        &edge.source().node,
                        &edge.source().port,
                        PortDirection::Output,
                    ));
                }
                if (edge.predicate().is_some() || edge.is_default()) && !node.is_branch() {
                    out.push(Violation::PredicateOnPlainEdge {
                        edge: id,
                        node: edge.source().node.clone(),
                    });
                }
            }
        }
        match pipeline.node(edge.dest().node.as_str()) {
            None => out.push(Violation::EdgeUnknownNode {
                edge: id,
                node: edge.dest().node.clone(),
            }),
            Some(node) if !node.has_input(&edge.dest().port) => {
                out.push(unknown_port(
                    id,
                    &edge.dest().node,
                    &edge.dest().port,
                    PortDirection::Input,
                ));
            }
            Some(_) => {}
        }
        if edge.is_default() {
            *defaults.entry(&edge.source().node).or_default() += 1;
        }
    }

    let mut multiple: Vec<&NodeId> = defaults
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(node, _)| node)
        .collect();
    multiple.sort();
    for node in multiple {
        out.push(Violation::MultipleDefaults { node: node.clone() });
    }
}

fn unknown_port(edge: EdgeId, node: &NodeId, port: &str, direction: PortDirection) -> Violation {
    Violation::EdgeUnknownPort {
        edge,
        node: node.clone(),
        port: port.to_string(),
        direction,
    }
}

fn check_cycles(pipeline: &Pipeline, topo: &Topology, out: &mut Vec<Violation>) {
    let nodes = pipeline.nodes();
    for cycle in &topo.cycles {
        let ids: Vec<NodeId> = cycle.iter().map(|&n| nodes[n].id().clone()).collect();
        let heads = cycle.iter().filter(|&&n| nodes[n].is_loop_capable()).count();
        match heads {
            0 => out.push(Violation::UnmarkedCycle { nodes: ids }),
            1 => {}
            _ => out.push(Violation::AmbiguousLoopHead { nodes: ids }),
        }
    }
}

/// Required inputs need a non-back incoming edge. Entry nodes are exempt:
/// their unfed ports become pipeline inputs.
fn check_inputs(pipeline: &Pipeline, topo: &Topology, out: &mut Vec<Violation>) {
    for (n, node) in pipeline.nodes().iter().enumerate() {
        if pipeline.entry().contains(node.id()) {
            continue;
        }
        let fed = topo.forward_fed_ports(pipeline, n);
        for port in node.inputs().iter().filter(|p| p.required) {
            if !fed.contains(port.name.as_str()) {
                out.push(Violation::UnfedInput {
                    node: node.id().clone(),
                    port: port.name.clone(),
                });
            }
        }
    }
}

fn check_reachability(pipeline: &Pipeline, topo: &Topology, out: &mut Vec<Violation>) {
    let starts: Vec<usize> = pipeline
        .entry()
        .iter()
        .filter_map(|id| topo.index.get(id.as_str()).copied())
        .collect();
    if starts.is_empty() {
        // Already reported as NoEntry or UnknownEntry.
        return;
    }
    let reached = topo.reachable_from(&starts);
    for (node, reached) in pipeline.nodes().iter().zip(reached) {
        if !reached {
            out.push(Violation::Unreachable {
                node: node.id().clone(),
            });
        }
    }
}

fn check_nested(pipeline: &Pipeline, catalog: &PipelineCatalog, out: &mut Vec<Violation>) {
    for node in pipeline.nodes() {
        let NodeKind::Pipeline { pipeline: target } = node.kind() else {
            continue;
        };
        let Some(nested) = catalog.get(target) else {
            out.push(Violation::UnknownPipeline {
                node: node.id().clone(),
                pipeline: target.clone(),
            });
            continue;
        };
        let sides = [
            (PortDirection::Input, node.inputs(), nested.input_ports()),
            (PortDirection::Output, node.outputs(), nested.output_ports()),
        ];
        for (direction, declared, expected) in sides {
            let declared = sorted_names(declared);
            let expected = sorted_names(&expected);
            if declared != expected {
                out.push(Violation::SignatureMismatch {
                    node: node.id().clone(),
                    pipeline: target.clone(),
                    direction,
                    declared,
                    expected,
                });
            }
        }
    }
}

fn sorted_names(ports: &[PortSpec]) -> Vec<String> {
    let mut names: Vec<String> = ports.iter().map(|p| p.name.clone()).collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::FnBehavior;
    use crate::graph::gate::port_gt;
    use crate::graph::node::NodeSpec;
    use graphk_core::traits::NodeBehavior;
    use std::sync::Arc;

    fn pass() -> Arc<dyn NodeBehavior> {
        Arc::new(FnBehavior::new(|inputs| Ok(inputs.clone())))
    }

    fn plain(id: &str) -> NodeSpec {
        NodeSpec::plain(id, "pass", pass()).input("v").output("v")
    }

    fn chain() -> Pipeline {
        let mut p = Pipeline::new("chain");
        p.add_node(plain("a")).unwrap();
        p.add_node(plain("b")).unwrap();
        p.add_edge(("a", "v"), ("b", "v"), None).unwrap();
        p.set_entry(["a"]);
        p.set_exit(["b"]);
        p
    }

    #[test]
    fn test_valid_pipeline_has_no_violations() {
        let catalog = PipelineCatalog::new();
        assert!(validate(&chain(), &catalog).is_empty());
    }

    #[test]
    fn test_reports_all_violations_at_once() {
        let catalog = PipelineCatalog::new();
        let mut p = chain();
        p.add_node(plain("island")).unwrap();
        p.set_exit(["b", "ghost"]);
        p.node_mut("b").unwrap().remove_input("v");

        let violations = validate(&p, &catalog);
        assert!(violations.contains(&Violation::UnknownExit(NodeId::from("ghost"))));
        assert!(violations.contains(&Violation::EdgeUnknownPort {
            edge: EdgeId(0),
            node: NodeId::from("b"),
            port: "v".into(),
            direction: PortDirection::Input,
        }));
        assert!(violations.contains(&Violation::UnfedInput {
            node: NodeId::from("island"),
            port: "v".into(),
        }));
        assert!(violations.contains(&Violation::Unreachable {
            node: NodeId::from("island"),
        }));
        assert_eq!(violations.len(), 4);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let catalog = PipelineCatalog::new();
        let mut p = chain();
        p.set_entry(Vec::<NodeId>::new());
        let first = validate(&p, &catalog);
        assert_eq!(first, validate(&p, &catalog));
        // Without an entry, the first node's input has no source either.
        assert_eq!(
            first,
            vec![
                Violation::NoEntry,
                Violation::UnfedInput {
                    node: NodeId::from("a"),
                    port: "v".into(),
                },
            ]
        );
    }

    #[test]
    fn test_cycle_without_loop_head() {
        let catalog = PipelineCatalog::new();
        let mut p = Pipeline::new("p");
        p.add_node(plain("start")).unwrap();
        p.add_node(
            NodeSpec::plain("a", "pass", pass())
                .input("v")
                .optional_input("w")
                .output("v"),
        )
        .unwrap();
        p.add_node(plain("b")).unwrap();
        p.add_edge(("start", "v"), ("a", "v"), None).unwrap();
        p.add_edge(("a", "v"), ("b", "v"), None).unwrap();
        p.add_edge(("b", "v"), ("a", "w"), None).unwrap();
        p.set_entry(["start"]);

        assert_eq!(
            validate(&p, &catalog),
            vec![Violation::UnmarkedCycle {
                nodes: vec![NodeId::from("a"), NodeId::from("b")],
            }]
        );

        p.node_mut("a").unwrap().loop_capable = true;
        assert!(validate(&p, &catalog).is_empty());

        p.node_mut("b").unwrap().loop_capable = true;
        assert!(matches!(
            validate(&p, &catalog).as_slice(),
            [Violation::AmbiguousLoopHead { .. }]
        ));
    }

    #[test]
    fn test_loop_head_fed_only_by_back_edge_is_unfed() {
        let catalog = PipelineCatalog::new();
        let mut p = Pipeline::new("p");
        p.add_node(plain("start")).unwrap();
        p.add_node(plain("head").loop_capable()).unwrap();
        p.add_node(plain("body")).unwrap();
        p.add_edge(("head", "v"), ("body", "v"), None).unwrap();
        p.add_edge(("body", "v"), ("head", "v"), None).unwrap();
        p.set_entry(["start"]);

        let violations = validate(&p, &catalog);
        assert!(violations.contains(&Violation::UnfedInput {
            node: NodeId::from("head"),
            port: "v".into(),
        }));
    }

    #[test]
    fn test_multiple_defaults_and_plain_predicates() {
        let catalog = PipelineCatalog::new();
        let mut p = Pipeline::new("p");
        p.add_node(plain("a")).unwrap();
        p.add_node(NodeSpec::branch("b").input("v")).unwrap();
        p.add_node(plain("c")).unwrap();
        p.add_edge(("a", "v"), ("b", "v"), None).unwrap();
        p.add_edge(("b", "v"), ("c", "v"), Some(port_gt("v", 0.0))).unwrap();
        p.add_default_edge(("b", "v"), ("c", "v")).unwrap();
        p.set_entry(["a"]);

        assert!(validate(&p, &catalog).is_empty());

        // Turning the branch into a plain node leaves its edges marked.
        p.node_mut("b").unwrap().kind = NodeKind::Plain {
            kind: "pass".into(),
            behavior: pass(),
        };
        let violations = validate(&p, &catalog);
        assert_eq!(
            violations
                .iter()
                .filter(|v| matches!(v, Violation::PredicateOnPlainEdge { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_nested_signature_checked() {
        let mut catalog = PipelineCatalog::new();
        catalog.insert(chain()).unwrap();

        let mut outer = Pipeline::new("outer");
        outer
            .add_node(NodeSpec::pipeline("n", "chain").input("v").output("w"))
            .unwrap();
        outer.add_node(NodeSpec::pipeline("m", "missing")).unwrap();
        outer.set_entry(["n", "m"]);

        let violations = validate(&outer, &catalog);
        assert_eq!(
            violations,
            vec![
                Violation::SignatureMismatch {
                    node: NodeId::from("n"),
                    pipeline: "chain".into(),
                    direction: PortDirection::Output,
                    declared: vec!["w".into()],
                    expected: vec!["v".into()],
                },
                Violation::UnknownPipeline {
                    node: NodeId::from("m"),
                    pipeline: "missing".into(),
                },
            ]
        );
    }

    #[test]
    fn test_validate_reachable_wraps_nested_violations() {
        let mut broken = chain();
        broken.set_exit(["nowhere"]);
        let mut catalog = PipelineCatalog::new();
        catalog.insert(broken).unwrap();

        let mut outer = Pipeline::new("outer");
        outer
            .add_node(NodeSpec::pipeline("n", "chain").input("v"))
            .unwrap();
        outer.set_entry(["n"]);

        let violations = validate_reachable(&outer, &catalog);
        assert_eq!(
            violations,
            vec![Violation::InNested {
                pipeline: "chain".into(),
                inner: Box::new(Violation::UnknownExit(NodeId::from("nowhere"))),
            }]
        );
    }
}
