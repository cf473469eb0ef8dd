use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use graphk_core::types::NodeId;

use super::pipeline::Pipeline;

/// How an edge takes part in loop execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeRole {
    /// Ordinary acyclic edge.
    Forward,
    /// Between two non-head members of the same loop, or from the head.
    Internal(usize),
    /// From a loop member back into the loop head.
    Back(usize),
    /// Leaves the loop. Deliveries are held until the loop settles.
    Exit(usize),
}

/// A strongly connected component with exactly one loop-capable node.
#[derive(Debug, Clone)]
pub(crate) struct LoopInfo {
    pub head: usize,
    pub members: BTreeSet<usize>,
    pub back_edges: Vec<usize>,
    pub internal_edges: Vec<usize>,
    pub exit_edges: Vec<usize>,
}

/// Index-based view of a pipeline, built once per run.
///
/// Nodes are numbered by registration order and edges by insertion order, so
/// iterating any of these lists is deterministic.
#[derive(Debug, Clone)]
pub(crate) struct Topology {
    pub index: HashMap<NodeId, usize>,
    /// Resolved (source, dest) node indices; `None` for dangling edges.
    pub endpoints: Vec<Option<(usize, usize)>>,
    pub incoming: Vec<Vec<usize>>,
    pub outgoing: Vec<Vec<usize>>,
    pub roles: Vec<EdgeRole>,
    pub loops: Vec<LoopInfo>,
    /// Every cyclic component, members sorted by registration order.
    pub cycles: Vec<Vec<usize>>,
}

impl Topology {
    pub fn build(pipeline: &Pipeline) -> Self {
        let nodes = pipeline.nodes();
        let edges = pipeline.edges();
        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id().clone(), i))
            .collect();

        let mut incoming = vec![Vec::new(); nodes.len()];
        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut endpoints = Vec::with_capacity(edges.len());
        let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(nodes.len(), edges.len());
        for _ in nodes {
            graph.add_node(());
        }

        for (e, edge) in edges.iter().enumerate() {
            let resolved = match (
                index.get(edge.source().node.as_str()),
                index.get(edge.dest().node.as_str()),
            ) {
                (Some(&s), Some(&d)) => Some((s, d)),
                _ => None,
            };
            if let Some((s, d)) = resolved {
                outgoing[s].push(e);
                incoming[d].push(e);
                graph.add_edge(NodeIndex::new(s), NodeIndex::new(d), ());
            }
            endpoints.push(resolved);
        }

        let mut cycles = Vec::new();
        let mut loops = Vec::new();
        let mut loop_of: Vec<Option<usize>> = vec![None; nodes.len()];
        for component in tarjan_scc(&graph) {
            let mut members: Vec<usize> = component.iter().map(|ix| ix.index()).collect();
            members.sort_unstable();
            let cyclic = members.len() > 1
                || members.iter().any(|&m| {
                    outgoing[m]
                        .iter()
                        .any(|&e| endpoints[e].is_some_and(|(_, d)| d == m))
                });
            if !cyclic {
                continue;
            }
            let heads: Vec<usize> = members
                .iter()
                .copied()
                .filter(|&m| nodes[m].is_loop_capable())
                .collect();
            if let [head] = heads.as_slice() {
                let l = loops.len();
                for &m in &members {
                    loop_of[m] = Some(l);
                }
                loops.push(LoopInfo {
                    head: *head,
                    members: members.iter().copied().collect(),
                    back_edges: vec![],
                    internal_edges: vec![],
                    exit_edges: vec![],
                });
            }
            cycles.push(members);
        }
        cycles.sort();

        let mut roles = Vec::with_capacity(edges.len());
        for (e, resolved) in endpoints.iter().enumerate() {
            let role = match *resolved {
                Some((s, d)) => match loop_of[s] {
                    Some(l) if loop_of[d] == Some(l) => {
                        if d == loops[l].head {
                            loops[l].back_edges.push(e);
                            EdgeRole::Back(l)
                        } else {
                            loops[l].internal_edges.push(e);
                            EdgeRole::Internal(l)
                        }
                    }
                    Some(l) => {
                        loops[l].exit_edges.push(e);
                        EdgeRole::Exit(l)
                    }
                    None => EdgeRole::Forward,
                },
                None => EdgeRole::Forward,
            };
            roles.push(role);
        }

        Self {
            index,
            endpoints,
            incoming,
            outgoing,
            roles,
            loops,
            cycles,
        }
    }

    pub fn is_back(&self, edge: usize) -> bool {
        matches!(self.roles[edge], EdgeRole::Back(_))
    }

    /// Input ports of node `n` fed by at least one non-back edge.
    pub fn forward_fed_ports<'p>(&self, pipeline: &'p Pipeline, n: usize) -> HashSet<&'p str> {
        self.incoming[n]
            .iter()
            .filter(|&&e| !self.is_back(e))
            .map(|&e| pipeline.edges()[e].dest().port.as_str())
            .collect()
    }

    /// Node indices reachable from the given start nodes along resolved edges.
    pub fn reachable_from(&self, starts: &[usize]) -> Vec<bool> {
        let mut seen = vec![false; self.incoming.len()];
        let mut stack: Vec<usize> = starts.to_vec();
        while let Some(n) = stack.pop() {
            if std::mem::replace(&mut seen[n], true) {
                continue;
            }
            for &e in &self.outgoing[n] {
                if let Some((_, d)) = self.endpoints[e] {
                    if !seen[d] {
                        stack.push(d);
                    }
                }
            }
        }
        seen
    }
}
