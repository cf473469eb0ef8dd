//! Edge and node bookkeeping for one pipeline invocation.
//!
//! `Traversal` decides which nodes may run. It never runs anything itself:
//! the executor pops ready nodes, runs them, and reports back through
//! [`Traversal::deliver`] or [`Traversal::select_branch`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use graphk_core::error::{GraphkError, Result};
use graphk_core::event::EventBus;
use graphk_core::types::{ContextId, EdgeId, EngineEvent, PortValues, Value};

use crate::graph::topology::{EdgeRole, Topology};
use crate::graph::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeState {
    Pending,
    Active,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Waiting,
    Ready,
    Executed,
    Skipped,
}

pub(crate) struct Traversal<'a> {
    pipeline: &'a Pipeline,
    topo: &'a Topology,
    context: ContextId,
    events: &'a EventBus,
    edges: Vec<EdgeState>,
    values: Vec<Option<Value>>,
    nodes: Vec<NodeState>,
    /// Pipeline inputs bound to entry-node ports.
    seeds: Vec<PortValues>,
    /// Loop-carried values for a loop head, from its back edges.
    carried: Vec<PortValues>,
    /// Inputs gathered when a node became ready.
    prepared: Vec<PortValues>,
    frontier: BTreeSet<usize>,
    /// Per loop: exit-edge deliveries of the current iteration.
    held: Vec<BTreeMap<usize, Option<Value>>>,
    iterations: Vec<usize>,
}

impl<'a> Traversal<'a> {
    /// Bind pipeline inputs and compute the initial frontier.
    pub fn new(
        pipeline: &'a Pipeline,
        topo: &'a Topology,
        inputs: &PortValues,
        context: ContextId,
        events: &'a EventBus,
    ) -> Result<Self> {
        let node_count = pipeline.nodes().len();
        let mut seeds = vec![PortValues::new(); node_count];
        for id in pipeline.entry() {
            let Some(&n) = topo.index.get(id.as_str()) else {
                continue;
            };
            let fed = topo.forward_fed_ports(pipeline, n);
            for port in pipeline.nodes()[n].inputs() {
                if fed.contains(port.name.as_str()) {
                    continue;
                }
                match inputs.get(&port.name) {
                    Some(value) => {
                        seeds[n].insert(port.name.clone(), value.clone());
                    }
                    None if port.required => {
                        return Err(GraphkError::MissingInput {
                            pipeline: pipeline.id().to_string(),
                            port: port.name.clone(),
                        });
                    }
                    None => {}
                }
            }
        }

        let edge_count = pipeline.edges().len();
        let mut traversal = Self {
            pipeline,
            topo,
            context,
            events,
            edges: vec![EdgeState::Pending; edge_count],
            values: vec![None; edge_count],
            nodes: vec![NodeState::Waiting; node_count],
            seeds,
            carried: vec![PortValues::new(); node_count],
            prepared: vec![PortValues::new(); node_count],
            frontier: BTreeSet::new(),
            held: vec![BTreeMap::new(); topo.loops.len()],
            iterations: vec![1; topo.loops.len()],
        };
        for n in 0..node_count {
            traversal.evaluate(n)?;
        }
        Ok(traversal)
    }

    pub fn node_state(&self, n: usize) -> NodeState {
        self.nodes[n]
    }

    /// Lowest-index ready node.
    pub fn next(&mut self) -> Option<usize> {
        self.frontier.pop_first()
    }

    /// Every ready node, ascending.
    pub fn drain(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.frontier).into_iter().collect()
    }

    /// Inputs gathered for a ready node.
    pub fn take_inputs(&mut self, n: usize) -> PortValues {
        std::mem::take(&mut self.prepared[n])
    }

    /// Record a finished node and send its outputs downstream.
    pub fn deliver(&mut self, n: usize, outputs: &PortValues) -> Result<()> {
        let (pipeline, topo) = (self.pipeline, self.topo);
        self.nodes[n] = NodeState::Executed;
        for &e in &topo.outgoing[n] {
            let port = &pipeline.edges()[e].source().port;
            self.resolve(e, outputs.get(port).cloned())?;
        }
        Ok(())
    }

    /// Pick a branch's outgoing edge: the first holding predicate in
    /// declaration order, else the default edge. Every other edge dies.
    pub fn select_branch(&mut self, n: usize, inputs: &PortValues) -> Result<EdgeId> {
        let (pipeline, topo) = (self.pipeline, self.topo);
        let edges = pipeline.edges();
        let outgoing = &topo.outgoing[n];
        let selected = outgoing
            .iter()
            .copied()
            .find(|&e| !edges[e].is_default() && edges[e].holds(inputs))
            .or_else(|| outgoing.iter().copied().find(|&e| edges[e].is_default()));

        let Some(selected) = selected else {
            return Err(GraphkError::BranchUnresolved {
                pipeline: pipeline.id().to_string(),
                node: pipeline.nodes()[n].id().clone(),
            });
        };

        self.nodes[n] = NodeState::Executed;
        let node = pipeline.nodes()[n].id();
        debug!(
            pipeline = %pipeline.id(),
            node = %node,
            edge = %EdgeId(selected),
            "Branch selected"
        );
        self.events.publish(EngineEvent::BranchSelected {
            context: self.context,
            node: node.clone(),
            edge: EdgeId(selected),
        });
        for &e in outgoing {
            let value = if e == selected {
                inputs.get(&edges[e].source().port).cloned()
            } else {
                None
            };
            self.resolve(e, value)?;
        }
        Ok(EdgeId(selected))
    }

    /// Restart every loop whose iteration has settled and whose back edges
    /// carry a value.
    pub fn poll_loops(&mut self, limit: usize) -> Result<()> {
        let topo = self.topo;
        for (l, info) in topo.loops.iter().enumerate() {
            let settled = info
                .members
                .iter()
                .all(|&m| matches!(self.nodes[m], NodeState::Executed | NodeState::Skipped));
            let back_resolved = info
                .back_edges
                .iter()
                .all(|&e| self.edges[e] != EdgeState::Pending);
            let carries = info
                .back_edges
                .iter()
                .any(|&e| self.edges[e] == EdgeState::Active);
            if settled && back_resolved && carries {
                self.restart(l, limit)?;
            }
        }
        Ok(())
    }

    fn restart(&mut self, l: usize, limit: usize) -> Result<()> {
        let (pipeline, topo) = (self.pipeline, self.topo);
        let info = &topo.loops[l];
        let head = info.head;
        let head_id = pipeline.nodes()[head].id();
        let iteration = self.iterations[l] + 1;
        if iteration > limit {
            return Err(GraphkError::LoopLimitExceeded {
                pipeline: pipeline.id().to_string(),
                node: head_id.clone(),
                limit,
            });
        }
        self.iterations[l] = iteration;

        let mut carried = PortValues::new();
        for &e in &info.back_edges {
            if self.edges[e] != EdgeState::Active {
                continue;
            }
            let port = &pipeline.edges()[e].dest().port;
            if carried.contains_key(port) {
                return Err(self.conflict(head, port));
            }
            if let Some(value) = self.values[e].clone() {
                carried.insert(port.clone(), value);
            }
        }
        self.carried[head] = carried;

        for &m in &info.members {
            self.nodes[m] = NodeState::Waiting;
            self.prepared[m].clear();
        }
        for &e in info.internal_edges.iter().chain(&info.back_edges) {
            self.edges[e] = EdgeState::Pending;
            self.values[e] = None;
        }
        self.held[l].clear();

        debug!(pipeline = %pipeline.id(), head = %head_id, iteration, "Loop iteration");
        self.events.publish(EngineEvent::LoopIteration {
            context: self.context,
            head: head_id.clone(),
            iteration,
        });
        let inputs = self.gather(head)?;
        self.prepared[head] = inputs;
        self.nodes[head] = NodeState::Ready;
        self.frontier.insert(head);
        Ok(())
    }

    /// Release exit-edge deliveries held by settled loops. Returns whether
    /// anything was released.
    pub fn flush_exits(&mut self) -> Result<bool> {
        let mut released = false;
        for l in 0..self.held.len() {
            let held = std::mem::take(&mut self.held[l]);
            for (e, value) in held {
                released = true;
                self.settle(e, value)?;
            }
        }
        Ok(released)
    }

    fn resolve(&mut self, e: usize, value: Option<Value>) -> Result<()> {
        let role = self.topo.roles[e];
        match role {
            EdgeRole::Exit(l) => {
                self.held[l].insert(e, value);
                Ok(())
            }
            EdgeRole::Back(_) => {
                self.set_edge(e, value);
                Ok(())
            }
            EdgeRole::Forward | EdgeRole::Internal(_) => self.settle(e, value),
        }
    }

    fn set_edge(&mut self, e: usize, value: Option<Value>) {
        self.edges[e] = if value.is_some() {
            EdgeState::Active
        } else {
            EdgeState::Dead
        };
        self.values[e] = value;
    }

    fn settle(&mut self, e: usize, value: Option<Value>) -> Result<()> {
        self.set_edge(e, value);
        let topo = self.topo;
        match topo.endpoints[e] {
            Some((_, d)) => self.evaluate(d),
            None => Ok(()),
        }
    }

    /// Move a waiting node to ready or skipped once every non-back incoming
    /// edge is resolved.
    fn evaluate(&mut self, n: usize) -> Result<()> {
        let (pipeline, topo) = (self.pipeline, self.topo);
        if self.nodes[n] != NodeState::Waiting {
            return Ok(());
        }
        let pending = topo.incoming[n]
            .iter()
            .any(|&e| !topo.is_back(e) && self.edges[e] == EdgeState::Pending);
        if pending {
            return Ok(());
        }

        let inputs = self.gather(n)?;
        let node = &pipeline.nodes()[n];
        let satisfied = node
            .inputs()
            .iter()
            .filter(|p| p.required)
            .all(|p| inputs.contains_key(&p.name));

        // A node whose every incoming edge died is cut off, even when all of
        // its inputs are optional.
        let mut forward = topo.incoming[n].iter().filter(|&&e| !topo.is_back(e));
        let has_incoming = forward.clone().next().is_some();
        let live = forward.any(|&e| self.edges[e] == EdgeState::Active);
        let fed_outside = pipeline.entry().contains(node.id())
            || !self.seeds[n].is_empty()
            || !self.carried[n].is_empty();
        let cut_off = has_incoming && !live && !fed_outside;

        if satisfied && !cut_off {
            self.prepared[n] = inputs;
            self.nodes[n] = NodeState::Ready;
            self.frontier.insert(n);
            return Ok(());
        }

        debug!(pipeline = %pipeline.id(), node = %node.id(), "Node skipped");
        self.events.publish(EngineEvent::NodeSkipped {
            context: self.context,
            node: node.id().clone(),
        });
        self.nodes[n] = NodeState::Skipped;
        for &e in &topo.outgoing[n] {
            self.resolve(e, None)?;
        }
        Ok(())
    }

    /// Collect the values bound to a node's input ports.
    fn gather(&self, n: usize) -> Result<PortValues> {
        let edges = self.pipeline.edges();
        let mut inputs = self.seeds[n].clone();
        let mut from_edges: BTreeSet<&str> = BTreeSet::new();
        for &e in &self.topo.incoming[n] {
            if self.topo.is_back(e) || self.edges[e] != EdgeState::Active {
                continue;
            }
            let port = edges[e].dest().port.as_str();
            if !from_edges.insert(port) {
                return Err(self.conflict(n, port));
            }
            if let Some(value) = &self.values[e] {
                inputs.insert(port.to_string(), value.clone());
            }
        }
        for (port, value) in &self.carried[n] {
            inputs.insert(port.clone(), value.clone());
        }
        Ok(inputs)
    }

    fn conflict(&self, n: usize, port: &str) -> GraphkError {
        GraphkError::BindingConflict {
            pipeline: self.pipeline.id().to_string(),
            node: self.pipeline.nodes()[n].id().clone(),
            port: port.to_string(),
        }
    }
}
