use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use graphk_core::config::{InFlightPolicy, RunConfig};
use graphk_core::error::{GraphkError, NodeFailure, Result, Violation, Violations};
use graphk_core::event::EventBus;
use graphk_core::types::{ContextId, EngineEvent, NodeContext, PortValues, RunId, RunState};

use super::frontier::Traversal;
use super::handle::ExecutionHandle;
use crate::catalog::PipelineCatalog;
use crate::context::{ContextJournal, ExecutionContext, TraceEntry};
use crate::graph::topology::Topology;
use crate::graph::{validate_reachable, Node, NodeKind, Pipeline};

/// Executes pipelines against a catalog of nestable pipelines.
///
/// The runtime holds no per-run state. Concurrent runs share the catalog and
/// the event bus and nothing else.
#[derive(Clone)]
pub struct Runtime {
    catalog: Arc<PipelineCatalog>,
    events: Arc<EventBus>,
}

impl Runtime {
    pub fn new(catalog: PipelineCatalog) -> Self {
        Self::with_events(catalog, Arc::new(EventBus::default()))
    }

    /// Publish engine events on an existing bus.
    pub fn with_events(catalog: PipelineCatalog, events: Arc<EventBus>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            events,
        }
    }

    pub fn catalog(&self) -> &PipelineCatalog {
        &self.catalog
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Every structural violation of `pipeline` and of the catalog pipelines
    /// it reaches. Empty means runnable.
    pub fn validate(&self, pipeline: &Pipeline) -> Vec<Violation> {
        validate_reachable(pipeline, &self.catalog)
    }

    /// Whether every behavior reachable from `pipeline` reports healthy.
    pub fn ping(&self, pipeline: &Pipeline) -> bool {
        let mut seen = HashSet::new();
        self.ping_inner(pipeline, &mut seen)
    }

    fn ping_inner(&self, pipeline: &Pipeline, seen: &mut HashSet<String>) -> bool {
        pipeline.nodes().iter().all(|node| match node.kind() {
            NodeKind::Pipeline { pipeline: id } => {
                if !seen.insert(id.clone()) {
                    return true;
                }
                match self.catalog.get(id) {
                    Some(nested) => self.ping_inner(nested, seen),
                    None => false,
                }
            }
            _ => node.ping(),
        })
    }

    /// Run `pipeline` to completion and return its exit outputs.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        inputs: PortValues,
        config: RunConfig,
    ) -> Result<PortValues> {
        self.execution(pipeline, inputs, config).run().await
    }

    /// Prepare a run without starting it, so a handle can be taken first.
    pub fn execution<'a>(
        &'a self,
        pipeline: &'a Pipeline,
        inputs: PortValues,
        config: RunConfig,
    ) -> Execution<'a> {
        let cancel = match &config.cancellation {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let handle = ExecutionHandle::new(RunId::new(), cancel, Arc::new(ContextJournal::new()));
        Execution {
            runtime: self,
            pipeline,
            inputs,
            config,
            handle,
        }
    }
}

/// A prepared run. Take a [`handle`](Execution::handle) before awaiting
/// [`run`](Execution::run) to cancel or observe it.
pub struct Execution<'a> {
    runtime: &'a Runtime,
    pipeline: &'a Pipeline,
    inputs: PortValues,
    config: RunConfig,
    handle: ExecutionHandle,
}

impl<'a> Execution<'a> {
    pub fn handle(&self) -> ExecutionHandle {
        self.handle.clone()
    }

    pub async fn run(self) -> Result<PortValues> {
        let Execution {
            runtime,
            pipeline,
            inputs,
            config,
            handle,
        } = self;
        let run_id = handle.run_id().clone();
        let cancel = handle.cancel_token();
        let journal = handle.journal();

        info!(run_id = %run_id, pipeline = %pipeline.id(), "Run started");
        runtime.events.publish(EngineEvent::RunStarted {
            run_id: run_id.clone(),
            pipeline: pipeline.id().to_string(),
        });

        let violations = runtime.validate(pipeline);
        let result = if violations.is_empty() {
            let plan = Plan::build(pipeline, &runtime.catalog);
            let driver = Driver {
                runtime,
                plan: &plan,
                config: &config,
                cancel: &cancel,
                journal: &journal,
                run_id: &run_id,
            };
            driver
                .execute_pipeline(pipeline, &plan.root, inputs, None, 0)
                .await
        } else {
            warn!(
                pipeline = %pipeline.id(),
                violations = violations.len(),
                "Pipeline failed validation"
            );
            let mut ctx = ExecutionContext::open(
                Arc::clone(&journal),
                Arc::clone(&runtime.events),
                None,
                pipeline.id(),
                0,
            );
            ctx.transition(RunState::Failed);
            Err(GraphkError::Structural(Violations(violations)))
        };

        let state = terminal_state(&result);
        match &result {
            Ok(outputs) => info!(
                run_id = %run_id,
                pipeline = %pipeline.id(),
                outputs = outputs.len(),
                "Run completed"
            ),
            Err(e) if e.is_cancelled() => {
                warn!(run_id = %run_id, pipeline = %pipeline.id(), "Run aborted")
            }
            Err(e) => {
                error!(run_id = %run_id, pipeline = %pipeline.id(), error = %e, "Run failed")
            }
        }
        runtime.events.publish(EngineEvent::RunFinished { run_id, state });
        result
    }
}

fn terminal_state<T>(result: &Result<T>) -> RunState {
    match result {
        Ok(_) => RunState::Completed,
        Err(e) if e.is_cancelled() => RunState::Aborted,
        Err(_) => RunState::Failed,
    }
}

/// Topologies for the root pipeline and every catalog pipeline it reaches.
struct Plan {
    root: Topology,
    nested: HashMap<String, Topology>,
}

impl Plan {
    fn build(root: &Pipeline, catalog: &PipelineCatalog) -> Self {
        let mut nested = HashMap::new();
        let mut queue: VecDeque<&str> = root.nested_pipelines().collect();
        while let Some(id) = queue.pop_front() {
            if nested.contains_key(id) {
                continue;
            }
            if let Some(pipeline) = catalog.get(id) {
                queue.extend(pipeline.nested_pipelines());
                nested.insert(id.to_string(), Topology::build(pipeline));
            }
        }
        Self {
            root: Topology::build(root),
            nested,
        }
    }
}

/// Everything shared by the invocations of one run.
#[derive(Clone, Copy)]
struct Driver<'a> {
    runtime: &'a Runtime,
    plan: &'a Plan,
    config: &'a RunConfig,
    cancel: &'a CancellationToken,
    journal: &'a Arc<ContextJournal>,
    run_id: &'a RunId,
}

impl<'a> Driver<'a> {
    /// Run one pipeline invocation in a fresh context.
    fn execute_pipeline(
        self,
        pipeline: &'a Pipeline,
        topo: &'a Topology,
        inputs: PortValues,
        parent: Option<ContextId>,
        depth: usize,
    ) -> BoxFuture<'a, Result<PortValues>> {
        Box::pin(async move {
            let mut ctx = ExecutionContext::open(
                Arc::clone(self.journal),
                Arc::clone(&self.runtime.events),
                parent,
                pipeline.id(),
                depth,
            );
            ctx.transition(RunState::Running);
            let result = self.traverse(&mut ctx, pipeline, topo, inputs).await;
            ctx.transition(terminal_state(&result));
            result
        })
    }

    async fn traverse(
        self,
        ctx: &mut ExecutionContext,
        pipeline: &'a Pipeline,
        topo: &'a Topology,
        inputs: PortValues,
    ) -> Result<PortValues> {
        let mut traversal =
            Traversal::new(pipeline, topo, &inputs, ctx.id(), &self.runtime.events)?;
        let mut outputs = PortValues::new();

        loop {
            if self.cancel.is_cancelled() {
                info!(pipeline = %pipeline.id(), depth = ctx.depth(), "Cancellation observed");
                return Err(GraphkError::Cancelled);
            }
            traversal.poll_loops(self.config.max_loop_iterations)?;

            let batch: Vec<usize> = if self.config.parallel_frontier {
                traversal.drain()
            } else {
                traversal.next().into_iter().collect()
            };
            if batch.is_empty() {
                if traversal.flush_exits()? {
                    continue;
                }
                break;
            }

            let prepared: Vec<(usize, PortValues)> = batch
                .into_iter()
                .map(|n| (n, traversal.take_inputs(n)))
                .collect();
            let bindings = ctx.snapshot();
            let activations = prepared.iter().map(|(n, inputs)| {
                let node_ctx = NodeContext {
                    run_id: self.run_id.clone(),
                    context: ctx.id(),
                    pipeline: pipeline.id().to_string(),
                    node: pipeline.nodes()[*n].id().clone(),
                    depth: ctx.depth(),
                    bindings: Arc::clone(&bindings),
                    cancel: self.cancel.clone(),
                };
                self.activate(pipeline, *n, inputs.clone(), node_ctx)
            });
            let results = join_all(activations).await;

            // Bound in ascending registration order; the first failure wins.
            for ((n, inputs), result) in prepared.into_iter().zip(results) {
                let produced = result?;
                let node = &pipeline.nodes()[n];
                if node.is_branch() {
                    traversal.select_branch(n, &inputs)?;
                } else {
                    traversal.deliver(n, &produced)?;
                }
                for (port, value) in &produced {
                    ctx.bind(node.id().as_str(), port, value.clone());
                }
                ctx.journal().record(TraceEntry {
                    context: ctx.id(),
                    pipeline: pipeline.id().to_string(),
                    node: node.id().clone(),
                });
                if pipeline.exit().contains(node.id()) {
                    outputs.extend(produced);
                }
            }
        }

        Ok(outputs)
    }

    /// Run a single node. Branches pass their inputs through; selection
    /// happens when the result is delivered.
    async fn activate(
        self,
        pipeline: &'a Pipeline,
        n: usize,
        inputs: PortValues,
        node_ctx: NodeContext,
    ) -> Result<PortValues> {
        let node = &pipeline.nodes()[n];
        let context = node_ctx.context;
        let depth = node_ctx.depth;
        let started = Instant::now();
        self.runtime.events.publish(EngineEvent::NodeStarted {
            context,
            node: node.id().clone(),
        });
        debug!(pipeline = %pipeline.id(), node = %node.id(), depth, "Executing node");

        let produced = match node.kind() {
            NodeKind::Branch => inputs,
            NodeKind::Plain { behavior, .. } => {
                let result = match self.config.in_flight {
                    InFlightPolicy::Abandon => tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(GraphkError::Cancelled),
                        result = behavior.execute(inputs, node_ctx) => result,
                    },
                    InFlightPolicy::Finish => behavior.execute(inputs, node_ctx).await,
                };
                let produced = result.map_err(|e| {
                    error!(pipeline = %pipeline.id(), node = %node.id(), error = %e, "Node failed");
                    node_error(pipeline, node, NodeFailure::Behavior(e))
                })?;
                check_outputs(pipeline, node, produced)?
            }
            NodeKind::Pipeline { pipeline: target } => {
                let produced = self
                    .invoke(pipeline, node, target, inputs, context, depth)
                    .await?;
                check_outputs(pipeline, node, produced)?
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.runtime.events.publish(EngineEvent::NodeCompleted {
            context,
            node: node.id().clone(),
            elapsed_ms,
        });
        debug!(pipeline = %pipeline.id(), node = %node.id(), elapsed_ms, "Node complete");
        Ok(produced)
    }

    /// Run a nested pipeline in a child context one level deeper.
    async fn invoke(
        self,
        pipeline: &'a Pipeline,
        node: &'a Node,
        target: &'a str,
        inputs: PortValues,
        parent: ContextId,
        depth: usize,
    ) -> Result<PortValues> {
        let nested_error = |error: GraphkError| {
            node_error(
                pipeline,
                node,
                NodeFailure::Nested {
                    pipeline: target.to_string(),
                    error: Box::new(error),
                },
            )
        };

        if depth + 1 > self.config.max_depth {
            warn!(
                pipeline = %pipeline.id(),
                node = %node.id(),
                max_depth = self.config.max_depth,
                "Nesting depth exceeded"
            );
            return Err(nested_error(GraphkError::DepthExceeded {
                max_depth: self.config.max_depth,
            }));
        }

        let (Some(nested), Some(topo)) = (
            self.runtime.catalog.get(target),
            self.plan.nested.get(target),
        ) else {
            return Err(GraphkError::Structural(Violations(vec![
                Violation::UnknownPipeline {
                    node: node.id().clone(),
                    pipeline: target.to_string(),
                },
            ])));
        };

        match self
            .execute_pipeline(nested, topo, inputs, Some(parent), depth + 1)
            .await
        {
            Ok(outputs) => Ok(outputs),
            Err(GraphkError::Cancelled) => Err(GraphkError::Cancelled),
            Err(error) => Err(nested_error(error)),
        }
    }
}

fn node_error(pipeline: &Pipeline, node: &Node, cause: NodeFailure) -> GraphkError {
    GraphkError::NodeExecution {
        pipeline: pipeline.id().to_string(),
        node: node.id().clone(),
        cause,
    }
}

/// Every declared output must be present. Extra values are dropped.
fn check_outputs(
    pipeline: &Pipeline,
    node: &Node,
    mut produced: PortValues,
) -> Result<PortValues> {
    let missing = node
        .outputs()
        .iter()
        .find(|p| !produced.contains_key(&p.name));
    if let Some(missing) = missing {
        return Err(node_error(
            pipeline,
            node,
            NodeFailure::MissingOutput(missing.name.clone()),
        ));
    }
    produced.retain(|port, _| {
        let declared = node.has_output(port);
        if !declared {
            debug!(
                pipeline = %pipeline.id(),
                node = %node.id(),
                port = %port,
                "Dropping undeclared output"
            );
        }
        declared
    });
    Ok(produced)
}
