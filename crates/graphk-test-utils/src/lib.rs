//! Mock behaviors and pipeline fixtures shared by graphk tests.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::Notify;

use graphk_core::traits::NodeBehavior;
use graphk_core::types::{NodeContext, PortValues, Value};
use graphk_engine::graph::port_gt;
use graphk_engine::{output, FnBehavior, NodeSpec, Pipeline, PipelineCatalog};

/// Shared, ordered log of node activations.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: &str) {
        self.calls.lock().unwrap().push(label.to_string());
    }

    /// Labels in activation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ran(&self, label: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == label)
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == label).count()
    }
}

/// Behavior that records `label` and then applies `f`.
pub fn recording<F>(recorder: &Recorder, label: &str, f: F) -> Arc<dyn NodeBehavior>
where
    F: Fn(&PortValues) -> anyhow::Result<PortValues> + Send + Sync + 'static,
{
    let recorder = recorder.clone();
    let label = label.to_string();
    Arc::new(FnBehavior::new(move |inputs| {
        recorder.record(&label);
        f(inputs)
    }))
}

/// Behavior producing one fixed output.
pub fn constant(port: &str, value: Value) -> Arc<dyn NodeBehavior> {
    let port = port.to_string();
    Arc::new(FnBehavior::new(move |_| Ok(output(port.clone(), value.clone()))))
}

/// Behavior that always fails with `message`.
pub fn failing(message: &str) -> Arc<dyn NodeBehavior> {
    let message = message.to_string();
    Arc::new(FnBehavior::new(move |_| Err(anyhow::anyhow!(message.clone()))))
}

/// Read an integer input port.
pub fn int(inputs: &PortValues, port: &str) -> anyhow::Result<i64> {
    inputs
        .get(port)
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow::anyhow!("port '{}' must hold an integer", port))
}

/// Signals `started`, then waits for the run to be cancelled. Returns its
/// inputs unchanged if it is allowed to finish.
pub struct Blocking {
    started: Arc<Notify>,
}

impl Blocking {
    pub fn new(started: Arc<Notify>) -> Self {
        Self { started }
    }
}

impl NodeBehavior for Blocking {
    fn execute(
        &self,
        inputs: PortValues,
        ctx: NodeContext,
    ) -> BoxFuture<'_, anyhow::Result<PortValues>> {
        Box::pin(async move {
            self.started.notify_one();
            ctx.cancel.cancelled().await;
            Ok(inputs)
        })
    }
}

/// A(x) -> B(branch: x > 0 -> C, default -> D); C.y = 2x, D.y = 0.
/// Entry A, exit {C, D}.
pub fn branch_pipeline(recorder: &Recorder) -> Pipeline {
    let mut p = Pipeline::new("branch");
    p.add_node(
        NodeSpec::plain("a", "identity", recording(recorder, "a", |i| Ok(i.clone())))
            .input("x")
            .output("x"),
    )
    .unwrap();
    p.add_node(NodeSpec::branch("b").input("x")).unwrap();
    p.add_node(
        NodeSpec::plain(
            "c",
            "double",
            recording(recorder, "c", |i| Ok(output("y", int(i, "x")? * 2))),
        )
        .input("x")
        .output("y"),
    )
    .unwrap();
    p.add_node(
        NodeSpec::plain("d", "zero", recording(recorder, "d", |_| Ok(output("y", 0))))
            .input("x")
            .output("y"),
    )
    .unwrap();
    p.add_edge(("a", "x"), ("b", "x"), None).unwrap();
    p.add_edge(("b", "x"), ("c", "x"), Some(port_gt("x", 0.0)))
        .unwrap();
    p.add_default_edge(("b", "x"), ("d", "x")).unwrap();
    p.set_entry(["a"]);
    p.set_exit(["c", "d"]);
    p
}

/// P2: entry `inc` takes v, exit produces w = v + 1.
pub fn increment_pipeline(recorder: &Recorder) -> Pipeline {
    let mut p = Pipeline::new("increment");
    p.add_node(
        NodeSpec::plain(
            "inc",
            "increment",
            recording(recorder, "inc", |i| Ok(output("w", int(i, "v")? + 1))),
        )
        .input("v")
        .output("w"),
    )
    .unwrap();
    p.set_entry(["inc"]);
    p.set_exit(["inc"]);
    p
}

/// P1: source(v) -> N(increment) -> sink(w). Returns the catalog holding P2
/// and P1 itself.
pub fn nested_scenario(recorder: &Recorder) -> (PipelineCatalog, Pipeline) {
    let mut catalog = PipelineCatalog::new();
    catalog.insert(increment_pipeline(recorder)).unwrap();

    let mut p = Pipeline::new("outer");
    p.add_node(
        NodeSpec::plain("source", "identity", recording(recorder, "source", |i| Ok(i.clone())))
            .input("v")
            .output("v"),
    )
    .unwrap();
    p.add_node(NodeSpec::pipeline("n", "increment").input("v").output("w"))
        .unwrap();
    p.add_node(
        NodeSpec::plain("sink", "identity", recording(recorder, "sink", |i| Ok(i.clone())))
            .input("w")
            .output("w"),
    )
    .unwrap();
    p.add_edge(("source", "v"), ("n", "v"), None).unwrap();
    p.add_edge(("n", "w"), ("sink", "w"), None).unwrap();
    p.set_entry(["source"]);
    p.set_exit(["sink"]);
    (catalog, p)
}

/// The nested scenario with N's body inlined into the outer pipeline.
pub fn inlined_scenario(recorder: &Recorder) -> Pipeline {
    let mut p = Pipeline::new("inlined");
    p.add_node(
        NodeSpec::plain("source", "identity", recording(recorder, "source", |i| Ok(i.clone())))
            .input("v")
            .output("v"),
    )
    .unwrap();
    p.add_node(
        NodeSpec::plain(
            "inc",
            "increment",
            recording(recorder, "inc", |i| Ok(output("w", int(i, "v")? + 1))),
        )
        .input("v")
        .output("w"),
    )
    .unwrap();
    p.add_node(
        NodeSpec::plain("sink", "identity", recording(recorder, "sink", |i| Ok(i.clone())))
            .input("w")
            .output("w"),
    )
    .unwrap();
    p.add_edge(("source", "v"), ("inc", "v"), None).unwrap();
    p.add_edge(("inc", "w"), ("sink", "w"), None).unwrap();
    p.set_entry(["source"]);
    p.set_exit(["sink"]);
    p
}

/// head(n) -> step(n + 1) -> check(branch: n < limit -> head, default -> done).
/// Entry head with input n, exit done.
pub fn counter_loop(recorder: &Recorder, limit: i64) -> Pipeline {
    let mut p = Pipeline::new("counter");
    p.add_node(
        NodeSpec::plain("head", "identity", recording(recorder, "head", |i| Ok(i.clone())))
            .input("n")
            .output("n")
            .loop_capable(),
    )
    .unwrap();
    p.add_node(
        NodeSpec::plain(
            "step",
            "increment",
            recording(recorder, "step", |i| Ok(output("n", int(i, "n")? + 1))),
        )
        .input("n")
        .output("n"),
    )
    .unwrap();
    p.add_node(NodeSpec::branch("check").input("n")).unwrap();
    p.add_node(
        NodeSpec::plain("done", "identity", recording(recorder, "done", |i| Ok(i.clone())))
            .input("n")
            .output("n"),
    )
    .unwrap();
    p.add_edge(("head", "n"), ("step", "n"), None).unwrap();
    p.add_edge(("step", "n"), ("check", "n"), None).unwrap();
    p.add_edge(
        ("check", "n"),
        ("head", "n"),
        Some(graphk_engine::graph::port_lt("n", limit as f64)),
    )
    .unwrap();
    p.add_default_edge(("check", "n"), ("done", "n")).unwrap();
    p.set_entry(["head"]);
    p.set_exit(["done"]);
    p
}

/// Inputs map from `(port, value)` pairs.
pub fn inputs<const N: usize>(pairs: [(&str, Value); N]) -> PortValues {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// `{"x": x}`
pub fn x(value: i64) -> PortValues {
    inputs([("x", json!(value))])
}
