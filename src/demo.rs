//! Bundled demo pipelines.

use graphk_core::error::Result;
use graphk_core::types::PortValues;
use graphk_engine::graph::Gate;
use graphk_engine::{output, FnBehavior, NodeRegistry, NodeSpec, Pipeline, PipelineCatalog, Runtime};

fn int(inputs: &PortValues, port: &str) -> anyhow::Result<i64> {
    inputs
        .get(port)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| anyhow::anyhow!("port '{}' must hold an integer", port))
}

/// Behaviors used by the demos.
fn registry() -> Result<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    registry.register(
        "identity",
        FnBehavior::new(|inputs: &PortValues| Ok(inputs.clone()))
            .with_description(serde_json::json!({"op": "identity"})),
    )?;
    registry.register(
        "double",
        FnBehavior::new(|inputs: &PortValues| Ok(output("y", int(inputs, "x")? * 2)))
            .with_description(serde_json::json!({"op": "y = 2x"})),
    )?;
    registry.register(
        "zero",
        FnBehavior::new(|_: &PortValues| Ok(output("y", 0)))
            .with_description(serde_json::json!({"op": "y = 0"})),
    )?;
    registry.register(
        "increment",
        FnBehavior::new(|inputs: &PortValues| Ok(output("w", int(inputs, "v")? + 1)))
            .with_description(serde_json::json!({"op": "w = v + 1"})),
    )?;
    Ok(registry)
}

/// A(x) -> B, branching on `x > 0` to C (y = 2x), else D (y = 0).
pub fn branch() -> Result<(Runtime, Pipeline)> {
    let registry = registry()?;
    let mut p = Pipeline::new("branch");
    p.add_node(registry.node("a", "identity")?.input("x").output("x"))?;
    p.add_node(NodeSpec::branch("b").input("x"))?;
    p.add_node(registry.node("c", "double")?.input("x").output("y"))?;
    p.add_node(registry.node("d", "zero")?.input("x").output("y"))?;
    p.add_edge(("a", "x"), ("b", "x"), None)?;
    p.add_edge(("b", "x"), ("c", "x"), Some(Gate::parse("x > 0")?))?;
    p.add_default_edge(("b", "x"), ("d", "x"))?;
    p.set_entry(["a"]);
    p.set_exit(["c", "d"]);
    Ok((Runtime::new(PipelineCatalog::new()), p))
}

/// `outer` feeds v through the nested `increment` pipeline (w = v + 1).
pub fn nested() -> Result<(Runtime, Pipeline)> {
    let registry = registry()?;

    let mut inner = Pipeline::new("increment");
    inner.add_node(registry.node("inc", "increment")?.input("v").output("w"))?;
    inner.set_entry(["inc"]);
    inner.set_exit(["inc"]);
    let mut catalog = PipelineCatalog::new();
    catalog.insert(inner)?;

    let mut p = Pipeline::new("outer");
    p.add_node(registry.node("source", "identity")?.input("v").output("v"))?;
    p.add_node(NodeSpec::pipeline("n", "increment").input("v").output("w"))?;
    p.add_node(registry.node("sink", "identity")?.input("w").output("w"))?;
    p.add_edge(("source", "v"), ("n", "v"), None)?;
    p.add_edge(("n", "w"), ("sink", "w"), None)?;
    p.set_entry(["source"]);
    p.set_exit(["sink"]);
    Ok((Runtime::new(catalog), p))
}
