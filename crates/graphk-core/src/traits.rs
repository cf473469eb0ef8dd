use futures::future::BoxFuture;

use crate::types::{NodeContext, PortValues};

/// Node behavior: the computation behind a plain node.
///
/// Supplied by the embedding system and invoked by the runtime exactly once
/// per activation, with every required input bound. The returned map must
/// contain one value per declared output port. Failures are reported with any
/// `anyhow` error; the runtime wraps them with the failing node's identity.
pub trait NodeBehavior: Send + Sync + 'static {
    /// Run one activation.
    fn execute(
        &self,
        inputs: PortValues,
        ctx: NodeContext,
    ) -> BoxFuture<'_, anyhow::Result<PortValues>>;

    /// Health check. Defaults to healthy.
    fn ping(&self) -> bool {
        true
    }

    /// Metadata reported by pipeline descriptions.
    fn describe(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }
}
