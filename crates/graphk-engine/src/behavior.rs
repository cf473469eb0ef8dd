use futures::future::BoxFuture;

use graphk_core::traits::NodeBehavior;
use graphk_core::types::{NodeContext, PortValues, Value};

/// Adapts a synchronous closure into a [`NodeBehavior`].
pub struct FnBehavior<F> {
    f: F,
    description: Value,
}

impl<F> FnBehavior<F>
where
    F: Fn(&PortValues) -> anyhow::Result<PortValues> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            description: Value::Object(Default::default()),
        }
    }

    /// Attach metadata returned by `describe`.
    pub fn with_description(mut self, description: Value) -> Self {
        self.description = description;
        self
    }
}

impl<F> NodeBehavior for FnBehavior<F>
where
    F: Fn(&PortValues) -> anyhow::Result<PortValues> + Send + Sync + 'static,
{
    fn execute(
        &self,
        inputs: PortValues,
        _ctx: NodeContext,
    ) -> BoxFuture<'_, anyhow::Result<PortValues>> {
        let result = (self.f)(&inputs);
        Box::pin(async move { result })
    }

    fn describe(&self) -> Value {
        self.description.clone()
    }
}

/// Build a single-entry output map.
pub fn output(port: impl Into<String>, value: impl Into<Value>) -> PortValues {
    let mut out = PortValues::new();
    out.insert(port.into(), value.into());
    out
}
