pub mod behavior;
pub mod catalog;
pub mod context;
pub mod graph;
pub mod registry;
pub mod runtime;

pub use behavior::{output, FnBehavior};
pub use catalog::PipelineCatalog;
pub use context::{ContextSummary, TraceEntry};
pub use graph::{Edge, Endpoint, Gate, GateStrategy, Node, NodeKind, NodeSpec, Pipeline};
pub use registry::NodeRegistry;
pub use runtime::{Execution, ExecutionHandle, Runtime};
