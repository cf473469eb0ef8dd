//! Pipeline execution.
//!
//! The `Runtime` validates a pipeline together with every catalog pipeline it
//! can reach, then walks it frontier by frontier. Each pipeline invocation runs
//! in its own execution context; nested pipeline nodes recurse with a child
//! context one level deeper.

mod executor;
pub(crate) mod frontier;
mod handle;

pub use executor::{Execution, Runtime};
pub use handle::ExecutionHandle;
