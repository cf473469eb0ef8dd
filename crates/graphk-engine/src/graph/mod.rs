//! Pipeline graph model.
//!
//! A pipeline is a directed graph of `Node`s connected by `Edge`s between named
//! ports. Branch nodes choose one outgoing edge per activation through `Gate`
//! predicates. Pipeline nodes invoke another pipeline from the catalog.
//!
//! `validate` reports every structural problem at once; the runtime refuses to
//! start a pipeline with any.

pub mod edge;
pub mod gate;
pub mod node;
pub mod pipeline;
pub(crate) mod topology;
pub mod validate;

pub use edge::{Edge, Endpoint};
pub use gate::{port_eq, port_gt, port_lt, port_truthy, Checker, Gate, GateStrategy};
pub use node::{Node, NodeKind, NodeSpec};
pub use pipeline::Pipeline;
pub use validate::{validate, validate_reachable};
