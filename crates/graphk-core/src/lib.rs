pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{AppConfig, InFlightPolicy, RunConfig};
pub use error::{GraphkError, NodeFailure, Result, Violation, Violations};
pub use event::EventBus;
pub use traits::NodeBehavior;
pub use types::*;
