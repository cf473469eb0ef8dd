use std::collections::HashMap;
use std::sync::Arc;

use graphk_core::error::{GraphkError, Result};
use graphk_core::traits::NodeBehavior;
use graphk_core::types::NodeId;

use crate::graph::NodeSpec;

/// Registry of node behaviors, keyed by kind id.
pub struct NodeRegistry {
    behaviors: HashMap<String, Arc<dyn NodeBehavior>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
        }
    }

    /// Register a behavior under `kind`.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        behavior: impl NodeBehavior,
    ) -> Result<()> {
        self.register_arc(kind, Arc::new(behavior))
    }

    /// Register an already shared behavior under `kind`.
    pub fn register_arc(
        &mut self,
        kind: impl Into<String>,
        behavior: Arc<dyn NodeBehavior>,
    ) -> Result<()> {
        let kind = kind.into();
        if self.behaviors.contains_key(&kind) {
            return Err(GraphkError::DuplicateRegistration(kind));
        }
        self.behaviors.insert(kind, behavior);
        Ok(())
    }

    /// Get a behavior by kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeBehavior>> {
        self.behaviors.get(kind).cloned()
    }

    /// List registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.behaviors.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Start a plain node spec whose behavior is resolved now.
    pub fn node(&self, id: impl Into<NodeId>, kind: &str) -> Result<NodeSpec> {
        let behavior = self
            .get(kind)
            .ok_or_else(|| GraphkError::UnknownKind(kind.to_string()))?;
        Ok(NodeSpec::plain(id, kind, behavior))
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
