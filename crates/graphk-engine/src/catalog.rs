use std::collections::BTreeMap;
use std::sync::Arc;

use graphk_core::error::{GraphkError, Result};

use crate::graph::Pipeline;

/// Pipelines available to nested-pipeline nodes, keyed by pipeline id.
///
/// A pipeline node holds only the id of the pipeline it invokes, so a pipeline
/// in the catalog may refer to itself. The runtime bounds such recursion with
/// `max_depth`.
#[derive(Debug, Clone, Default)]
pub struct PipelineCatalog {
    pipelines: BTreeMap<String, Arc<Pipeline>>,
}

impl PipelineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline under its own id.
    pub fn insert(&mut self, pipeline: Pipeline) -> Result<()> {
        if self.pipelines.contains_key(pipeline.id()) {
            return Err(GraphkError::DuplicateId {
                scope: "pipeline".into(),
                id: pipeline.id().to_string(),
            });
        }
        self.pipelines
            .insert(pipeline.id().to_string(), Arc::new(pipeline));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pipelines.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut catalog = PipelineCatalog::new();
        catalog.insert(Pipeline::new("inc")).unwrap();
        catalog.insert(Pipeline::new("add")).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.ids(), vec!["add", "inc"]);
        assert_eq!(catalog.get("inc").map(|p| p.id()), Some("inc"));
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_pipeline_id_rejected() {
        let mut catalog = PipelineCatalog::new();
        catalog.insert(Pipeline::new("inc")).unwrap();
        let err = catalog.insert(Pipeline::new("inc")).unwrap_err();
        assert!(matches!(
            err,
            GraphkError::DuplicateId { ref scope, ref id } if scope == "pipeline" && id == "inc"
        ));
    }
}
