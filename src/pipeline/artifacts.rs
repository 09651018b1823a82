//! Published artifacts of the latest successful run.
//!
//! The orchestrator swaps in a complete set at the end of a run; readers such
//! as the query engine hold an `Arc` to whatever set was current when they
//! started, so a run in progress never exposes half-built output.

use std::sync::{Arc, RwLock};

use super::diagram::DiagramModel;
use super::documentation::DocumentationTree;
use super::records::RecordSet;
use crate::types::NodeId;

#[derive(Debug, Clone)]
pub struct Artifacts {
    pub snapshot_id: String,
    pub documentation: DocumentationTree,
    pub diagram: Arc<DiagramModel>,
    pub records: Arc<RecordSet>,
}

impl Artifacts {
    /// Node exists in the documentation tree or the diagram
    pub fn contains(&self, id: &NodeId) -> bool {
        self.documentation.contains(id) || self.diagram.contains(id)
    }
}

#[derive(Debug, Default)]
pub struct ArtifactHub {
    current: RwLock<Option<Arc<Artifacts>>>,
}

impl ArtifactHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, artifacts: Artifacts) -> Arc<Artifacts> {
        let artifacts = Arc::new(artifacts);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(artifacts.clone());
        artifacts
    }

    pub fn current(&self) -> Option<Arc<Artifacts>> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
