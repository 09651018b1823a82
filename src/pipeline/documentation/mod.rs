//! Documentation Assembler
//!
//! Builds the documentation tree from the current record set:
//! root → directories → files, children in name order, then links every
//! mentioned entity to the file that declares it.
//!
//! Cross-references are a name-matching approximation, not semantic linking:
//! a name declared in several files links to the declaration nearest in path
//! to the referencing file, and equidistant declarations are listed as
//! ambiguous candidates rather than merged.

mod assembler;
mod render;

pub use assembler::DocumentationAssembler;
pub use render::render_markdown;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocNodeKind {
    Root,
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    Linked { target: NodeId },
    Ambiguous { candidates: Vec<NodeId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    /// Entity name as mentioned
    pub name: String,
    #[serde(flatten)]
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentationNode {
    pub id: NodeId,
    pub kind: DocNodeKind,
    pub title: String,
    pub body: String,
    pub children: Vec<DocumentationNode>,
    /// Source files this node summarizes
    pub sources: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<CrossReference>,
    /// Files this file's imports resolve to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl DocumentationNode {
    /// Depth-first, pre-order
    pub fn walk(&self) -> Vec<&DocumentationNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    pub fn find(&self, id: &NodeId) -> Option<&DocumentationNode> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Assembled tree plus its identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentationTree {
    pub root: DocumentationNode,
}

impl DocumentationTree {
    pub fn contains(&self, id: &NodeId) -> bool {
        self.root.find(id).is_some()
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.root.walk().into_iter().map(|n| n.id.clone()).collect()
    }

    pub fn to_json(&self) -> crate::types::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
