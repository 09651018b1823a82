//! Diagram Synthesizer
//!
//! Derives a typed component graph from the record set:
//! - Nodes: one per file, per major entity, per directory, per type (class
//!   hierarchy view) or per HTTP endpoint grouped under its file
//! - Edges: resolved dependencies and cross-file relationships at or above
//!   the confidence threshold; anything below is omitted, never guessed
//!
//! Models are cached by the fingerprint of the contributing records, so a
//! repeat synthesis over an unchanged set returns the stored model without
//! calling the model transport.

mod cache;
mod render;
mod synthesizer;

pub use cache::DiagramCache;
pub use render::{render, render_dot, render_mermaid};
pub use synthesizer::{DiagramOutcome, DiagramSynthesizer};

use serde::{Deserialize, Serialize};

use crate::constants::diagram;
use crate::types::{EntityKind, NodeId, RelationKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    File,
    /// Major entities plus the files that own them
    Entity,
    /// Architecture overview by parent directory
    Directory,
    /// Type declarations linked by `extends` and `implements`
    Class,
    /// HTTP endpoints grouped under the file that serves them
    Endpoint,
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "entity" => Ok(Self::Entity),
            "directory" | "dir" => Ok(Self::Directory),
            "class" | "classes" => Ok(Self::Class),
            "endpoint" | "endpoints" | "api" => Ok(Self::Endpoint),
            _ => Err(format!(
                "Unknown granularity: {}. Valid values: file, entity, directory, class, endpoint",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramFormat {
    #[default]
    Mermaid,
    Dot,
}

impl DiagramFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mermaid => "mmd",
            Self::Dot => "dot",
        }
    }
}

impl std::str::FromStr for DiagramFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mermaid" | "mmd" => Ok(Self::Mermaid),
            "dot" | "graphviz" => Ok(Self::Dot),
            _ => Err(format!("Unknown diagram format: {}. Valid values: mermaid, dot", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagramConfig {
    pub granularity: Granularity,
    /// Edges below this confidence are omitted
    pub min_confidence: f32,
    /// Fewer entities than this yields an empty model plus a warning
    pub min_entities: usize,
    /// Rendering cap; the model itself is never truncated
    pub max_nodes: usize,
    /// Ask the model for a one-paragraph caption
    pub describe: bool,
    pub format: DiagramFormat,
}

impl Default for DiagramConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::File,
            min_confidence: diagram::DEFAULT_MIN_CONFIDENCE,
            min_entities: diagram::DEFAULT_MIN_ENTITIES,
            max_nodes: diagram::DEFAULT_MAX_NODES,
            describe: false,
            format: DiagramFormat::Mermaid,
        }
    }
}

impl DiagramConfig {
    /// Settings that change the synthesized model, part of its cache key
    pub(crate) fn fingerprint(&self) -> String {
        format!(
            "granularity={:?};min_confidence={:.4};min_entities={};describe={}",
            self.granularity, self.min_confidence, self.min_entities, self.describe
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    File,
    Directory,
    Entity(EntityKind),
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Entity(kind) => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentNode {
    pub id: NodeId,
    pub label: String,
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: RelationKind,
}

/// Nodes and edges sorted and free of duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramModel {
    pub nodes: Vec<ComponentNode>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl DiagramModel {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.binary_search_by(|n| n.id.cmp(id)).is_ok()
    }

    pub fn edges_from<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.from == id)
    }

    pub fn to_json(&self) -> crate::types::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
