use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{ComponentKind, ComponentNode, DiagramCache, DiagramConfig, DiagramModel, Edge, Granularity};
use crate::ai::ModelClient;
use crate::constants::analysis;
use crate::pipeline::records::{RecordEntry, RecordSet};
use crate::types::{AtlasError, EntityKind, NodeId, RelationKind, Result, sha256_hex, truncate_chars};

/// Edges listed in a caption prompt
const CAPTION_EDGE_LIMIT: usize = 60;

#[derive(Debug, Clone)]
pub struct DiagramOutcome {
    pub model: Arc<DiagramModel>,
    pub cache_hit: bool,
    /// Non-fatal problem worth surfacing in run status
    pub warning: Option<String>,
}

pub struct DiagramSynthesizer {
    config: DiagramConfig,
    cache: Arc<DiagramCache>,
    /// Only used for captions
    client: Option<ModelClient>,
}

impl DiagramSynthesizer {
    pub fn new(config: DiagramConfig, cache: Arc<DiagramCache>) -> Self {
        Self {
            config,
            cache,
            client: None,
        }
    }

    pub fn with_client(mut self, client: ModelClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn config(&self) -> &DiagramConfig {
        &self.config
    }

    /// Digest of the settings and every contributing `(path, record)` pair
    pub fn cache_key(&self, records: &RecordSet) -> Result<String> {
        let input = format!("{}\n{}", self.config.fingerprint(), records.fingerprint()?);
        Ok(sha256_hex(input.as_bytes()))
    }

    #[instrument(skip_all, fields(records = records.len(), granularity = ?self.config.granularity))]
    pub async fn synthesize(&self, records: &RecordSet) -> Result<DiagramOutcome> {
        let key = self.cache_key(records)?;
        if let Some(model) = self.cache.get(&key)? {
            debug!(key = %&key[..12], "Diagram cache hit");
            return Ok(DiagramOutcome {
                model,
                cache_hit: true,
                warning: None,
            });
        }

        let mut model = match build_model(&self.config, records) {
            Ok(model) => model,
            Err(err @ AtlasError::InsufficientData { .. }) => {
                warn!(error = %err, "Skipping diagram");
                return Ok(DiagramOutcome {
                    model: Arc::new(DiagramModel::default()),
                    cache_hit: false,
                    warning: Some(err.to_string()),
                });
            }
            Err(err) => return Err(err),
        };

        let mut warning = None;
        if self.config.describe
            && !model.is_empty()
            && let Some(client) = &self.client
        {
            let options = client.options().clone().text();
            match client.generate_with(&caption_prompt(&model), &options).await {
                Ok(generation) => {
                    let caption = truncate_chars(generation.text.trim(), analysis::MAX_SUMMARY_CHARS);
                    if !caption.is_empty() {
                        model.caption = Some(caption.to_string());
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(error = %err, "Diagram caption failed");
                    warning = Some(format!("diagram caption unavailable: {}", err));
                }
            }
        }

        let model = Arc::new(model);
        // A model missing its requested caption is not the settled result for this key
        if warning.is_none() {
            self.cache.put(&key, model.clone())?;
        }
        info!(nodes = model.nodes.len(), edges = model.edges.len(), "Diagram synthesized");

        Ok(DiagramOutcome {
            model,
            cache_hit: false,
            warning,
        })
    }
}

/// Pure derivation of the component graph; no model calls
pub(crate) fn build_model(config: &DiagramConfig, records: &RecordSet) -> Result<DiagramModel> {
    let available = records.entity_count();
    if available < config.min_entities {
        return Err(AtlasError::InsufficientData {
            available,
            required: config.min_entities,
        });
    }

    let mut nodes = BTreeSet::new();
    let mut edges = BTreeSet::new();
    let file_edges = file_edges(config, records);

    match config.granularity {
        Granularity::File => {
            for entry in records.iter() {
                nodes.insert(file_node(&entry.path));
            }
            edges.extend(file_edges);
        }
        Granularity::Entity => {
            for entry in records.iter() {
                nodes.insert(file_node(&entry.path));
                for entity in entry.record.major_entities() {
                    let id = NodeId::entity(&entry.path, &entity.name);
                    nodes.insert(ComponentNode {
                        id: id.clone(),
                        label: entity.name.clone(),
                        kind: ComponentKind::Entity(entity.kind),
                    });
                    edges.insert(Edge {
                        from: NodeId::file(&entry.path),
                        to: id,
                        kind: RelationKind::Owns,
                    });
                }
            }
            edges.extend(entity_edges(config, records));
            edges.extend(file_edges);
        }
        Granularity::Directory => {
            for entry in records.iter() {
                nodes.insert(directory_node(entry.directory()));
            }
            for edge in file_edges {
                let from = directory_id(parent_of(&edge.from, records));
                let to = directory_id(parent_of(&edge.to, records));
                if from != to {
                    edges.insert(Edge { from, to, kind: edge.kind });
                }
            }
        }
        Granularity::Class => {
            for entry in records.iter() {
                for entity in entry.record.entities.iter().filter(|e| e.kind.is_type()) {
                    nodes.insert(ComponentNode {
                        id: NodeId::entity(&entry.path, &entity.name),
                        label: entity.name.clone(),
                        kind: ComponentKind::Entity(entity.kind),
                    });
                }
            }
            edges.extend(hierarchy_edges(config, records));
        }
        Granularity::Endpoint => {
            for entry in records.iter() {
                let served: Vec<_> = entry
                    .record
                    .entities
                    .iter()
                    .filter(|e| e.kind == EntityKind::Endpoint)
                    .collect();
                if served.is_empty() {
                    continue;
                }
                nodes.insert(file_node(&entry.path));
                for endpoint in served {
                    let id = NodeId::entity(&entry.path, &endpoint.name);
                    nodes.insert(ComponentNode {
                        id: id.clone(),
                        label: endpoint.name.clone(),
                        kind: ComponentKind::Entity(EntityKind::Endpoint),
                    });
                    edges.insert(Edge {
                        from: NodeId::file(&entry.path),
                        to: id,
                        kind: RelationKind::Owns,
                    });
                }
            }
        }
    }

    if nodes.is_empty() {
        return Err(AtlasError::InsufficientData { available: 0, required: 1 });
    }

    Ok(DiagramModel {
        nodes: nodes.into_iter().collect(),
        edges: edges.into_iter().collect(),
        caption: None,
    })
}

fn file_node(path: &str) -> ComponentNode {
    ComponentNode {
        id: NodeId::file(path),
        label: path.to_string(),
        kind: ComponentKind::File,
    }
}

fn directory_id(dir: &str) -> NodeId {
    if dir.is_empty() {
        NodeId::root()
    } else {
        NodeId::directory(dir)
    }
}

fn directory_node(dir: &str) -> ComponentNode {
    let label = if dir.is_empty() {
        "(root)".to_string()
    } else {
        format!("{}/", dir)
    };
    ComponentNode {
        id: directory_id(dir),
        label,
        kind: ComponentKind::Directory,
    }
}

fn parent_of<'a>(file_id: &NodeId, records: &'a RecordSet) -> &'a str {
    file_id
        .as_str()
        .strip_prefix("file:")
        .and_then(|path| records.get(path))
        .map_or("", RecordEntry::directory)
}

/// File-to-file edges from resolved dependencies and cross-file relationships
fn file_edges(config: &DiagramConfig, records: &RecordSet) -> BTreeSet<Edge> {
    let mut edges = BTreeSet::new();
    for entry in records.iter() {
        let from = NodeId::file(&entry.path);

        for dep in &entry.record.dependencies {
            if dep.confidence < config.min_confidence {
                continue;
            }
            if let Some(target) = records.resolve_dependency(&entry.path, &dep.target)
                && target != entry.path
            {
                edges.insert(Edge {
                    from: from.clone(),
                    to: NodeId::file(target),
                    kind: dep.kind,
                });
            }
        }

        for rel in &entry.record.relationships {
            if rel.confidence < config.min_confidence || entry.record.declares(&rel.to) {
                continue;
            }
            if let [target] = records.nearest_declarers(&entry.path, &rel.to).as_slice() {
                edges.insert(Edge {
                    from: from.clone(),
                    to: NodeId::file(target),
                    kind: rel.kind,
                });
            }
        }
    }
    edges
}

/// Relationship edges between entity nodes, falling back to the owning file
/// when an endpoint is not a major entity
fn entity_edges(config: &DiagramConfig, records: &RecordSet) -> BTreeSet<Edge> {
    let endpoint = |path: &str, name: &str| -> NodeId {
        let is_major = records
            .get(path)
            .is_some_and(|e| e.record.major_entities().any(|ent| ent.name == name));
        if is_major {
            NodeId::entity(path, name)
        } else {
            NodeId::file(path)
        }
    };

    let mut edges = BTreeSet::new();
    for entry in records.iter() {
        for rel in &entry.record.relationships {
            if rel.confidence < config.min_confidence {
                continue;
            }
            let from = endpoint(&entry.path, &rel.from);
            let to = if entry.record.declares(&rel.to) {
                endpoint(&entry.path, &rel.to)
            } else {
                match records.nearest_declarers(&entry.path, &rel.to).as_slice() {
                    [target] => endpoint(target, &rel.to),
                    _ => continue,
                }
            };
            if from != to {
                edges.insert(Edge { from, to, kind: rel.kind });
            }
        }
    }
    edges
}

/// `extends` / `implements` edges between type declarations. A base that is
/// not declared in the record set, or is declared ambiguously, is left out.
fn hierarchy_edges(config: &DiagramConfig, records: &RecordSet) -> BTreeSet<Edge> {
    let type_in = |path: &str, name: &str| -> Option<NodeId> {
        records
            .get(path)?
            .record
            .entities
            .iter()
            .any(|e| e.name == name && e.kind.is_type())
            .then(|| NodeId::entity(path, name))
    };

    let mut edges = BTreeSet::new();
    for entry in records.iter() {
        for rel in &entry.record.relationships {
            if !matches!(rel.kind, RelationKind::Extends | RelationKind::Implements)
                || rel.confidence < config.min_confidence
            {
                continue;
            }
            let Some(from) = type_in(&entry.path, &rel.from) else {
                continue;
            };
            let to = if entry.record.declares(&rel.to) {
                type_in(&entry.path, &rel.to)
            } else {
                match records.nearest_declarers(&entry.path, &rel.to).as_slice() {
                    [target] => type_in(target, &rel.to),
                    _ => None,
                }
            };
            if let Some(to) = to
                && from != to
            {
                edges.insert(Edge { from, to, kind: rel.kind });
            }
        }
    }
    edges
}

fn caption_prompt(model: &DiagramModel) -> String {
    let labels: BTreeMap<&NodeId, &str> = model.nodes.iter().map(|n| (&n.id, n.label.as_str())).collect();
    let label = |id: &NodeId| labels.get(id).copied().unwrap_or(id.as_str()).to_string();

    let mut prompt = String::from(
        "<ROLE>\nYou describe software architecture diagrams for engineers.\n</ROLE>\n\n<COMPONENTS>\n",
    );
    for node in &model.nodes {
        let _ = writeln!(prompt, "- {} ({})", node.label, node.kind.as_str());
    }
    prompt.push_str("</COMPONENTS>\n\n<RELATIONSHIPS>\n");
    for edge in model.edges.iter().take(CAPTION_EDGE_LIMIT) {
        let _ = writeln!(prompt, "- {} {} {}", label(&edge.from), edge.kind, label(&edge.to));
    }
    if model.edges.len() > CAPTION_EDGE_LIMIT {
        let _ = writeln!(prompt, "- ... {} more", model.edges.len() - CAPTION_EDGE_LIMIT);
    }
    prompt.push_str(
        "</RELATIONSHIPS>\n\nWrite one short paragraph describing how these components fit together. \
         Mention only components listed above. Plain text, no markdown.\n",
    );
    prompt
}
