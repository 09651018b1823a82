//! Textual graph renderers
//!
//! ## Formats
//!
//! - Mermaid `graph TD`, with node ids sanitized to `[A-Za-z0-9_]`
//! - Graphviz DOT, with quoted ids
//!
//! Both apply the node cap: when a model has more nodes than allowed, the
//! best connected nodes are kept and edges to dropped nodes are removed.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write;

use tracing::debug;

use super::{ComponentKind, ComponentNode, DiagramFormat, DiagramModel, Edge};
use crate::types::NodeId;

pub fn render(model: &DiagramModel, format: DiagramFormat, max_nodes: usize) -> String {
    match format {
        DiagramFormat::Mermaid => render_mermaid(model, max_nodes),
        DiagramFormat::Dot => render_dot(model, max_nodes),
    }
}

pub fn render_mermaid(model: &DiagramModel, max_nodes: usize) -> String {
    let (nodes, edges) = capped(model, max_nodes);
    let ids = mermaid_ids(&nodes);

    let mut out = String::from("graph TD\n");
    if let Some(caption) = &model.caption {
        let _ = writeln!(out, "    %% {}", single_line(caption));
    }
    for node in &nodes {
        let label = escape_mermaid(&node.label);
        let id = &ids[&node.id];
        let _ = match node.kind {
            ComponentKind::File => writeln!(out, "    {}[\"{}\"]", id, label),
            ComponentKind::Directory => writeln!(out, "    {}[[\"{}\"]]", id, label),
            ComponentKind::Entity(_) => writeln!(out, "    {}(\"{}\")", id, label),
        };
    }
    for edge in &edges {
        let _ = writeln!(out, "    {} -->|{}| {}", ids[&edge.from], edge.kind, ids[&edge.to]);
    }
    out
}

pub fn render_dot(model: &DiagramModel, max_nodes: usize) -> String {
    let (nodes, edges) = capped(model, max_nodes);

    let mut out = String::from("digraph repository {\n    rankdir=LR;\n    node [fontname=\"Helvetica\"];\n");
    if let Some(caption) = &model.caption {
        let _ = writeln!(out, "    label=\"{}\";", escape_dot(&single_line(caption)));
    }
    for node in &nodes {
        let shape = match node.kind {
            ComponentKind::File => "box",
            ComponentKind::Directory => "folder",
            ComponentKind::Entity(_) => "ellipse",
        };
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\", shape={}];",
            escape_dot(node.id.as_str()),
            escape_dot(&node.label),
            shape
        );
    }
    for edge in &edges {
        let _ = writeln!(
            out,
            "    \"{}\" -> \"{}\" [label=\"{}\"];",
            escape_dot(edge.from.as_str()),
            escape_dot(edge.to.as_str()),
            edge.kind
        );
    }
    out.push_str("}\n");
    out
}

/// Nodes and edges that survive the cap, still in model order
fn capped(model: &DiagramModel, max_nodes: usize) -> (Vec<&ComponentNode>, Vec<&Edge>) {
    if model.nodes.len() <= max_nodes {
        return (model.nodes.iter().collect(), model.edges.iter().collect());
    }

    let mut degree: BTreeMap<&NodeId, usize> = BTreeMap::new();
    for edge in &model.edges {
        *degree.entry(&edge.from).or_default() += 1;
        *degree.entry(&edge.to).or_default() += 1;
    }
    let mut ranked: Vec<&ComponentNode> = model.nodes.iter().collect();
    ranked.sort_by(|a, b| {
        let da = degree.get(&a.id).copied().unwrap_or(0);
        let db = degree.get(&b.id).copied().unwrap_or(0);
        db.cmp(&da).then_with(|| a.id.cmp(&b.id))
    });
    let kept: BTreeSet<&NodeId> = ranked.iter().take(max_nodes).map(|n| &n.id).collect();
    debug!(total = model.nodes.len(), kept = kept.len(), "Diagram capped for rendering");

    let nodes = model.nodes.iter().filter(|n| kept.contains(&n.id)).collect();
    let edges = model
        .edges
        .iter()
        .filter(|e| kept.contains(&e.from) && kept.contains(&e.to))
        .collect();
    (nodes, edges)
}

/// Unique Mermaid-safe identifiers; colliding sanitized forms get a suffix
fn mermaid_ids(nodes: &[&ComponentNode]) -> BTreeMap<NodeId, String> {
    let mut used = HashSet::new();
    let mut ids = BTreeMap::new();
    for node in nodes {
        let base = sanitize_id(node.id.as_str());
        let mut id = base.clone();
        let mut n = 2;
        while !used.insert(id.clone()) {
            id = format!("{}_{}", base, n);
            n += 1;
        }
        ids.insert(node.id.clone(), id);
    }
    ids
}

fn sanitize_id(raw: &str) -> String {
    let mut id: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    // Mermaid ids must not start with a digit
    if id.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        id.insert(0, 'n');
    }
    id
}

fn escape_mermaid(label: &str) -> String {
    label
        .replace('"', "#quot;")
        .replace('<', "#lt;")
        .replace('>', "#gt;")
}

fn escape_dot(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelationKind;

    fn node(path: &str) -> ComponentNode {
        ComponentNode {
            id: NodeId::file(path),
            label: path.to_string(),
            kind: ComponentKind::File,
        }
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge {
            from: NodeId::file(from),
            to: NodeId::file(to),
            kind: RelationKind::Imports,
        }
    }

    fn model() -> DiagramModel {
        DiagramModel {
            nodes: vec![node("a.py"), node("b.py"), node("c.py")],
            edges: vec![edge("a.py", "b.py")],
            caption: None,
        }
    }

    #[test]
    fn test_mermaid_output() {
        let out = render_mermaid(&model(), 100);
        assert_eq!(
            out,
            "graph TD\n    file_a_py[\"a.py\"]\n    file_b_py[\"b.py\"]\n    file_c_py[\"c.py\"]\n    file_a_py -->|imports| file_b_py\n"
        );
    }

    #[test]
    fn test_mermaid_id_collisions_get_suffix() {
        let m = DiagramModel {
            nodes: vec![node("a-b.py"), node("a_b.py")],
            edges: vec![edge("a-b.py", "a_b.py")],
            caption: None,
        };
        let out = render_mermaid(&m, 100);
        assert!(out.contains("file_a_b_py[\"a-b.py\"]"));
        assert!(out.contains("file_a_b_py_2[\"a_b.py\"]"));
        assert!(out.contains("file_a_b_py -->|imports| file_a_b_py_2"));
    }

    #[test]
    fn test_mermaid_escapes_labels() {
        let m = DiagramModel {
            nodes: vec![ComponentNode {
                id: NodeId::entity("a.rs", "Vec<T>"),
                label: "Vec<\"T\">".into(),
                kind: ComponentKind::Entity(crate::types::EntityKind::Struct),
            }],
            edges: vec![],
            caption: Some("two\nlines".into()),
        };
        let out = render_mermaid(&m, 100);
        assert!(out.contains("%% two lines"));
        assert!(out.contains("(\"Vec#lt;#quot;T#quot;#gt;\")"));
    }

    #[test]
    fn test_cap_keeps_best_connected_nodes() {
        let m = DiagramModel {
            nodes: vec![node("a.py"), node("b.py"), node("c.py"), node("d.py")],
            edges: vec![edge("a.py", "b.py"), edge("c.py", "b.py"), edge("d.py", "c.py")],
            caption: None,
        };
        let out = render_mermaid(&m, 2);
        // b and c have degree 2, a and d degree 1
        assert!(out.contains("file_b_py"));
        assert!(out.contains("file_c_py"));
        assert!(!out.contains("file_a_py"));
        assert!(!out.contains("file_d_py"));
        assert!(out.contains("file_c_py -->|imports| file_b_py"));
        assert_eq!(out.lines().filter(|l| l.contains("-->")).count(), 1);
    }

    #[test]
    fn test_dot_output() {
        let mut m = model();
        m.caption = Some("Say \"hi\"".into());
        let out = render_dot(&m, 100);
        assert!(out.starts_with("digraph repository {\n"));
        assert!(out.contains("label=\"Say \\\"hi\\\"\";"));
        assert!(out.contains("\"file:a.py\" [label=\"a.py\", shape=box];"));
        assert!(out.contains("\"file:a.py\" -> \"file:b.py\" [label=\"imports\"];"));
        assert!(out.ends_with("}\n"));
    }

    #[test]
    fn test_sanitize_leading_digit() {
        assert_eq!(sanitize_id("1abc"), "n1abc");
        assert_eq!(sanitize_id(""), "n");
        assert_eq!(sanitize_id("dir:src/app"), "dir_src_app");
    }
}
