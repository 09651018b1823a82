use super::{DocNodeKind, DocumentationNode, DocumentationTree, Resolution};

/// Nested Markdown, one heading level per tree depth (capped at 6)
pub fn render_markdown(tree: &DocumentationTree) -> String {
    let mut out = String::new();
    render_node(&tree.root, 1, &mut out);
    out
}

fn render_node(node: &DocumentationNode, depth: usize, out: &mut String) {
    let hashes = "#".repeat(depth.min(6));
    let marker = if node.degraded { " (degraded)" } else { "" };
    let title = match node.kind {
        DocNodeKind::File => format!("`{}`", node.title),
        _ => node.title.clone(),
    };
    out.push_str(&format!("{} {}{}\n\n", hashes, title, marker));

    if !node.body.is_empty() {
        out.push_str(node.body.trim_end());
        out.push_str("\n\n");
    }

    if !node.depends_on.is_empty() {
        out.push_str("**Depends on:**\n\n");
        for dep in &node.depends_on {
            out.push_str(&format!("- `{}`\n", node_path(dep.as_str())));
        }
        out.push('\n');
    }

    if !node.references.is_empty() {
        out.push_str("**References:**\n\n");
        for reference in &node.references {
            match &reference.resolution {
                Resolution::Linked { target } => out.push_str(&format!(
                    "- `{}` → `{}`\n",
                    reference.name,
                    node_path(target.as_str())
                )),
                Resolution::Ambiguous { candidates } => {
                    let listed: Vec<String> = candidates
                        .iter()
                        .map(|c| format!("`{}`", node_path(c.as_str())))
                        .collect();
                    out.push_str(&format!(
                        "- `{}` (ambiguous): {}\n",
                        reference.name,
                        listed.join(", ")
                    ));
                }
            }
        }
        out.push('\n');
    }

    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}

fn node_path(id: &str) -> &str {
    id.split_once(':').map_or(id, |(_, path)| path)
}
