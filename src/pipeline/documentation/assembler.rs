use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use super::{CrossReference, DocNodeKind, DocumentationNode, DocumentationTree, Resolution};
use crate::pipeline::records::{RecordEntry, RecordSet};
use crate::types::NodeId;
use crate::types::snapshot::parent_dir;

pub struct DocumentationAssembler {
    title: String,
}

impl Default for DocumentationAssembler {
    fn default() -> Self {
        Self::new("Repository")
    }
}

#[derive(Default)]
struct DirSlot<'a> {
    subdirs: BTreeSet<String>,
    files: Vec<&'a RecordEntry>,
}

impl DocumentationAssembler {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    /// Pure function of `records`: the same set always yields the same tree
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn assemble(&self, records: &RecordSet) -> DocumentationTree {
        let mut dirs: BTreeMap<String, DirSlot> = BTreeMap::new();
        dirs.entry(String::new()).or_default();

        for entry in records.iter() {
            let mut dir = entry.directory().to_string();
            dirs.entry(dir.clone()).or_default().files.push(entry);
            while !dir.is_empty() {
                let parent = parent_dir(&dir).to_string();
                dirs.entry(parent.clone()).or_default().subdirs.insert(dir);
                dir = parent;
            }
        }

        let mut root = self.build_dir("", &dirs, records);
        root.id = NodeId::root();
        root.kind = DocNodeKind::Root;
        root.title = self.title.clone();
        root.body = root_body(records, dirs.len() - 1);

        let linked = root
            .walk()
            .iter()
            .map(|n| n.references.len())
            .sum::<usize>();
        debug!(references = linked, "Documentation assembled");

        DocumentationTree { root }
    }

    fn build_dir(
        &self,
        dir: &str,
        dirs: &BTreeMap<String, DirSlot>,
        records: &RecordSet,
    ) -> DocumentationNode {
        let Some(slot) = dirs.get(dir) else {
            return empty_dir(dir);
        };

        let mut children: Vec<DocumentationNode> = slot
            .subdirs
            .iter()
            .map(|sub| self.build_dir(sub, dirs, records))
            .collect();
        children.extend(slot.files.iter().map(|entry| file_node(entry, records)));

        let sources = children
            .iter()
            .flat_map(|c| c.sources.iter().cloned())
            .collect();

        let mut body = format!(
            "Files: {}. Subdirectories: {}.\n",
            slot.files.len(),
            slot.subdirs.len()
        );
        for entry in &slot.files {
            let first_line = entry.record.summary.lines().next().unwrap_or_default();
            body.push_str(&format!("\n- `{}`: {}", file_name(&entry.path), first_line));
        }

        DocumentationNode {
            id: NodeId::directory(dir),
            kind: DocNodeKind::Directory,
            title: format!("{}/", dir),
            body,
            children,
            sources,
            references: Vec::new(),
            depends_on: Vec::new(),
            degraded: false,
        }
    }
}

fn empty_dir(dir: &str) -> DocumentationNode {
    DocumentationNode {
        id: NodeId::directory(dir),
        kind: DocNodeKind::Directory,
        title: format!("{}/", dir),
        body: String::new(),
        children: Vec::new(),
        sources: BTreeSet::new(),
        references: Vec::new(),
        depends_on: Vec::new(),
        degraded: false,
    }
}

fn root_body(records: &RecordSet, directories: usize) -> String {
    let degraded = records.degraded().count();
    let mut body = format!(
        "Files: {}. Directories: {}.",
        records.len(),
        directories
    );
    if degraded > 0 {
        body.push_str(&format!(" Degraded: {}.", degraded));
    }
    body
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn file_node(entry: &RecordEntry, records: &RecordSet) -> DocumentationNode {
    let record = &entry.record;
    let mut body = record.summary.clone();

    if let Some(reason) = &record.degraded_reason {
        body.push_str(&format!("\n\nReason: {}", reason));
    }
    if !record.responsibilities.is_empty() {
        body.push_str("\n\nResponsibilities:\n");
        for r in &record.responsibilities {
            body.push_str(&format!("\n- {}", r));
        }
    }
    if !record.entities.is_empty() {
        body.push_str("\n\nEntities:\n");
        for e in &record.entities {
            if e.signature.is_empty() {
                body.push_str(&format!("\n- `{}` ({})", e.name, e.kind.as_str()));
            } else {
                body.push_str(&format!(
                    "\n- `{}` ({}): `{}`",
                    e.name,
                    e.kind.as_str(),
                    e.signature
                ));
            }
        }
    }

    DocumentationNode {
        id: NodeId::file(&entry.path),
        kind: DocNodeKind::File,
        title: entry.path.clone(),
        body,
        children: Vec::new(),
        sources: BTreeSet::from([entry.path.clone()]),
        references: cross_references(entry, records),
        depends_on: dependencies(entry, records),
        degraded: record.is_degraded(),
    }
}

fn cross_references(entry: &RecordEntry, records: &RecordSet) -> Vec<CrossReference> {
    let record = &entry.record;
    let names: BTreeSet<&str> = record
        .mentions
        .iter()
        .map(String::as_str)
        .chain(record.relationships.iter().map(|r| r.to.as_str()))
        .filter(|name| !record.declares(name))
        .collect();

    names
        .into_iter()
        .filter_map(|name| {
            let resolution = match records.nearest_declarers(&entry.path, name).as_slice() {
                [] => return None,
                [only] => Resolution::Linked {
                    target: NodeId::file(only),
                },
                many => Resolution::Ambiguous {
                    candidates: many.iter().map(|p| NodeId::file(p)).collect(),
                },
            };
            Some(CrossReference {
                name: name.to_string(),
                resolution,
            })
        })
        .collect()
}

fn dependencies(entry: &RecordEntry, records: &RecordSet) -> Vec<NodeId> {
    entry
        .record
        .dependencies
        .iter()
        .filter_map(|d| records.resolve_dependency(&entry.path, &d.target))
        .map(NodeId::file)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::pipeline::documentation::render_markdown;
    use crate::types::{
        AnalysisRecord, Dependency, Entity, EntityKind, FileEntry, RecordStatus,
        RelationKind,
    };

    fn record(path: &str, declares: &[&str], mentions: &[&str], deps: &[&str]) -> (FileEntry, Arc<AnalysisRecord>) {
        let file = FileEntry::new(path, format!("# {}", path));
        let record = AnalysisRecord {
            content_hash: file.hash.clone(),
            status: RecordStatus::Complete,
            summary: format!("Summary of {}", path),
            responsibilities: vec![],
            entities: declares
                .iter()
                .map(|n| Entity {
                    name: n.to_string(),
                    kind: EntityKind::Class,
                    signature: format!("class {}", n),
                })
                .collect(),
            relationships: vec![],
            dependencies: deps
                .iter()
                .map(|d| Dependency {
                    target: d.to_string(),
                    kind: RelationKind::Imports,
                    confidence: 0.9,
                })
                .collect(),
            mentions: mentions.iter().map(|m| m.to_string()).collect(),
            degraded_reason: None,
        };
        (file, Arc::new(record))
    }

    fn fixture() -> Vec<(FileEntry, Arc<AnalysisRecord>)> {
        vec![
            record("app/main.py", &[], &["Service", "User"], &["app.service"]),
            record("app/service.py", &["Service"], &["User"], &[]),
            record("app/a/user.py", &["User"], &[], &[]),
            record("app/b/user.py", &["User"], &[], &[]),
            record("lib/user.py", &["User"], &[], &[]),
            record("README.md", &[], &[], &[]),
        ]
    }

    #[test]
    fn test_tree_grouped_by_directory() {
        let tree = DocumentationAssembler::new("demo").assemble(&RecordSet::from_entries(fixture()));
        let root = &tree.root;
        assert_eq!(root.title, "demo");
        assert_eq!(root.sources.len(), 6);

        // Directories first, then files
        let titles: Vec<_> = root.children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["app/", "lib/", "README.md"]);

        let app = tree.root.find(&NodeId::directory("app")).unwrap();
        let app_titles: Vec<_> = app.children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(
            app_titles,
            vec!["app/a/", "app/b/", "app/main.py", "app/service.py"]
        );
        assert_eq!(app.sources.len(), 4);
    }

    #[test]
    fn test_cross_references_nearest_and_ambiguous() {
        let tree = DocumentationAssembler::default().assemble(&RecordSet::from_entries(fixture()));

        let main = tree.root.find(&NodeId::file("app/main.py")).unwrap();
        let service_ref = main.references.iter().find(|r| r.name == "Service").unwrap();
        assert_eq!(
            service_ref.resolution,
            Resolution::Linked {
                target: NodeId::file("app/service.py")
            }
        );

        // Two declarations one directory away from app/, lib/ is further
        let user_ref = main.references.iter().find(|r| r.name == "User").unwrap();
        assert_eq!(
            user_ref.resolution,
            Resolution::Ambiguous {
                candidates: vec![NodeId::file("app/a/user.py"), NodeId::file("app/b/user.py")]
            }
        );
        assert_eq!(main.depends_on, vec![NodeId::file("app/service.py")]);
    }

    #[test]
    fn test_degraded_file_marked() {
        let file = FileEntry::new("x.py", "x");
        let records = RecordSet::from_entries([(
            file.clone(),
            Arc::new(AnalysisRecord::degraded(file.hash.clone(), "timeout")),
        )]);
        let tree = DocumentationAssembler::default().assemble(&records);
        let node = tree.root.find(&NodeId::file("x.py")).unwrap();
        assert!(node.degraded);
        assert!(node.body.starts_with(crate::types::DEGRADED_SUMMARY));
        assert!(tree.root.body.contains("Degraded: 1."));
    }

    #[test]
    fn test_reassembly_is_byte_identical() {
        let assembler = DocumentationAssembler::default();
        let records = RecordSet::from_entries(fixture());
        let first = assembler.assemble(&records);
        let second = assembler.assemble(&records);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        assert_eq!(render_markdown(&first), render_markdown(&second));
    }

    #[test]
    fn test_node_ids_cover_tree() {
        let tree = DocumentationAssembler::default().assemble(&RecordSet::from_entries(fixture()));
        let ids = tree.node_ids();
        assert!(ids.contains(&NodeId::root()));
        assert!(ids.contains(&NodeId::file("lib/user.py")));
        assert!(ids.contains(&NodeId::directory("app/a")));
        assert!(!tree.contains(&NodeId::file("nope.py")));
    }

    proptest! {
        #[test]
        fn prop_insertion_order_irrelevant(seed in proptest::collection::vec(0usize..100, 6)) {
            let mut shuffled = fixture();
            // Order by the random keys to get an arbitrary permutation
            let mut keyed: Vec<_> = seed.into_iter().zip(shuffled.drain(..)).collect();
            keyed.sort_by_key(|(k, _)| *k);
            let permuted = keyed.into_iter().map(|(_, e)| e);

            let assembler = DocumentationAssembler::default();
            let expected = assembler.assemble(&RecordSet::from_entries(fixture())).to_json().unwrap();
            let actual = assembler.assemble(&RecordSet::from_entries(permuted)).to_json().unwrap();
            prop_assert_eq!(expected, actual);
        }
    }
}
