//! Record set: the current analysis records joined back to their paths.
//!
//! Records carry no paths, so every consumer downstream of the file analyzer
//! works on a `RecordSet`. Iteration is always in path order, which makes
//! assembly and synthesis independent of the order records arrived in.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analyzer::{Language, ModuleStyle};
use crate::types::snapshot::{normalize_path, parent_dir};
use crate::types::{AnalysisRecord, FileEntry, Result, sha256_hex};

#[derive(Debug, Clone)]
pub struct RecordEntry {
    pub path: String,
    pub language: Language,
    pub size: u64,
    pub record: Arc<AnalysisRecord>,
}

impl RecordEntry {
    pub fn directory(&self) -> &str {
        parent_dir(&self.path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    entries: BTreeMap<String, RecordEntry>,
    /// Path without extension -> paths
    modules: BTreeMap<String, Vec<String>>,
    /// Entity name -> declaring paths
    declarations: BTreeMap<String, Vec<String>>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (FileEntry, Arc<AnalysisRecord>)>) -> Self {
        let mut set = Self::new();
        for (file, record) in entries {
            set.insert(&file, record);
        }
        set
    }

    pub fn insert(&mut self, file: &FileEntry, record: Arc<AnalysisRecord>) {
        self.remove(&file.path);

        self.modules
            .entry(strip_extension(&file.path).to_string())
            .or_default()
            .push(file.path.clone());
        for entity in &record.entities {
            let paths = self.declarations.entry(entity.name.clone()).or_default();
            if !paths.contains(&file.path) {
                paths.push(file.path.clone());
                paths.sort();
            }
        }

        self.entries.insert(
            file.path.clone(),
            RecordEntry {
                path: file.path.clone(),
                language: file.language,
                size: file.size,
                record,
            },
        );
    }

    fn remove(&mut self, path: &str) {
        if self.entries.remove(path).is_none() {
            return;
        }
        for paths in self.modules.values_mut() {
            paths.retain(|p| p != path);
        }
        for paths in self.declarations.values_mut() {
            paths.retain(|p| p != path);
        }
        self.modules.retain(|_, paths| !paths.is_empty());
        self.declarations.retain(|_, paths| !paths.is_empty());
    }

    pub fn get(&self, path: &str) -> Option<&RecordEntry> {
        self.entries.get(path)
    }

    /// Entries in path order
    pub fn iter(&self) -> impl Iterator<Item = &RecordEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn degraded(&self) -> impl Iterator<Item = &RecordEntry> {
        self.iter().filter(|e| e.record.is_degraded())
    }

    pub fn entity_count(&self) -> usize {
        self.iter().map(|e| e.record.entities.len()).sum()
    }

    /// Paths declaring an entity called `name`, sorted
    pub fn declarers(&self, name: &str) -> &[String] {
        self.declarations
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Declarers of `name` other than `from` that sit at the smallest path
    /// distance from it. One element means an unambiguous match.
    pub fn nearest_declarers(&self, from: &str, name: &str) -> Vec<&str> {
        nearest(from, self.declarers(name).iter().map(String::as_str).filter(|p| *p != from))
    }

    /// Content identity of the set: sorted `(path, record digest)` pairs
    pub fn fingerprint(&self) -> Result<String> {
        let mut lines = String::new();
        for entry in self.iter() {
            lines.push_str(&entry.path);
            lines.push('\t');
            lines.push_str(&entry.record.digest()?);
            lines.push('\n');
        }
        Ok(sha256_hex(lines.as_bytes()))
    }

    /// Map an import spec written in `from` to a file of this set.
    ///
    /// Name matching against paths only; unresolvable specs (external
    /// packages, generated code) yield `None`.
    pub fn resolve_dependency(&self, from: &str, spec: &str) -> Option<&str> {
        let entry = self.entries.get(from)?;
        let spec = spec
            .trim()
            .trim_matches(|c| matches!(c, '"' | '\'' | '<' | '>' | '`' | ';'));
        if spec.is_empty() {
            return None;
        }

        let dir = entry.directory();
        let style = entry.language.module_style();

        // Path-like specs are relative to the importer in every language
        if spec.starts_with("./") || spec.starts_with("../") {
            let target = join(dir, strip_known_extension(spec))?;
            return self.lookup_exact(&target, from);
        }

        let (anchor, module) = match style {
            ModuleStyle::Dotted => {
                let dots = spec.chars().take_while(|c| *c == '.').count();
                let rest = spec[dots..].replace('.', "/");
                if dots > 0 {
                    let mut base = dir.to_string();
                    for _ in 1..dots {
                        base = parent_dir(&base).to_string();
                    }
                    (Some(base), rest)
                } else {
                    (None, rest)
                }
            }
            ModuleStyle::Path => {
                let mut segments: Vec<&str> = spec.split("::").collect();
                let anchor = match segments.first().copied() {
                    Some("crate") => {
                        segments.remove(0);
                        None
                    }
                    Some("self") => {
                        segments.remove(0);
                        Some(dir.to_string())
                    }
                    Some("super") => {
                        let mut base = dir.to_string();
                        while segments.first() == Some(&"super") {
                            segments.remove(0);
                            base = parent_dir(&base).to_string();
                        }
                        Some(base)
                    }
                    _ => None,
                };
                (anchor, strip_known_extension(&segments.join("/")).to_string())
            }
            ModuleStyle::Relative => (Some(dir.to_string()), strip_known_extension(spec).to_string()),
            ModuleStyle::Opaque => (None, strip_known_extension(spec).to_string()),
        };

        let module = normalize_path(&module);
        if module.is_empty() {
            return None;
        }

        // Try the module itself, then its parent for specs naming a symbol
        let mut attempt = module.as_str();
        for _ in 0..2 {
            if let Some(anchor) = &anchor
                && let Some(target) = join(anchor, attempt)
                && let Some(found) = self.lookup_exact(&target, from)
            {
                return Some(found);
            }
            if anchor.is_none() || style == ModuleStyle::Path {
                if let Some(found) = self.lookup_suffix(attempt, from) {
                    return Some(found);
                }
            }
            match attempt.rfind('/') {
                Some(idx) => attempt = &attempt[..idx],
                None => break,
            }
        }
        None
    }

    fn lookup_exact(&self, target: &str, from: &str) -> Option<&str> {
        let candidates = [
            target.to_string(),
            format!("{}/index", target),
            format!("{}/__init__", target),
            format!("{}/mod", target),
        ];
        candidates.iter().find_map(|key| {
            self.modules
                .get(key)
                .and_then(|paths| paths.iter().map(String::as_str).find(|p| *p != from))
        })
    }

    fn lookup_suffix(&self, module: &str, from: &str) -> Option<&str> {
        let suffix = format!("/{}", module);
        let matches = self
            .modules
            .iter()
            .filter(|(stem, _)| {
                let key = package_key(stem);
                key == module || key.ends_with(&suffix)
            })
            .flat_map(|(_, paths)| paths.iter().map(String::as_str))
            .filter(|p| *p != from);
        let nearest = nearest(from, matches);
        match nearest.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Module name of a stem, with package index files naming their directory
fn package_key(stem: &str) -> &str {
    ["/mod", "/index", "/__init__"]
        .iter()
        .find_map(|index| stem.strip_suffix(index))
        .unwrap_or(stem)
}

/// Number of directory hops between the directories of two paths
pub fn path_distance(a: &str, b: &str) -> usize {
    let da: Vec<&str> = parent_dir(a).split('/').filter(|s| !s.is_empty()).collect();
    let db: Vec<&str> = parent_dir(b).split('/').filter(|s| !s.is_empty()).collect();
    let common = da.iter().zip(&db).take_while(|(x, y)| x == y).count();
    da.len() + db.len() - 2 * common
}

fn nearest<'a>(from: &str, candidates: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut best: Vec<&str> = Vec::new();
    let mut best_distance = usize::MAX;
    for candidate in candidates {
        let distance = path_distance(from, candidate);
        if distance < best_distance {
            best_distance = distance;
            best.clear();
        }
        if distance == best_distance {
            best.push(candidate);
        }
    }
    best.sort_unstable();
    best.dedup();
    best
}

fn join(base: &str, relative: &str) -> Option<String> {
    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn strip_extension(path: &str) -> &str {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(idx) if idx > 0 => &path[..name_start + idx],
        _ => path,
    }
}

fn strip_known_extension(spec: &str) -> &str {
    let stripped = strip_extension(spec);
    if stripped.len() == spec.len() {
        return spec;
    }
    let ext = &spec[stripped.len() + 1..];
    if Language::from_extension(ext).is_known() {
        stripped
    } else {
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentHash, Entity, EntityKind};

    fn set(files: &[(&str, &[&str])]) -> RecordSet {
        RecordSet::from_entries(files.iter().map(|(path, entities)| {
            let file = FileEntry::new(path, format!("content of {}", path));
            let mut record = AnalysisRecord::degraded(ContentHash::of(path.as_bytes()), "");
            record.status = crate::types::RecordStatus::Complete;
            record.degraded_reason = None;
            record.entities = entities
                .iter()
                .map(|name| Entity {
                    name: name.to_string(),
                    kind: EntityKind::Class,
                    signature: String::new(),
                })
                .collect();
            (file, Arc::new(record))
        }))
    }

    #[test]
    fn test_path_distance() {
        assert_eq!(path_distance("a.py", "b.py"), 0);
        assert_eq!(path_distance("src/a.py", "src/b.py"), 0);
        assert_eq!(path_distance("src/x/a.py", "src/y/b.py"), 2);
        assert_eq!(path_distance("a.py", "src/b.py"), 1);
    }

    #[test]
    fn test_resolve_python() {
        let records = set(&[
            ("a.py", &[]),
            ("b.py", &[]),
            ("app/models/user.py", &[]),
            ("app/models/__init__.py", &[]),
            ("app/views.py", &[]),
        ]);
        assert_eq!(records.resolve_dependency("a.py", "b"), Some("b.py"));
        assert_eq!(
            records.resolve_dependency("app/views.py", "app.models.user"),
            Some("app/models/user.py")
        );
        assert_eq!(
            records.resolve_dependency("app/views.py", ".models"),
            Some("app/models/__init__.py")
        );
        assert_eq!(
            records.resolve_dependency("app/views.py", "app.models.user.User"),
            Some("app/models/user.py")
        );
        assert_eq!(records.resolve_dependency("a.py", "requests"), None);
    }

    #[test]
    fn test_resolve_relative_js() {
        let records = set(&[
            ("web/src/app.ts", &[]),
            ("web/src/lib/api.ts", &[]),
            ("web/src/components/index.tsx", &[]),
        ]);
        assert_eq!(
            records.resolve_dependency("web/src/app.ts", "./lib/api"),
            Some("web/src/lib/api.ts")
        );
        assert_eq!(
            records.resolve_dependency("web/src/app.ts", "./components"),
            Some("web/src/components/index.tsx")
        );
        assert_eq!(
            records.resolve_dependency("web/src/lib/api.ts", "../app.ts"),
            Some("web/src/app.ts")
        );
        assert_eq!(records.resolve_dependency("web/src/app.ts", "react"), None);
    }

    #[test]
    fn test_resolve_rust_paths() {
        let records = set(&[
            ("src/lib.rs", &[]),
            ("src/cache/mod.rs", &[]),
            ("src/cache/policy.rs", &[]),
        ]);
        assert_eq!(
            records.resolve_dependency("src/lib.rs", "crate::cache::ContentCache"),
            Some("src/cache/mod.rs")
        );
        assert_eq!(
            records.resolve_dependency("src/cache/mod.rs", "self::policy"),
            Some("src/cache/policy.rs")
        );
        assert_eq!(records.resolve_dependency("src/lib.rs", "std::sync::Arc"), None);
    }

    #[test]
    fn test_nearest_declarers() {
        let records = set(&[
            ("svc/a/user.py", &["User"]),
            ("svc/b/user.py", &["User"]),
            ("svc/a/views.py", &[]),
            ("svc/views.py", &[]),
        ]);
        assert_eq!(
            records.nearest_declarers("svc/a/views.py", "User"),
            vec!["svc/a/user.py"]
        );
        // Equidistant declarations stay ambiguous
        assert_eq!(
            records.nearest_declarers("svc/views.py", "User"),
            vec!["svc/a/user.py", "svc/b/user.py"]
        );
        assert!(records.nearest_declarers("svc/views.py", "Missing").is_empty());
    }

    #[test]
    fn test_fingerprint_independent_of_insert_order() {
        let forward = set(&[("a.py", &["A"]), ("b.py", &["B"])]);
        let backward = set(&[("b.py", &["B"]), ("a.py", &["A"])]);
        assert_eq!(forward.fingerprint().unwrap(), backward.fingerprint().unwrap());

        let renamed = set(&[("a.py", &["A"]), ("c.py", &["B"])]);
        assert_ne!(forward.fingerprint().unwrap(), renamed.fingerprint().unwrap());
    }

    #[test]
    fn test_reinsert_replaces_declarations() {
        let mut records = set(&[("a.py", &["A"])]);
        let file = FileEntry::new("a.py", "changed");
        records.insert(&file, Arc::new(AnalysisRecord::degraded(file.hash.clone(), "x")));
        assert!(records.declarers("A").is_empty());
        assert_eq!(records.len(), 1);
    }
}
