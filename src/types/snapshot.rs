//! Repository snapshot: the immutable file set one analysis run works on.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::ContentHash;
use crate::analyzer::Language;

/// One text file of a snapshot
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Repository-relative path with `/` separators
    pub path: String,
    pub hash: ContentHash,
    pub size: u64,
    pub language: Language,
    content: Arc<str>,
}

impl FileEntry {
    pub fn new(path: impl AsRef<str>, content: impl Into<Arc<str>>) -> Self {
        let path = normalize_path(path.as_ref());
        let content: Arc<str> = content.into();
        Self {
            hash: ContentHash::of(content.as_bytes()),
            size: content.len() as u64,
            language: Language::from_path(&path),
            path,
            content,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Parent directory (`""` for files at the repository root)
    pub fn directory(&self) -> &str {
        parent_dir(&self.path)
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// File name without its final extension
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    /// Non-empty content without NUL bytes
    pub fn is_text(&self) -> bool {
        !self.content.is_empty() && !self.content.contains('\0')
    }
}

/// Normalize a path to the `a/b/c.ext` form used throughout the crate
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    unified
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Parent directory of a normalized path
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Ordered, immutable set of files taken from a repository source
#[derive(Debug, Clone)]
pub struct RepositorySnapshot {
    pub id: String,
    pub root: Option<PathBuf>,
    pub taken_at: DateTime<Utc>,
    files: Vec<FileEntry>,
}

impl RepositorySnapshot {
    /// Build a snapshot; entries are sorted by path and later duplicates replace earlier ones
    pub fn new(files: impl IntoIterator<Item = FileEntry>) -> Self {
        let by_path: BTreeMap<String, FileEntry> =
            files.into_iter().map(|f| (f.path.clone(), f)).collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            root: None,
            taken_at: Utc::now(),
            files: by_path.into_values().collect(),
        }
    }

    /// Convenience constructor from `(path, content)` pairs
    pub fn from_contents<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<str>,
        C: Into<Arc<str>>,
    {
        Self::new(files.into_iter().map(|(p, c)| FileEntry::new(p, c)))
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|f| f.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.files[idx])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Other files in the same directory, in path order
    pub fn neighbours<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a FileEntry> + 'a {
        let dir = parent_dir(path);
        self.files
            .iter()
            .filter(move |f| f.path != path && f.directory() == dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src//app\\a.py"), "src/app/a.py");
        assert_eq!(normalize_path("a.py"), "a.py");
    }

    #[test]
    fn test_file_entry_fields() {
        let f = FileEntry::new("src/pkg/mod.py", "x = 1\n");
        assert_eq!(f.directory(), "src/pkg");
        assert_eq!(f.file_name(), "mod.py");
        assert_eq!(f.stem(), "mod");
        assert_eq!(f.size, 6);
        assert_eq!(f.language, Language::Python);
        assert!(f.is_text());
        assert!(!FileEntry::new("bin.dat", "a\0b").is_text());
    }

    #[test]
    fn test_snapshot_sorted_and_deduplicated() {
        let snap = RepositorySnapshot::from_contents([
            ("b.py", "b"),
            ("a.py", "a"),
            ("b.py", "b2"),
        ]);
        let paths: Vec<_> = snap.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py"]);
        assert_eq!(snap.get("b.py").map(|f| f.content()), Some("b2"));
        assert!(snap.get("c.py").is_none());
    }

    #[test]
    fn test_neighbours() {
        let snap = RepositorySnapshot::from_contents([
            ("src/a.py", "a"),
            ("src/b.py", "b"),
            ("lib/c.py", "c"),
        ]);
        let n: Vec<_> = snap.neighbours("src/a.py").map(|f| f.path.clone()).collect();
        assert_eq!(n, vec!["src/b.py".to_string()]);
    }
}
