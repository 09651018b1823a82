use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::snapshot::normalize_path;
use crate::types::{AtlasError, FileEntry, RepositorySnapshot, Result};

/// Default maximum file size for analysis (1MB)
const DEFAULT_MAX_FILE_SIZE: u64 = 1_048_576;

/// Default directories to skip
const DEFAULT_SKIP_DIRS: &[&str] = &[
    "node_modules",
    "target",
    ".git",
    "build",
    "dist",
    "__pycache__",
    "vendor",
    ".venv",
    ".repoatlas",
];

/// Counts of what the scanner left out, for the CLI summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub included: usize,
    pub excluded: usize,
    pub too_large: usize,
    pub non_text: usize,
}

/// Repository source backed by a local directory
pub struct FileScanner {
    root: PathBuf,
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
    max_file_size: u64,
}

impl FileScanner {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let exclude = DEFAULT_SKIP_DIRS
            .iter()
            .filter_map(|d| glob::Pattern::new(&format!("**/{}/**", d)).ok())
            .collect();
        Self {
            root: root.as_ref().to_path_buf(),
            include: Vec::new(),
            exclude,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Only paths matching at least one pattern are kept (empty keeps all)
    pub fn with_include(mut self, patterns: &[String]) -> Result<Self> {
        self.include = compile_patterns(patterns)?;
        Ok(self)
    }

    /// Additional exclusions on top of the default skip list
    pub fn with_exclude(mut self, patterns: &[String]) -> Result<Self> {
        self.exclude.extend(compile_patterns(patterns)?);
        Ok(self)
    }

    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the directory and take an immutable snapshot of its text files
    pub fn snapshot(&self) -> Result<(RepositorySnapshot, ScanReport)> {
        if !self.root.is_dir() {
            return Err(AtlasError::InvalidInput(format!(
                "not a directory: {}",
                self.root.display()
            )));
        }

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false) // Security: prevent symlink traversal attacks
            .build();

        let mut report = ScanReport::default();
        let mut files = Vec::new();

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = normalize_path(&relative.to_string_lossy());

            if !self.is_selected(&relative) {
                report.excluded += 1;
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.max_file_size {
                debug!(path = %relative, size, "Skipping oversized file");
                report.too_large += 1;
                continue;
            }

            let bytes = std::fs::read(path)?;
            // Binary and non-UTF-8 content is out of scope
            let Ok(text) = String::from_utf8(bytes) else {
                report.non_text += 1;
                continue;
            };
            let file = FileEntry::new(&relative, text);
            if !file.is_text() {
                report.non_text += 1;
                continue;
            }

            files.push(file);
        }

        report.included = files.len();
        info!(
            root = %self.root.display(),
            files = report.included,
            excluded = report.excluded,
            "Repository scanned"
        );

        Ok((RepositorySnapshot::new(files).with_root(&self.root), report))
    }

    fn is_selected(&self, relative: &str) -> bool {
        let candidate = format!("/{}", relative);
        let excluded = self
            .exclude
            .iter()
            .any(|p| p.matches(relative) || p.matches(&candidate));
        if excluded {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(relative))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| AtlasError::Config(format!("invalid glob '{}': {}", p, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_snapshot_collects_text_files_sorted() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/b.py", b"import a\n");
        write(tmp.path(), "src/a.py", b"x = 1\n");
        write(tmp.path(), "logo.png", &[0x89, 0x50, 0x4e, 0x47, 0x00, 0xff]);
        write(tmp.path(), "node_modules/dep/index.js", b"module.exports = 1\n");

        let (snap, report) = FileScanner::new(tmp.path()).snapshot().unwrap();
        let paths: Vec<_> = snap.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.py", "src/b.py"]);
        assert_eq!(report.non_text, 1);
        assert_eq!(report.excluded, 1);
        assert_eq!(snap.root.as_deref(), Some(tmp.path()));
    }

    #[test]
    fn test_include_and_size_filters() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.py", b"x = 1\n");
        write(tmp.path(), "b.rs", b"fn main() {}\n");
        write(tmp.path(), "big.py", &vec![b'x'; 64]);

        let scanner = FileScanner::new(tmp.path())
            .with_include(&["*.py".to_string()])
            .unwrap()
            .with_max_file_size(32);
        let (snap, report) = scanner.snapshot().unwrap();
        assert_eq!(snap.len(), 1);
        assert!(snap.get("a.py").is_some());
        assert_eq!(report.too_large, 1);
    }

    #[test]
    fn test_invalid_glob_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let err = FileScanner::new(tmp.path()).with_exclude(&["[".to_string()]);
        assert!(matches!(err, Err(AtlasError::Config(_))));
    }

    #[test]
    fn test_missing_root() {
        let err = FileScanner::new("/definitely/not/here").snapshot();
        assert!(matches!(err, Err(AtlasError::InvalidInput(_))));
    }
}
