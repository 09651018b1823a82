//! Repository Source
//!
//! Local-directory source of [`RepositorySnapshot`](crate::types::RepositorySnapshot)s:
//! - File scanning with gitignore support
//! - Language detection from paths
//! - Regex structural hints for prompts

pub mod heuristics;
pub mod language;
pub mod scanner;

pub use heuristics::{StructuralHints, extract_hints};
pub use language::{Language, ModuleStyle};
pub use scanner::{FileScanner, ScanReport};
