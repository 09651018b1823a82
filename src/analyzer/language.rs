//! Language Detection
//!
//! Maps file paths to a [`Language`] tag. The tag drives prompt wording,
//! structural hints, and how import targets are resolved back to files.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

// =============================================================================
// Language Metadata Table
// =============================================================================

/// How a language spells references to other modules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStyle {
    /// `app.models.user` (Python, Java, Kotlin, Scala, C#)
    Dotted,
    /// `./models/user` resolved against the importing file (JS/TS)
    Relative,
    /// `crate::models::user` or `models/user.h`
    Path,
    /// No module system worth resolving
    Opaque,
}

struct LanguageMeta {
    display_name: &'static str,
    highlight_str: &'static str,
    extensions: &'static [&'static str],
    module_style: ModuleStyle,
}

macro_rules! lang_meta {
    ($display:literal, $highlight:literal, [$($ext:literal),*], $style:ident) => {
        LanguageMeta {
            display_name: $display,
            highlight_str: $highlight,
            extensions: &[$($ext),*],
            module_style: ModuleStyle::$style,
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Rust,
    Go,
    C,
    Cpp,
    Java,
    Kotlin,
    Scala,
    CSharp,
    TypeScript,
    JavaScript,
    Python,
    Ruby,
    Php,
    Swift,
    Lua,
    Bash,
    Sql,
    Html,
    Css,
    Yaml,
    Json,
    Toml,
    Markdown,
    Proto,
    Makefile,
    Dockerfile,
    #[default]
    Unknown,
}

const ALL: &[Language] = &[
    Language::Rust,
    Language::Go,
    Language::C,
    Language::Cpp,
    Language::Java,
    Language::Kotlin,
    Language::Scala,
    Language::CSharp,
    Language::TypeScript,
    Language::JavaScript,
    Language::Python,
    Language::Ruby,
    Language::Php,
    Language::Swift,
    Language::Lua,
    Language::Bash,
    Language::Sql,
    Language::Html,
    Language::Css,
    Language::Yaml,
    Language::Json,
    Language::Toml,
    Language::Markdown,
    Language::Proto,
    Language::Makefile,
    Language::Dockerfile,
];

impl Language {
    fn meta(&self) -> LanguageMeta {
        match self {
            Language::Rust => lang_meta!("Rust", "rust", ["rs"], Path),
            Language::Go => lang_meta!("Go", "go", ["go"], Path),
            Language::C => lang_meta!("C", "c", ["c", "h"], Path),
            Language::Cpp => lang_meta!("C++", "cpp", ["cpp", "cc", "cxx", "hpp", "hh", "hxx"], Path),
            Language::Java => lang_meta!("Java", "java", ["java"], Dotted),
            Language::Kotlin => lang_meta!("Kotlin", "kotlin", ["kt", "kts"], Dotted),
            Language::Scala => lang_meta!("Scala", "scala", ["scala", "sc"], Dotted),
            Language::CSharp => lang_meta!("C#", "csharp", ["cs"], Dotted),
            Language::TypeScript => lang_meta!("TypeScript", "typescript", ["ts", "tsx", "mts", "cts"], Relative),
            Language::JavaScript => lang_meta!("JavaScript", "javascript", ["js", "jsx", "mjs", "cjs"], Relative),
            Language::Python => lang_meta!("Python", "python", ["py", "pyi"], Dotted),
            Language::Ruby => lang_meta!("Ruby", "ruby", ["rb", "rake"], Relative),
            Language::Php => lang_meta!("PHP", "php", ["php"], Relative),
            Language::Swift => lang_meta!("Swift", "swift", ["swift"], Opaque),
            Language::Lua => lang_meta!("Lua", "lua", ["lua"], Dotted),
            Language::Bash => lang_meta!("Bash", "bash", ["sh", "bash", "zsh"], Relative),
            Language::Sql => lang_meta!("SQL", "sql", ["sql"], Opaque),
            Language::Html => lang_meta!("HTML", "html", ["html", "htm"], Opaque),
            Language::Css => lang_meta!("CSS", "css", ["css", "scss", "sass", "less"], Opaque),
            Language::Yaml => lang_meta!("YAML", "yaml", ["yaml", "yml"], Opaque),
            Language::Json => lang_meta!("JSON", "json", ["json"], Opaque),
            Language::Toml => lang_meta!("TOML", "toml", ["toml"], Opaque),
            Language::Markdown => lang_meta!("Markdown", "markdown", ["md", "markdown"], Opaque),
            Language::Proto => lang_meta!("Protocol Buffers", "protobuf", ["proto"], Dotted),
            Language::Makefile => lang_meta!("Makefile", "makefile", [], Opaque),
            Language::Dockerfile => lang_meta!("Dockerfile", "dockerfile", [], Opaque),
            Language::Unknown => lang_meta!("Unknown", "text", [], Opaque),
        }
    }

    /// Display name (human-readable)
    pub fn as_str(&self) -> &'static str {
        self.meta().display_name
    }

    /// Identifier for markdown code fences
    pub fn highlight_str(&self) -> &'static str {
        self.meta().highlight_str
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        self.meta().extensions
    }

    pub fn module_style(&self) -> ModuleStyle {
        self.meta().module_style
    }

    pub fn from_extension(ext: &str) -> Self {
        let ext_lower = ext.to_lowercase();
        ALL.iter()
            .copied()
            .find(|lang| lang.extensions().contains(&ext_lower.as_str()))
            .unwrap_or(Language::Unknown)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
            let lower = filename.to_lowercase();
            if lower == "makefile" || lower == "gnumakefile" {
                return Language::Makefile;
            }
            if lower == "dockerfile" || lower.starts_with("dockerfile.") {
                return Language::Dockerfile;
            }
        }

        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Language::Unknown)
    }

    /// Programming languages, as opposed to data, markup and build files
    pub fn is_code(&self) -> bool {
        !matches!(
            self,
            Language::Sql
                | Language::Html
                | Language::Css
                | Language::Yaml
                | Language::Json
                | Language::Toml
                | Language::Markdown
                | Language::Makefile
                | Language::Dockerfile
                | Language::Unknown
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
