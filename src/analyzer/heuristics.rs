//! Structural hints
//!
//! Cheap regex scan for import targets and top-level declarations. The hints
//! are handed to the model as minimal context; they are never treated as
//! analysis results on their own.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use super::Language;
use crate::types::EntityKind;

/// Hints per file are capped so prompts stay bounded
const MAX_HINTS: usize = 40;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuralHints {
    pub imports: Vec<String>,
    pub declarations: Vec<(EntityKind, String)>,
}

impl StructuralHints {
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.declarations.is_empty()
    }

    /// Compact text block for prompts
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.imports.is_empty() {
            out.push_str("imports: ");
            out.push_str(&self.imports.join(", "));
            out.push('\n');
        }
        if !self.declarations.is_empty() {
            let decls: Vec<String> = self
                .declarations
                .iter()
                .map(|(kind, name)| format!("{} {}", kind.as_str(), name))
                .collect();
            out.push_str("declares: ");
            out.push_str(&decls.join(", "));
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Fixed(EntityKind),
    /// Group 1 is the keyword, group 2 the name
    Keyword,
    /// Decorator route: group 1 is the path, group 2 an optional methods list
    Route,
    /// `<receiver>.<verb>("/path")`: group 1 is the verb, group 2 the path
    VerbRoute,
}

/// Pattern sources for one language family
struct Source {
    imports: &'static [&'static str],
    declarations: &'static [(&'static str, Shape)],
}

struct Patterns {
    imports: Vec<Regex>,
    declarations: Vec<(Regex, Shape)>,
}

fn compile(source: &Source) -> Patterns {
    let build = |pattern: &str| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(pattern, error = %err, "Skipping invalid hint pattern");
            None
        }
    };
    Patterns {
        imports: source.imports.iter().filter_map(|p| build(*p)).collect(),
        declarations: source
            .declarations
            .iter()
            .filter_map(|(p, shape)| build(*p).map(|re| (re, *shape)))
            .collect(),
    }
}

const PYTHON_SOURCE: Source = Source {
    imports: &[
        r"(?m)^\s*import\s+([\w.]+)",
        r"(?m)^\s*from\s+([\w.]+)\s+import\b",
    ],
    declarations: &[
        (r"(?m)^class\s+(\w+)", Shape::Fixed(EntityKind::Class)),
        (r"(?m)^(?:async\s+)?def\s+(\w+)", Shape::Fixed(EntityKind::Function)),
        (
            r#"(?m)^\s*@(?:\w+\.)?route\(\s*['"]([^'"]+)['"](?:\s*,\s*methods\s*=\s*[\[(]([^\])]+)[\])])?"#,
            Shape::Route,
        ),
        (
            r#"(?m)^\s*@\w+\.(get|post|put|patch|delete)\(\s*['"]([^'"]+)['"]"#,
            Shape::VerbRoute,
        ),
    ],
};

const ECMASCRIPT_SOURCE: Source = Source {
    imports: &[
        r#"(?m)^\s*import\s+(?:[^'"]*?\s+from\s+)?['"]([^'"]+)['"]"#,
        r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
    ],
    declarations: &[
        (
            r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(class|interface|enum)\s+(\w+)",
            Shape::Keyword,
        ),
        (
            r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
            Shape::Fixed(EntityKind::Function),
        ),
        (
            r"(?m)^\s*(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s*)?\([^)]*\)\s*=>",
            Shape::Fixed(EntityKind::Function),
        ),
        (
            r#"\b(?:app|router)\.(get|post|put|patch|delete|all)\s*\(\s*['"`]([^'"`]+)['"`]"#,
            Shape::VerbRoute,
        ),
    ],
};

const JVM_SOURCE: Source = Source {
    imports: &[r"(?m)^\s*import\s+(?:static\s+)?([\w.]+(?:\.\*)?)"],
    declarations: &[(
        r"(?m)^\s*(?:(?:public|private|protected|abstract|final|static|data|sealed|open)\s+)*(class|interface|enum|object)\s+(\w+)",
        Shape::Keyword,
    )],
};

const RUST_SOURCE: Source = Source {
    imports: &[r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([\w:]+)", r"(?m)^\s*mod\s+(\w+)\s*;"],
    declarations: &[(
        r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(struct|enum|trait|fn|type|mod)\s+(\w+)",
        Shape::Keyword,
    )],
};

const GO_SOURCE: Source = Source {
    imports: &[r#"(?m)^\s*import\s+(?:\w+\s+)?"([^"]+)""#, r#"(?m)^\s+(?:\w+\s+)?"([^"]+)"\s*$"#],
    declarations: &[
        (r"(?m)^func\s+(?:\([^)]*\)\s*)?(\w+)", Shape::Fixed(EntityKind::Function)),
        (r"(?m)^type\s+(\w+)\s+struct\b", Shape::Fixed(EntityKind::Struct)),
        (r"(?m)^type\s+(\w+)\s+interface\b", Shape::Fixed(EntityKind::Interface)),
    ],
};

static PYTHON: LazyLock<Patterns> = LazyLock::new(|| compile(&PYTHON_SOURCE));
static ECMASCRIPT: LazyLock<Patterns> = LazyLock::new(|| compile(&ECMASCRIPT_SOURCE));
static JVM: LazyLock<Patterns> = LazyLock::new(|| compile(&JVM_SOURCE));
static RUST: LazyLock<Patterns> = LazyLock::new(|| compile(&RUST_SOURCE));
static GO: LazyLock<Patterns> = LazyLock::new(|| compile(&GO_SOURCE));

fn patterns_for(language: Language) -> Option<&'static Patterns> {
    match language {
        Language::Python => Some(&PYTHON),
        Language::TypeScript | Language::JavaScript => Some(&ECMASCRIPT),
        Language::Java | Language::Kotlin | Language::Scala => Some(&JVM),
        Language::Rust => Some(&RUST),
        Language::Go => Some(&GO),
        _ => None,
    }
}

/// Scan `content` for import targets and top-level declarations. HTTP routes
/// are reported as endpoints named `METHOD /path`.
pub fn extract_hints(content: &str, language: Language) -> StructuralHints {
    let Some(patterns) = patterns_for(language) else {
        return StructuralHints::default();
    };

    let mut imports = BTreeSet::new();
    for re in &patterns.imports {
        for caps in re.captures_iter(content) {
            if let Some(m) = caps.get(1) {
                imports.insert(m.as_str().to_string());
            }
        }
    }

    let mut seen = BTreeSet::new();
    let mut declarations = Vec::new();
    for (re, shape) in &patterns.declarations {
        for caps in re.captures_iter(content) {
            for decl in declarations_of(&caps, *shape) {
                if seen.insert(decl.1.clone()) {
                    declarations.push(decl);
                }
            }
        }
    }

    StructuralHints {
        imports: imports.into_iter().take(MAX_HINTS).collect(),
        declarations: declarations.into_iter().take(MAX_HINTS).collect(),
    }
}

fn declarations_of(caps: &Captures<'_>, shape: Shape) -> Vec<(EntityKind, String)> {
    let group = |i: usize| caps.get(i).map(|m| m.as_str());
    match shape {
        Shape::Fixed(kind) => group(1).map(|name| (kind, name.to_string())).into_iter().collect(),
        Shape::Keyword => match (group(1), group(2)) {
            (Some(kw), Some(name)) => vec![(keyword_kind(kw), name.to_string())],
            _ => Vec::new(),
        },
        Shape::Route => {
            let Some(path) = group(1) else {
                return Vec::new();
            };
            let methods: Vec<String> = group(2)
                .map(|list| {
                    list.split(',')
                        .map(|m| m.trim().trim_matches(|c| c == '\'' || c == '"').to_uppercase())
                        .filter(|m| !m.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            if methods.is_empty() {
                return vec![endpoint("GET", path)];
            }
            methods.iter().map(|method| endpoint(method, path)).collect()
        }
        Shape::VerbRoute => match (group(1), group(2)) {
            (Some(verb), Some(path)) => vec![endpoint(&verb.to_uppercase(), path)],
            _ => Vec::new(),
        },
    }
}

fn endpoint(method: &str, path: &str) -> (EntityKind, String) {
    (EntityKind::Endpoint, format!("{} {}", method, path))
}

fn keyword_kind(keyword: &str) -> EntityKind {
    match keyword {
        "class" | "object" => EntityKind::Class,
        "mod" => EntityKind::Module,
        other => EntityKind::parse(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        let sources = [
            ("python", &PYTHON_SOURCE),
            ("ecmascript", &ECMASCRIPT_SOURCE),
            ("jvm", &JVM_SOURCE),
            ("rust", &RUST_SOURCE),
            ("go", &GO_SOURCE),
        ];
        for (name, source) in sources {
            let patterns = source
                .imports
                .iter()
                .copied()
                .chain(source.declarations.iter().map(|(p, _)| *p));
            for pattern in patterns {
                assert!(Regex::new(pattern).is_ok(), "{} pattern fails to compile: {}", name, pattern);
            }
            let compiled = compile(source);
            assert_eq!(compiled.imports.len(), source.imports.len());
            assert_eq!(compiled.declarations.len(), source.declarations.len());
        }
    }

    #[test]
    fn test_flask_and_fastapi_routes() {
        let src = "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/users', methods=['GET', 'POST'])\ndef users():\n    pass\n\n@bp.route(\"/health\")\ndef health():\n    pass\n\n@api.delete('/items/{id}')\nasync def drop(id):\n    pass\n";
        let hints = extract_hints(src, Language::Python);
        let endpoints: Vec<&str> = hints
            .declarations
            .iter()
            .filter(|(kind, _)| *kind == EntityKind::Endpoint)
            .map(|(_, name)| name.as_str())
            .collect();
        assert_eq!(endpoints, vec!["GET /users", "POST /users", "GET /health", "DELETE /items/{id}"]);
        assert!(hints.render().contains("endpoint GET /users"));
    }

    #[test]
    fn test_express_routes() {
        let src = "const router = express.Router();\nrouter.get('/orders', list);\napp.post(\"/orders\", create);\napp.listen(3000);\napp.set('view engine', 'pug');\n";
        let hints = extract_hints(src, Language::JavaScript);
        let endpoints: Vec<&str> = hints
            .declarations
            .iter()
            .filter(|(kind, _)| *kind == EntityKind::Endpoint)
            .map(|(_, name)| name.as_str())
            .collect();
        assert_eq!(endpoints, vec!["GET /orders", "POST /orders"]);
    }

    #[test]
    fn test_python_hints() {
        let src = "import os\nfrom app.models import User\n\nclass Service:\n    def run(self):\n        pass\n\ndef main():\n    pass\n";
        let hints = extract_hints(src, Language::Python);
        assert_eq!(hints.imports, vec!["app.models", "os"]);
        assert_eq!(
            hints.declarations,
            vec![
                (EntityKind::Class, "Service".to_string()),
                (EntityKind::Function, "main".to_string()),
            ]
        );
    }

    #[test]
    fn test_typescript_hints() {
        let src = "import { a } from './a';\nconst b = require(\"../b\");\nexport class Widget {}\nexport interface Props {}\nexport async function load() {}\nexport const render = (x) => x;\n";
        let hints = extract_hints(src, Language::TypeScript);
        assert_eq!(hints.imports, vec!["../b", "./a"]);
        let names: Vec<_> = hints.declarations.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, vec!["Widget", "Props", "load", "render"]);
        assert_eq!(hints.declarations[1].0, EntityKind::Interface);
    }

    #[test]
    fn test_rust_hints() {
        let src = "use crate::types::Result;\nmod cache;\n\npub struct Store;\npub(crate) fn open() {}\n";
        let hints = extract_hints(src, Language::Rust);
        assert!(hints.imports.contains(&"crate::types::Result".to_string()));
        assert!(hints.imports.contains(&"cache".to_string()));
        assert!(hints.declarations.contains(&(EntityKind::Struct, "Store".to_string())));
        assert!(hints.declarations.contains(&(EntityKind::Function, "open".to_string())));
    }

    #[test]
    fn test_unknown_language_has_no_hints() {
        let hints = extract_hints("anything", Language::Markdown);
        assert!(hints.is_empty());
        assert_eq!(hints.render(), "");
    }
}
