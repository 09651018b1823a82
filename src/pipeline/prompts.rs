//! Analysis Prompts
//!
//! The file prompt is bounded: truncated file content plus minimal
//! repository context (directory neighbours and regex structural hints).
//! Every prompt carries a `Path:` line naming the file.

use crate::analyzer::extract_hints;
use crate::constants::analysis;
use crate::types::{FileEntry, RepositorySnapshot, truncate_chars};

const RESPONSE_SCHEMA: &str = r#"{
  "summary": "one short paragraph",
  "responsibilities": ["..."],
  "entities": [{"name": "...", "kind": "class|struct|function|endpoint|...", "signature": "..."}],
  "relationships": [{"from": "entity", "to": "entity", "kind": "calls|owns|extends|implements|uses", "confidence": 0.0}],
  "dependencies": [{"target": "import spec as written", "kind": "imports|calls|uses", "confidence": 0.0}],
  "mentions": ["names used here but declared elsewhere"]
}"#;

/// Build the analysis prompt for one file
///
/// `strict` is used for the single retry after a malformed response.
pub fn build_analysis_prompt(
    file: &FileEntry,
    snapshot: &RepositorySnapshot,
    max_chars: usize,
    strict: bool,
) -> String {
    let mut prompt = String::with_capacity(max_chars + 2048);

    prompt.push_str(
        r#"<ROLE>
You extract structural facts from one source file for a documentation generator.
Report only what the code shows. Do not guess at behaviour that is not visible.
</ROLE>

"#,
    );

    prompt.push_str("# File\n\n");
    prompt.push_str(&format!("Path: {}\n", file.path));
    prompt.push_str(&format!("Language: {}\n", file.language));
    prompt.push_str(&format!("Size: {} bytes\n\n", file.size));

    let neighbours: Vec<&str> = snapshot
        .neighbours(&file.path)
        .take(analysis::MAX_NEIGHBOURS)
        .map(|f| f.file_name())
        .collect();
    if !neighbours.is_empty() {
        prompt.push_str("# Directory Neighbours\n\n");
        prompt.push_str(&neighbours.join(", "));
        prompt.push_str("\n\n");
    }

    let hints = extract_hints(file.content(), file.language);
    if !hints.is_empty() {
        prompt.push_str("# Structural Hints (regex scan, may be incomplete)\n\n");
        prompt.push_str(&hints.render());
        prompt.push('\n');
    }

    let content = truncate_chars(file.content(), max_chars);
    prompt.push_str(&format!("```{}\n", file.language.highlight_str()));
    prompt.push_str(content);
    if content.len() < file.content().len() {
        prompt.push_str(crate::types::TRUNCATION_MARKER);
    }
    prompt.push_str("\n```\n\n");

    prompt.push_str("# Output\n\nRespond with a JSON object of this shape:\n\n");
    prompt.push_str(RESPONSE_SCHEMA);
    prompt.push_str(
        "\n\n- `dependencies` lists imports exactly as written in the source\n\
         - `confidence` is a number between 0 and 1\n\
         - HTTP routes are entities of kind `endpoint` named `METHOD /path`\n\
         - Inheritance between types uses `extends` or `implements`\n\
         - Omit entities you cannot name\n",
    );

    if strict {
        prompt.push_str(
            r#"
<STRICT>
Your previous answer could not be parsed.
Return ONLY the JSON object. No prose, no markdown fences.
`summary` must be a non-empty string. Every entity must have a `name`.
</STRICT>
"#,
        );
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::prompt_path;

    #[test]
    fn test_prompt_is_bounded_and_tagged() {
        let body = format!("import os\nclass Big:\n{}", "    x = 1\n".repeat(500));
        let snap = RepositorySnapshot::from_contents([
            ("pkg/big.py".to_string(), body),
            ("pkg/util.py".to_string(), "def f(): pass".to_string()),
        ]);
        let file = snap.get("pkg/big.py").unwrap();
        let prompt = build_analysis_prompt(file, &snap, 200, false);

        assert_eq!(prompt_path(&prompt), Some("pkg/big.py"));
        assert!(prompt.contains("util.py"));
        assert!(prompt.contains("class Big"));
        assert!(prompt.contains("[truncated]"));
        assert!(!prompt.contains("<STRICT>"));
        assert!(prompt.len() < 200 + 3000);
    }

    #[test]
    fn test_strict_prompt() {
        let snap = RepositorySnapshot::from_contents([("a.py", "x = 1")]);
        let prompt = build_analysis_prompt(&snap.files()[0], &snap, 1000, true);
        assert!(prompt.contains("<STRICT>"));
        assert!(!prompt.contains("[truncated]"));
    }
}
