//! JSON Repair
//!
//! Handles common model JSON output issues:
//! - Markdown code fence wrapping (```json ... ```)
//! - JSON embedded in explanatory text
//! - Trailing commas before `}` or `]`

use serde_json::Value;
use tracing::debug;

use crate::types::{ValidationError, ValidationErrorKind};

/// Extract a JSON object from a model response
pub fn extract_json_object(content: &str) -> Result<Value, ValidationError> {
    JsonRepairer::new().parse_object(content)
}

#[derive(Debug, Default)]
pub struct JsonRepairer;

impl JsonRepairer {
    pub fn new() -> Self {
        Self
    }

    /// Parse the first JSON object found in `raw`, repairing if needed
    pub fn parse_object(&self, raw: &str) -> Result<Value, ValidationError> {
        let cleaned = strip_code_fence(raw.trim());

        let candidates = [
            Some(cleaned.to_string()),
            balanced_object(cleaned).map(String::from),
            balanced_object(cleaned).map(remove_trailing_commas),
        ];

        for (attempt, candidate) in candidates.into_iter().flatten().enumerate() {
            if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
                if attempt > 0 {
                    debug!(attempt, "JSON recovered from response text");
                }
                return match value {
                    Value::Object(_) => Ok(value),
                    other => Err(ValidationError::new(
                        ValidationErrorKind::Format,
                        format!("expected a JSON object, got {}", json_type_name(&other)),
                    )),
                };
            }
        }

        Err(ValidationError::new(
            ValidationErrorKind::Schema,
            "no JSON object found in response",
        ))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the language tag line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// First `{ ... }` span with balanced braces, ignoring braces inside strings
fn balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn remove_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let v = extract_json_object(r#"{"summary": "x"}"#).unwrap();
        assert_eq!(v["summary"], "x");
    }

    #[test]
    fn test_code_fence() {
        let v = extract_json_object("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_embedded_in_prose() {
        let raw = "Here is the analysis:\n{\"a\": \"brace } in string\", \"b\": {\"c\": 2}}\nHope this helps.";
        let v = extract_json_object(raw).unwrap();
        assert_eq!(v["b"]["c"], 2);
        assert_eq!(v["a"], "brace } in string");
    }

    #[test]
    fn test_trailing_commas() {
        let v = extract_json_object("{\"a\": [1, 2,], \"b\": \"x,\",}").unwrap();
        assert_eq!(v["a"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(v["b"], "x,");
    }

    #[test]
    fn test_rejects_non_object() {
        let err = extract_json_object("[1, 2, 3]").unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Format);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = extract_json_object("I could not analyze this file.").unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Schema);
        let err = extract_json_object("{\"unterminated\": ").unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Schema);
    }
}
