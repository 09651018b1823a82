//! Model Response Parsers
//!
//! Shape validation for the file analysis response. The model is an
//! untrusted source: the object must parse, `summary` must be present, and
//! list fields must be arrays. Individual malformed items are dropped.

use serde_json::Value;

use crate::ai::validation::extract_json_object;
use crate::constants::analysis;
use crate::types::{
    AnalysisRecord, ContentHash, Dependency, Entity, EntityKind, RecordStatus, RelationKind,
    Relationship, ValidationError, ValidationErrorKind, json_f64, json_string, json_string_array,
    truncate_chars,
};

/// Parse a file analysis response into a complete record
pub fn parse_analysis_response(
    content_hash: &ContentHash,
    response: &str,
) -> Result<AnalysisRecord, ValidationError> {
    let value = extract_json_object(response)?;

    let summary = json_string(&value, "summary")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::missing("summary"))?;
    let summary = truncate_chars(&summary, analysis::MAX_SUMMARY_CHARS).to_string();

    let mut entities: Vec<Entity> = items(&value, "entities")?
        .iter()
        .filter_map(parse_entity)
        .collect();
    dedup_by_key(&mut entities, |e| e.name.clone());

    let relationships = items(&value, "relationships")?
        .iter()
        .filter_map(parse_relationship)
        .collect();

    let mut dependencies: Vec<Dependency> = items(&value, "dependencies")?
        .iter()
        .filter_map(parse_dependency)
        .collect();
    dedup_by_key(&mut dependencies, |d| d.target.clone());

    let mut mentions = json_string_array(&value, "mentions");
    mentions.retain(|m| !m.trim().is_empty() && !entities.iter().any(|e| &e.name == m));
    mentions.sort();
    mentions.dedup();

    Ok(AnalysisRecord {
        content_hash: content_hash.clone(),
        status: RecordStatus::Complete,
        summary,
        responsibilities: json_string_array(&value, "responsibilities"),
        entities,
        relationships,
        dependencies,
        mentions,
        degraded_reason: None,
    })
}

/// Array field, empty when absent, error when present with another type
fn items<'a>(value: &'a Value, field: &str) -> Result<&'a [Value], ValidationError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(
            ValidationError::new(ValidationErrorKind::Format, "expected an array").with_field(field),
        ),
    }
}

fn confidence(item: &Value) -> f32 {
    let raw = json_f64(item, "confidence", analysis::DEFAULT_CONFIDENCE as f64);
    if raw.is_finite() {
        raw.clamp(0.0, 1.0) as f32
    } else {
        analysis::DEFAULT_CONFIDENCE
    }
}

fn non_empty(item: &Value, key: &str) -> Option<String> {
    json_string(item, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_entity(item: &Value) -> Option<Entity> {
    Some(Entity {
        name: non_empty(item, "name")?,
        kind: json_string(item, "kind")
            .map(|k| EntityKind::parse(&k))
            .unwrap_or(EntityKind::Other),
        signature: json_string(item, "signature").unwrap_or_default(),
    })
}

fn parse_relationship(item: &Value) -> Option<Relationship> {
    Some(Relationship {
        from: non_empty(item, "from")?,
        to: non_empty(item, "to")?,
        kind: RelationKind::parse(&json_string(item, "kind")?)?,
        confidence: confidence(item),
    })
}

fn parse_dependency(item: &Value) -> Option<Dependency> {
    // Bare strings are accepted as plain imports
    if let Some(target) = item.as_str() {
        let target = target.trim();
        return (!target.is_empty()).then(|| Dependency {
            target: target.to_string(),
            kind: RelationKind::Imports,
            confidence: analysis::DEFAULT_CONFIDENCE,
        });
    }
    Some(Dependency {
        target: non_empty(item, "target")?,
        kind: json_string(item, "kind")
            .and_then(|k| RelationKind::parse(&k))
            .unwrap_or(RelationKind::Imports),
        confidence: confidence(item),
    })
}

fn dedup_by_key<T, K: Ord>(items: &mut Vec<T>, key: impl Fn(&T) -> K) {
    let mut seen = std::collections::BTreeSet::new();
    items.retain(|item| seen.insert(key(item)));
}
