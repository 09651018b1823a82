//! Candidate selection and context budgeting.
//!
//! Scoring per query token, counted once per field:
//! - entity name match: 3
//! - path segment match: 2
//! - summary or responsibility word: 1
//!
//! Tokens from recent questions of the session count half, and nodes cited
//! in recent turns get a flat continuity bonus.

use std::collections::BTreeSet;

use super::session::Turn;
use crate::pipeline::RecordSet;
use crate::pipeline::records::RecordEntry;
use crate::types::{NodeId, estimate_tokens, truncate_to_token_limit};

const ENTITY_WEIGHT: f32 = 3.0;
const PATH_WEIGHT: f32 = 2.0;
const TEXT_WEIGHT: f32 = 1.0;
const HISTORY_FACTOR: f32 = 0.5;
const CITED_BONUS: f32 = 1.0;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "has", "have", "how",
    "its", "was", "what", "when", "where", "which", "who", "why", "with", "this", "that", "these",
    "those", "from", "into", "does", "did", "there", "their", "then", "than", "they", "them",
    "about", "would", "could", "should", "will", "also", "just", "some", "file", "files", "code",
    "explain", "tell", "show", "use", "used", "uses", "using",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: NodeId,
    pub path: String,
    pub score: f32,
    /// Prompt block for this node
    pub context: String,
    pub tokens: usize,
}

/// Lowercase alphanumeric words of at least three characters, stopwords removed
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Whole identifier plus its camelCase and snake_case parts
fn identifier_tokens(name: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    let whole = name.to_lowercase();
    if whole.chars().count() >= 3 {
        tokens.insert(whole);
    }

    let mut word = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        let boundary = !c.is_alphanumeric() || (c.is_uppercase() && prev_lower);
        if boundary && !word.is_empty() {
            tokens.extend(tokenize(&word));
            word.clear();
        }
        if c.is_alphanumeric() {
            word.push(c);
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    tokens.extend(tokenize(&word));
    tokens
}

struct Index {
    entity: BTreeSet<String>,
    path: BTreeSet<String>,
    text: BTreeSet<String>,
}

impl Index {
    fn of(entry: &RecordEntry) -> Self {
        let record = &entry.record;
        let entity = record
            .entities
            .iter()
            .flat_map(|e| identifier_tokens(&e.name))
            .collect();
        let path = entry.path.split('/').flat_map(identifier_tokens).collect();
        let mut text = tokenize(&record.summary);
        for responsibility in &record.responsibilities {
            text.extend(tokenize(responsibility));
        }
        Self { entity, path, text }
    }

    fn score(&self, tokens: &BTreeSet<String>) -> f32 {
        tokens
            .iter()
            .map(|t| {
                let mut s = 0.0;
                if self.entity.contains(t) {
                    s += ENTITY_WEIGHT;
                }
                if self.path.contains(t) {
                    s += PATH_WEIGHT;
                }
                if self.text.contains(t) {
                    s += TEXT_WEIGHT;
                }
                s
            })
            .sum()
    }
}

/// Most relevant file nodes for `question`, best first, ties by path
pub fn select_candidates(
    records: &RecordSet,
    question: &str,
    history: &[Turn],
    max_candidates: usize,
) -> Vec<Candidate> {
    let query = tokenize(question);
    let mut previous = BTreeSet::new();
    let mut cited = BTreeSet::new();
    for turn in history {
        previous.extend(tokenize(&turn.question));
        cited.extend(turn.cited.iter().cloned());
    }
    let previous: BTreeSet<String> = previous.difference(&query).cloned().collect();

    let mut scored: Vec<Candidate> = records
        .iter()
        .filter_map(|entry| {
            let index = Index::of(entry);
            let id = NodeId::file(&entry.path);
            let mut score = index.score(&query) + HISTORY_FACTOR * index.score(&previous);
            if cited.contains(&id) {
                score += CITED_BONUS;
            }
            if score <= 0.0 {
                return None;
            }
            let context = render_context(entry);
            Some(Candidate {
                id,
                path: entry.path.clone(),
                score,
                tokens: estimate_tokens(&context),
                context,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
    scored.truncate(max_candidates);
    scored
}

/// Keep candidates in relevance order while they fit `max_tokens`; the
/// least relevant are dropped first. A lone first candidate that is too
/// large is truncated rather than dropped.
pub fn fit_budget(candidates: Vec<Candidate>, max_tokens: usize) -> Vec<Candidate> {
    let mut kept = Vec::new();
    let mut used = 0;
    for mut candidate in candidates {
        if used + candidate.tokens <= max_tokens {
            used += candidate.tokens;
            kept.push(candidate);
            continue;
        }
        if kept.is_empty() && max_tokens > 0 {
            candidate.context = truncate_to_token_limit(&candidate.context, max_tokens);
            candidate.tokens = estimate_tokens(&candidate.context);
            kept.push(candidate);
        }
        break;
    }
    kept
}

fn render_context(entry: &RecordEntry) -> String {
    let record = &entry.record;
    let mut out = format!("[{}]\nPath: {}\nSummary: {}\n", NodeId::file(&entry.path), entry.path, record.summary);

    if !record.responsibilities.is_empty() {
        out.push_str("Responsibilities:\n");
        for r in &record.responsibilities {
            out.push_str(&format!("- {}\n", r));
        }
    }
    if !record.entities.is_empty() {
        out.push_str("Entities:\n");
        for e in &record.entities {
            if e.signature.is_empty() {
                out.push_str(&format!("- {} {}\n", e.kind.as_str(), e.name));
            } else {
                out.push_str(&format!("- {} {}: {}\n", e.kind.as_str(), e.name, e.signature));
            }
        }
    }
    if !record.dependencies.is_empty() {
        let deps: BTreeSet<&str> = record.dependencies.iter().map(|d| d.target.as_str()).collect();
        let list: Vec<&str> = deps.into_iter().collect();
        out.push_str(&format!("Depends on: {}\n", list.join(", ")));
    }
    out
}
