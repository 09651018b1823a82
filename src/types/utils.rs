//! Shared utility functions for JSON extraction and token accounting.
//!
//! ## JSON Extraction Helpers
//!
//! Provides ergonomic helpers for extracting values from `serde_json::Value`:
//! - `json_string` - Extract strings
//! - `json_string_array` - Extract string arrays
//! - `json_f64` - Extract numbers

use std::fmt::Display;

// =============================================================================
// JSON Value Extraction Helpers
// =============================================================================

/// Extract string from JSON value by key.
#[inline]
pub fn json_string(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(String::from)
}

/// Extract string array from JSON value by key.
#[inline]
pub fn json_string_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Extract f64 with default.
#[inline]
pub fn json_f64(value: &serde_json::Value, key: &str, default: f64) -> f64 {
    value.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// Filter an iterator of Results, logging errors at warn level before discarding.
pub fn log_filter_warn<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{}: {}", context, e);
            None
        }
    }
}

// =============================================================================
// Token Estimation
// =============================================================================

/// Token estimation configuration for different content types
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    /// Characters per token for ASCII text (default: 4.0)
    pub ascii_chars_per_token: f32,
    /// Characters per token for non-ASCII (CJK, etc.) (default: 1.5)
    pub non_ascii_chars_per_token: f32,
    /// Extra tokens per line for code structure (default: 0.5)
    pub code_overhead_per_line: f32,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            ascii_chars_per_token: 4.0,
            non_ascii_chars_per_token: 1.5,
            code_overhead_per_line: 0.5,
        }
    }
}

impl TokenEstimator {
    /// Create estimator tuned for source code
    pub fn for_code() -> Self {
        Self {
            ascii_chars_per_token: 3.5,
            non_ascii_chars_per_token: 1.5,
            code_overhead_per_line: 0.8,
        }
    }

    pub fn estimate(&self, content: &str) -> usize {
        if content.is_empty() {
            return 0;
        }

        let (ascii_chars, non_ascii_chars) =
            content.chars().fold((0usize, 0usize), |(a, n), c| {
                if c.is_ascii() { (a + 1, n) } else { (a, n + 1) }
            });

        let line_count = content.lines().count();
        let code_overhead = (line_count as f32 * self.code_overhead_per_line) as usize;

        let ascii_tokens = (ascii_chars as f32 / self.ascii_chars_per_token) as usize;
        let non_ascii_tokens = (non_ascii_chars as f32 / self.non_ascii_chars_per_token) as usize;

        ascii_tokens + non_ascii_tokens + code_overhead
    }
}

/// Estimate token count from prose content
#[inline]
pub fn estimate_tokens(content: &str) -> usize {
    TokenEstimator::default().estimate(content)
}

/// Estimate tokens specifically for code content
#[inline]
pub fn estimate_code_tokens(content: &str) -> usize {
    TokenEstimator::for_code().estimate(content)
}

/// Marker appended to content cut by [`truncate_to_token_limit`]
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Truncate content to fit within token limit
///
/// Prefers paragraph boundaries, then line boundaries, and never splits a
/// UTF-8 character.
pub fn truncate_to_token_limit(content: &str, max_tokens: usize) -> String {
    let estimated = estimate_tokens(content);
    if estimated <= max_tokens {
        return content.to_string();
    }

    let ratio = max_tokens as f64 / estimated as f64;
    let mut max_chars = ((content.len() as f64 * ratio * 0.95) as usize).min(content.len());
    while !content.is_char_boundary(max_chars) {
        max_chars -= 1;
    }

    let truncated = &content[..max_chars];
    let cut = truncated
        .rfind("\n\n")
        .or_else(|| truncated.rfind('\n'))
        .unwrap_or(truncated.len());

    format!("{}{}", &content[..cut], TRUNCATION_MARKER)
}

/// Truncate to a character count on a char boundary
pub fn truncate_chars(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}
