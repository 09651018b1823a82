//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//! Model-transport failures are classified into a small set of kinds that
//! drive retry and degradation decisions.
//!
//! ## Error Taxonomy
//!
//! - **PlanEmpty**: selection yields nothing to analyze (fatal to a run)
//! - **Transport**: rate limit, timeout or unavailable transport (retryable)
//! - **MalformedResponse**: model output failed schema validation (retry once, then degrade)
//! - **InsufficientData**: too few entities for a diagram (non-fatal)
//! - **CacheCorruption**: a cached record failed its integrity check (fatal)

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Transport Error Kinds
// =============================================================================

/// Failure kinds reported by the model-invocation transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Provider asked us to slow down
    RateLimited,
    /// Call did not complete within its deadline
    Timeout,
    /// Provider could not be reached or refused to serve
    Unavailable,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

impl TransportErrorKind {
    /// Default wait before the next attempt when the provider gives no hint
    pub fn recommended_delay(&self) -> Duration {
        match self {
            Self::RateLimited => Duration::from_secs(10),
            Self::Timeout => Duration::from_secs(2),
            Self::Unavailable => Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Transport Error
// =============================================================================

/// Transport failure with kind, provider context, and retry hint
#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub provider: Option<String>,
    /// Suggested wait time before retry (if the provider sent one)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.kind, self.message)
        } else {
            write!(f, "[{}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unavailable, message)
    }

    /// Add provider context to existing error
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Add suggested retry delay
    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn recommended_delay(&self) -> Duration {
        self.retry_after
            .unwrap_or_else(|| self.kind.recommended_delay())
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw provider failures onto [`TransportErrorKind`]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> TransportError {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
            || lower.contains("overloaded")
        {
            return TransportError::rate_limited(message).provider(provider);
        }

        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline")
        {
            return TransportError::timeout(message).provider(provider);
        }

        // Connection, auth and server-side failures all mean the transport cannot serve us
        TransportError::unavailable(message).provider(provider)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> TransportError {
        match status {
            429 => TransportError::rate_limited(message).provider(provider),
            408 | 504 => TransportError::timeout(message).provider(provider),
            _ => TransportError::unavailable(message).provider(provider),
        }
    }

    /// Classify a reqwest failure raised before any status was received
    pub fn classify_request_error(err: &reqwest::Error, provider: &str) -> TransportError {
        if err.is_timeout() {
            TransportError::timeout(err.to_string()).provider(provider)
        } else if let Some(status) = err.status() {
            Self::classify_http_status(status.as_u16(), &err.to_string(), provider)
        } else {
            TransportError::unavailable(err.to_string()).provider(provider)
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Structured validation error with context
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Field or component that failed validation
    pub field: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Validation failed for '{}': {}", field, self.message)
        } else {
            write!(f, "Validation failed: {}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            message: message.into(),
        }
    }

    /// Add field context
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn missing(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(
            ValidationErrorKind::MissingField,
            format!("required field '{}' is missing", field),
        )
        .with_field(field)
    }
}

/// Validation error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// No JSON object could be extracted from the response
    Schema,
    /// Required field missing
    MissingField,
    /// Field present with the wrong type or shape
    Format,
    /// Value out of range
    Range,
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Model transport lost after {failures} consecutive unavailable responses")]
    TransportLost { failures: u32 },

    /// Operation timeout with context
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    #[error("Nothing to analyze: {selection} yields zero eligible files")]
    PlanEmpty { selection: String },

    #[error("Malformed model response: {0}")]
    MalformedResponse(ValidationError),

    #[error("Insufficient data: {available} entities available, {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("Cache corruption for {key}: {reason}")]
    CacheCorruption { key: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not initialized: run 'repoatlas init' first")]
    NotInitialized,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<TransportError> for AtlasError {
    fn from(err: TransportError) -> Self {
        AtlasError::Transport(err)
    }
}

impl From<ValidationError> for AtlasError {
    fn from(err: ValidationError) -> Self {
        AtlasError::MalformedResponse(err)
    }
}

impl From<figment::Error> for AtlasError {
    fn from(err: figment::Error) -> Self {
        AtlasError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AtlasError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl AtlasError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn corruption(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CacheCorruption {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Transport kind of this error, with deadline expiry folded into `Timeout`
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport(e) => Some(e.kind),
            Self::Timeout { .. } => Some(TransportErrorKind::Timeout),
            _ => None,
        }
    }

    /// Check if this error can be retried against the transport
    pub fn is_retryable(&self) -> bool {
        self.transport_kind().is_some()
    }

    /// Errors that abort a whole run instead of degrading one item
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PlanEmpty { .. }
                | Self::CacheCorruption { .. }
                | Self::TransportLost { .. }
                | Self::Database(_)
                | Self::Pool(_)
        )
    }

    /// Suggested wait before retrying, when the error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport(e) => e.retry_after,
            _ => None,
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| AtlasError::Storage(format!("{}: {}", context.into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportErrorKind::RateLimited.to_string(), "RATE_LIMITED");
        assert_eq!(TransportErrorKind::Unavailable.to_string(), "UNAVAILABLE");
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = ErrorClassifier::classify("Rate limit exceeded, please retry", "openai");
        assert_eq!(err.kind, TransportErrorKind::RateLimited);
        assert_eq!(err.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn test_classify_timeout_and_fallback() {
        assert_eq!(
            ErrorClassifier::classify("request timed out", "ollama").kind,
            TransportErrorKind::Timeout
        );
        assert_eq!(
            ErrorClassifier::classify("connection refused", "ollama").kind,
            TransportErrorKind::Unavailable
        );
    }

    #[test]
    fn test_classify_http_status() {
        assert_eq!(
            ErrorClassifier::classify_http_status(429, "slow down", "openai").kind,
            TransportErrorKind::RateLimited
        );
        assert_eq!(
            ErrorClassifier::classify_http_status(504, "gateway", "openai").kind,
            TransportErrorKind::Timeout
        );
        assert_eq!(
            ErrorClassifier::classify_http_status(401, "bad key", "openai").kind,
            TransportErrorKind::Unavailable
        );
    }

    #[test]
    fn test_retry_hint() {
        let err = TransportError::rate_limited("busy").retry_after(Duration::from_secs(3));
        assert_eq!(err.recommended_delay(), Duration::from_secs(3));
        let err = TransportError::timeout("slow");
        assert_eq!(err.recommended_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_fatal_and_retryable() {
        assert!(AtlasError::from(TransportError::unavailable("down")).is_retryable());
        assert!(AtlasError::timeout("generate", Duration::from_secs(1)).is_retryable());
        assert!(
            AtlasError::PlanEmpty {
                selection: "src".into()
            }
            .is_fatal()
        );
        assert!(AtlasError::corruption("abc", "checksum").is_fatal());
        assert!(!AtlasError::InsufficientData {
            available: 0,
            required: 1
        }
        .is_fatal());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::missing("summary");
        assert_eq!(err.kind, ValidationErrorKind::MissingField);
        assert!(err.to_string().contains("summary"));
    }
}
