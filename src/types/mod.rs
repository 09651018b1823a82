pub mod error;
pub mod record;
pub mod snapshot;
pub mod utils;

pub use error::{
    AtlasError, ErrorClassifier, Result, ResultExt, TransportError, TransportErrorKind,
    ValidationError, ValidationErrorKind,
};
pub use record::{
    AnalysisRecord, DEGRADED_SUMMARY, Dependency, Entity, EntityKind, RecordStatus,
    RelationKind, Relationship,
};
pub use snapshot::{FileEntry, RepositorySnapshot};
pub use utils::{
    TRUNCATION_MARKER, TokenEstimator, estimate_code_tokens, estimate_tokens, json_f64,
    json_string, json_string_array, log_filter_warn, truncate_chars,
    truncate_to_token_limit,
};

// =============================================================================
// Domain Newtypes
// =============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 of a file's bytes
///
/// The key of the content cache. Two files with identical content always
/// share a hash regardless of path or run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(sha256_hex(bytes))
    }

    /// Wrap an already computed hex digest
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AtlasError::InvalidInput(format!(
                "not a sha256 hex digest: {}",
                hex
            )));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for logs
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex SHA-256 helper shared by cache keys and record digests
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Type-safe wrapper for query session IDs
///
/// Prevents accidental mixing of session IDs with other string types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random session id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable identifier of a documentation or diagram node
///
/// Derived from paths only (`dir:src/app`, `file:src/app/a.py`), so the same
/// record set always yields the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub const ROOT: &'static str = "root";

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn directory(path: &str) -> Self {
        Self(format!("dir:{}", path))
    }

    pub fn file(path: &str) -> Self {
        Self(format!("file:{}", path))
    }

    pub fn entity(path: &str, name: &str) -> Self {
        Self(format!("entity:{}#{}", path, name))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
