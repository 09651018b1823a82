//! Analysis records: the cached, immutable per-file analysis result.
//!
//! A record is keyed by the content hash of the file it describes and holds no
//! path, so identical content anywhere in any run maps to the same record.
//! Paths are joined back in by the pipeline when records are assembled.

use serde::{Deserialize, Serialize};

use super::{ContentHash, Result, sha256_hex};

/// Summary stored on records produced after an unrecoverable sub-failure
pub const DEGRADED_SUMMARY: &str = "analysis failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Module,
    Class,
    Struct,
    Interface,
    Trait,
    Enum,
    Function,
    Method,
    Constant,
    Variable,
    Type,
    Endpoint,
    Other,
}

impl EntityKind {
    /// Lenient parse of the kind names models tend to produce
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "module" | "package" | "namespace" | "file" => Self::Module,
            "class" => Self::Class,
            "struct" | "record" | "dataclass" => Self::Struct,
            "interface" | "protocol" => Self::Interface,
            "trait" => Self::Trait,
            "enum" | "enumeration" => Self::Enum,
            "function" | "fn" | "func" | "procedure" => Self::Function,
            "method" | "constructor" => Self::Method,
            "constant" | "const" => Self::Constant,
            "variable" | "var" | "field" | "property" => Self::Variable,
            "type" | "type_alias" | "typedef" => Self::Type,
            "endpoint" | "route" | "api" => Self::Endpoint,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Trait => "trait",
            Self::Enum => "enum",
            Self::Function => "function",
            Self::Method => "method",
            Self::Constant => "constant",
            Self::Variable => "variable",
            Self::Type => "type",
            Self::Endpoint => "endpoint",
            Self::Other => "other",
        }
    }

    /// Kinds that take part in inheritance
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            Self::Class | Self::Struct | Self::Interface | Self::Trait | Self::Enum
        )
    }

    /// Kinds that become nodes in per-entity diagrams
    pub fn is_major(&self) -> bool {
        matches!(
            self,
            Self::Module
                | Self::Class
                | Self::Struct
                | Self::Interface
                | Self::Trait
                | Self::Enum
                | Self::Function
                | Self::Type
                | Self::Endpoint
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Imports,
    Calls,
    Owns,
    Extends,
    Implements,
    Uses,
}

impl RelationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "imports" | "import" | "depends_on" | "requires" | "includes" => Some(Self::Imports),
            "calls" | "call" | "invokes" => Some(Self::Calls),
            "owns" | "contains" | "has" | "composes" | "aggregates" => Some(Self::Owns),
            "extends" | "inherits" | "subclasses" => Some(Self::Extends),
            "implements" | "realizes" => Some(Self::Implements),
            "uses" | "references" | "reads" | "writes" => Some(Self::Uses),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imports => "imports",
            Self::Calls => "calls",
            Self::Owns => "owns",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::Uses => "uses",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared entity with a one-line signature summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub signature: String,
}

/// Relationship between two entities of the same file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    pub kind: RelationKind,
    pub confidence: f32,
}

/// Outgoing reference to another module, as written in the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub target: String,
    pub kind: RelationKind,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Complete,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub content_hash: ContentHash,
    pub status: RecordStatus,
    pub summary: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Names this file refers to but does not declare
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

impl AnalysisRecord {
    /// Record for a file whose analysis could not be completed
    pub fn degraded(content_hash: ContentHash, reason: impl Into<String>) -> Self {
        Self {
            content_hash,
            status: RecordStatus::Degraded,
            summary: DEGRADED_SUMMARY.to_string(),
            responsibilities: Vec::new(),
            entities: Vec::new(),
            relationships: Vec::new(),
            dependencies: Vec::new(),
            mentions: Vec::new(),
            degraded_reason: Some(reason.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == RecordStatus::Degraded
    }

    /// Serialized form used for persistence, checksums and digests
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// CRC32 over the canonical bytes
    pub fn checksum(&self) -> Result<u32> {
        Ok(crc32fast::hash(&self.canonical_bytes()?))
    }

    /// SHA-256 over the canonical bytes; identifies this exact record
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_hex(&self.canonical_bytes()?))
    }

    pub fn declares(&self, name: &str) -> bool {
        self.entities.iter().any(|e| e.name == name)
    }

    pub fn major_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.kind.is_major())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnalysisRecord {
        AnalysisRecord {
            content_hash: ContentHash::of(b"class A: pass"),
            status: RecordStatus::Complete,
            summary: "Defines A".into(),
            responsibilities: vec!["model".into()],
            entities: vec![Entity {
                name: "A".into(),
                kind: EntityKind::Class,
                signature: "class A".into(),
            }],
            relationships: vec![],
            dependencies: vec![Dependency {
                target: "b".into(),
                kind: RelationKind::Imports,
                confidence: 0.9,
            }],
            mentions: vec!["B".into()],
            degraded_reason: None,
        }
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!(EntityKind::parse("Class"), EntityKind::Class);
        assert_eq!(EntityKind::parse("fn"), EntityKind::Function);
        assert_eq!(EntityKind::parse("widget"), EntityKind::Other);
        assert!(EntityKind::Class.is_major());
        assert!(!EntityKind::Method.is_major());
    }

    #[test]
    fn test_relation_kind_parse() {
        assert_eq!(RelationKind::parse("import"), Some(RelationKind::Imports));
        assert_eq!(RelationKind::parse("inherits"), Some(RelationKind::Extends));
        assert_eq!(RelationKind::parse("teleports"), None);
    }

    #[test]
    fn test_degraded_record() {
        let r = AnalysisRecord::degraded(ContentHash::of(b"x"), "rate limited");
        assert!(r.is_degraded());
        assert_eq!(r.summary, DEGRADED_SUMMARY);
        assert!(r.entities.is_empty());
    }

    #[test]
    fn test_digest_and_checksum_are_stable() {
        let a = sample();
        let b = sample();
        assert_eq!(a.digest().ok(), b.digest().ok());
        assert_eq!(a.checksum().ok(), b.checksum().ok());

        let mut c = sample();
        c.summary = "Defines A differently".into();
        assert_ne!(a.digest().ok(), c.digest().ok());
    }

    #[test]
    fn test_serde_round_trip_preserves_bytes() {
        let a = sample();
        let bytes = a.canonical_bytes().unwrap();
        let back: AnalysisRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, a);
        assert_eq!(back.canonical_bytes().unwrap(), bytes);
    }
}
