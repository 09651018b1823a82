//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Retry constants for model calls
pub mod retry {
    /// Total attempts per model call, including the first
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;
}

/// Transport health constants
pub mod transport {
    /// Consecutive exhausted `Unavailable` calls before the transport counts as lost
    pub const LOSS_THRESHOLD: u32 = 5;
}

/// Plan builder constants
pub mod plan {
    /// Prompt scaffolding tokens added to every file estimate
    pub const PROMPT_OVERHEAD_TOKENS: u64 = 600;

    /// Expected response size per analyzed file
    pub const EXPECTED_OUTPUT_TOKENS: u64 = 500;

    /// Throughput used to turn token estimates into time estimates
    pub const DEFAULT_TOKENS_PER_SECOND: u64 = 400;

    /// Files named like this run first
    pub const ENTRY_POINT_FILES: &[&str] = &[
        "main.rs",
        "lib.rs",
        "mod.rs",
        "index.ts",
        "index.js",
        "index.tsx",
        "index.jsx",
        "__init__.py",
        "__main__.py",
        "main.py",
        "app.py",
        "manage.py",
        "main.go",
        "Main.java",
        "Application.java",
        "app.ts",
        "app.js",
        "server.ts",
        "server.js",
        "main.c",
        "main.cpp",
        "Program.cs",
    ];
}

/// File analysis constants
pub mod analysis {
    /// Characters of file content included in a prompt
    pub const DEFAULT_MAX_FILE_CHARS: usize = 24_000;

    /// Directory neighbours listed as repository context
    pub const MAX_NEIGHBOURS: usize = 12;

    /// Confidence assumed when the model omits one
    pub const DEFAULT_CONFIDENCE: f32 = 0.7;

    /// Maximum summary length kept from a response (characters)
    pub const MAX_SUMMARY_CHARS: usize = 1_200;
}

/// Cache constants
pub mod cache {
    /// Memory-tier entry bound
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    /// Memory-tier byte bound (serialized record bytes)
    pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024;
}

/// Diagram constants
pub mod diagram {
    /// Edges below this confidence are omitted
    pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

    /// Minimum entities required to synthesize a diagram
    pub const DEFAULT_MIN_ENTITIES: usize = 1;

    /// Rendered diagrams are capped at this many nodes
    pub const DEFAULT_MAX_NODES: usize = 100;
}

/// Query engine constants
pub mod query {
    pub const DEFAULT_MAX_CANDIDATES: usize = 8;

    /// Prompt context budget for retrieved nodes
    pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 6_000;

    /// Prior turns consulted for continuity
    pub const DEFAULT_HISTORY_TURNS: usize = 3;

    pub const DEFAULT_SESSION_IDLE_MINUTES: u64 = 30;

    /// Note included in prompts and answers when retrieval finds nothing
    pub const NO_CONTEXT_NOTE: &str =
        "No grounded context was found in the analyzed repository for this question.";
}

/// Network constants
pub mod network {
    /// Default timeout for one model call (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 10;
}

/// Storage constants
pub mod storage {
    /// Project-local state directory
    pub const STATE_DIR: &str = ".repoatlas";

    pub const DATABASE_FILE: &str = "atlas.db";

    pub const CONFIG_FILE: &str = "config.toml";
}
