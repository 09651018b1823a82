//! RepoAtlas - Model-Assisted Repository Documentation
//!
//! Analyzes every file of a repository snapshot with a language model,
//! assembles the results into a documentation tree and a component diagram,
//! and answers follow-up questions grounded in those artifacts.
//!
//! ## Core Features
//!
//! - **Content Cache**: analysis records keyed by content hash, so unchanged
//!   files are never re-analyzed
//! - **Budgeted Plans**: token and time budgets decide which files run now
//!   and which are deferred
//! - **Partial Failure**: a file the model cannot handle degrades to a
//!   placeholder, the run still completes
//! - **Diagrams**: file, entity, directory, class hierarchy and endpoint views; Mermaid and DOT
//! - **Conversations**: session-scoped questions with citations
//!
//! ## Quick Start
//!
//! ```ignore
//! use repoatlas::{ContentCache, ModelClient, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! let orchestrator = Orchestrator::new(client, Arc::new(ContentCache::in_memory()));
//! let status = orchestrator.run(Arc::new(snapshot), CancellationToken::new()).await;
//! let artifacts = orchestrator.artifacts().current();
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: model transports, retry, timeouts, transport health
//! - [`analyzer`]: local repository scanning and language detection
//! - [`cache`]: the content-addressed record cache
//! - [`pipeline`]: planning, analysis, documentation and diagrams
//! - [`query`]: the context-aware query engine
//! - [`storage`]: SQLite persistence with connection pooling
//! - [`config`]: layered configuration

pub mod ai;
pub mod analyzer;
pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{AnalysisMode, Config, ConfigLoader, ModeConfig, ProjectScale};

// Error Types
pub use types::error::{AtlasError, Result, ResultExt, TransportError, TransportErrorKind};

// Storage
pub use storage::database::PoolConfig;
pub use storage::{Database, SharedDatabase};

// Domain
pub use types::{AnalysisRecord, ContentHash, FileEntry, NodeId, RepositorySnapshot, SessionId};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use cache::{ContentCache, EvictionPolicy};
pub use pipeline::{
    ArtifactHub, Artifacts, DiagramConfig, DiagramModel, DocumentationTree, Orchestrator,
    PlanBudget, PlanBuilder, RunOptions, RunState, RunStatus, Selection, WorkPlan,
};

// =============================================================================
// AI & Query Re-exports
// =============================================================================

pub use ai::{LlmProvider, ModelClient, RetryPolicy, SharedProvider, TransportHealth, with_timeout};
pub use query::{Answer, QueryConfig, QueryEngine, SessionStore};

// =============================================================================
// Analyzer Re-exports
// =============================================================================

pub use analyzer::{FileScanner, Language};
