//! Analysis pipeline
//!
//! ```text
//! RepositorySnapshot → PlanBuilder → FileAnalyzer (fan-out) → RecordSet
//!                                                               ↓
//!                                   DocumentationAssembler + DiagramSynthesizer
//!                                                               ↓
//!                                                           Artifacts
//! ```

pub mod artifacts;
pub mod diagram;
pub mod documentation;
pub mod file_analyzer;
pub mod orchestrator;
pub mod parsers;
pub mod plan;
pub mod prompts;
pub mod records;
pub mod status;

pub use artifacts::{ArtifactHub, Artifacts};
pub use diagram::{
    ComponentKind, ComponentNode, DiagramCache, DiagramConfig, DiagramFormat, DiagramModel,
    DiagramOutcome, DiagramSynthesizer, Edge, Granularity,
};
pub use documentation::{
    CrossReference, DocNodeKind, DocumentationAssembler, DocumentationNode, DocumentationTree,
    Resolution, render_markdown,
};
pub use file_analyzer::FileAnalyzer;
pub use orchestrator::{Orchestrator, RunOptions};
pub use plan::{
    CostEstimate, Disposition, Grouping, PlanBudget, PlanBuilder, Selection, WorkItem, WorkPlan,
    WorkTarget,
};
pub use records::{RecordEntry, RecordSet};
pub use status::{DegradedFile, RunState, RunStatus};
