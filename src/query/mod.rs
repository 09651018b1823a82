//! Context-Aware Query Engine
//!
//! Answers questions about an analyzed repository from a bounded slice of
//! the published artifacts:
//! - Retrieval: lexical and entity-name matching against the question and
//!   the session's recent turns
//! - Budgeting: candidates are added in relevance order until the context
//!   budget is spent
//! - Grounding: citations name only nodes that were in the prompt and exist
//!   in the current artifacts
//!
//! Sessions are explicit per-id conversation state with idle expiry. The
//! engine reads artifacts and never mutates them.

mod engine;
mod prompts;
mod retrieval;
mod session;

pub use engine::{Answer, QueryEngine};
pub use retrieval::{Candidate, fit_budget, select_candidates, tokenize};
pub use session::{ConversationState, SessionStore, Turn};

use serde::{Deserialize, Serialize};

use crate::constants::query;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub max_candidates: usize,
    /// Estimated tokens of retrieved context per prompt
    pub max_context_tokens: usize,
    /// Prior turns consulted for continuity
    pub history_turns: usize,
    pub session_idle_minutes: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_candidates: query::DEFAULT_MAX_CANDIDATES,
            max_context_tokens: query::DEFAULT_MAX_CONTEXT_TOKENS,
            history_turns: query::DEFAULT_HISTORY_TURNS,
            session_idle_minutes: query::DEFAULT_SESSION_IDLE_MINUTES,
        }
    }
}

impl QueryConfig {
    pub fn session_idle(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_idle_minutes * 60)
    }
}
