use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::QueryConfig;
use super::prompts::{PromptFrame, build_query_prompt};
use super::retrieval::{fit_budget, select_candidates};
use super::session::{SessionStore, Turn};
use crate::ai::ModelClient;
use crate::constants::query::NO_CONTEXT_NOTE;
use crate::pipeline::ArtifactHub;
use crate::types::{NodeId, SessionId, log_filter_warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub session: SessionId,
    pub text: String,
    /// Nodes included in the prompt, most relevant first
    pub cited: Vec<NodeId>,
    /// At least one node of context was found
    pub grounded: bool,
    /// The model could not be reached; `text` explains why
    pub degraded: bool,
}

pub struct QueryEngine {
    client: ModelClient,
    artifacts: Arc<ArtifactHub>,
    sessions: Arc<SessionStore>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(client: ModelClient, artifacts: Arc<ArtifactHub>, config: QueryConfig) -> Self {
        let sessions = Arc::new(SessionStore::new(config.session_idle()));
        Self {
            client,
            artifacts,
            sessions,
            config,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Answer `question` within `session`. Never fails: transport problems
    /// come back as a degraded answer and leave the session unchanged.
    #[instrument(skip(self, question), fields(session = %session))]
    pub async fn ask(&self, session: &SessionId, question: &str) -> Answer {
        log_filter_warn(self.sessions.expire_idle(), "Failed to expire idle sessions");
        let state = self.sessions.open(session).await;
        let mut state = state.lock().await;
        state.touch();

        let history = state.recent(self.config.history_turns).to_vec();
        let frame = PromptFrame::fit(question, &history, self.config.max_context_tokens);
        let candidates = match self.artifacts.current() {
            Some(artifacts) => {
                let found = select_candidates(
                    &artifacts.records,
                    question,
                    &history,
                    self.config.max_candidates,
                );
                let found = found.into_iter().filter(|c| artifacts.contains(&c.id)).collect();
                fit_budget(found, frame.remaining)
            }
            None => Vec::new(),
        };
        let grounded = !candidates.is_empty();
        let cited: Vec<NodeId> = candidates.iter().map(|c| c.id.clone()).collect();
        debug!(candidates = candidates.len(), grounded, "Context selected");

        let note = (!grounded).then_some(NO_CONTEXT_NOTE);
        let prompt = build_query_prompt(&frame, &candidates, note);
        let options = self.client.options().clone().text();

        let text = match self.client.generate_with(&prompt, &options).await {
            Ok(generation) => generation.text.trim().to_string(),
            Err(err) => {
                warn!(error = %err, "Query could not be answered");
                return Answer {
                    session: session.clone(),
                    text: format!("The question could not be answered right now: {}", err),
                    cited: Vec::new(),
                    grounded,
                    degraded: true,
                };
            }
        };
        let text = if grounded {
            text
        } else {
            format!("{}\n\n{}", NO_CONTEXT_NOTE, text)
        };

        let turn = Turn {
            question: question.to_string(),
            answer: text.clone(),
            cited: cited.clone(),
            grounded,
            asked_at: Utc::now(),
        };
        let index = state.push(turn.clone());
        if let Err(err) = self.sessions.persist(session, index, &turn) {
            warn!(error = %err, "Failed to persist conversation turn");
        }

        Answer {
            session: session.clone(),
            text,
            cited,
            grounded,
            degraded: false,
        }
    }

    /// End a session explicitly; returns whether it was live
    pub fn end(&self, session: &SessionId) -> bool {
        self.sessions.end(session).unwrap_or_else(|err| {
            warn!(error = %err, "Failed to end session");
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::ai::{GenerateOptions, RetryPolicy};
    use crate::pipeline::{Artifacts, DiagramModel, DocumentationAssembler, RecordSet};
    use crate::storage::{Database, TurnRow};
    use crate::testing::MockProvider;
    use crate::types::{AnalysisRecord, Entity, EntityKind, FileEntry, RecordStatus, TransportError};

    fn entry(path: &str, summary: &str, entities: &[&str]) -> (FileEntry, Arc<AnalysisRecord>) {
        let file = FileEntry::new(path, format!("# {}", path));
        let record = AnalysisRecord {
            content_hash: file.hash.clone(),
            status: RecordStatus::Complete,
            summary: summary.into(),
            responsibilities: vec![],
            entities: entities
                .iter()
                .map(|n| Entity {
                    name: n.to_string(),
                    kind: EntityKind::Struct,
                    signature: String::new(),
                })
                .collect(),
            relationships: vec![],
            dependencies: vec![],
            mentions: vec![],
            degraded_reason: None,
        };
        (file, Arc::new(record))
    }

    fn hub() -> Arc<ArtifactHub> {
        let records = Arc::new(RecordSet::from_entries(vec![
            entry("src/cache.rs", "Content cache with LRU eviction", &["ContentCache"]),
            entry("src/plan.rs", "Builds the budgeted work plan", &["PlanBuilder"]),
            entry("README.md", "Project overview", &[]),
        ]));
        let hub = Arc::new(ArtifactHub::new());
        hub.publish(Artifacts {
            snapshot_id: "snap".into(),
            documentation: DocumentationAssembler::default().assemble(&records),
            diagram: Arc::new(DiagramModel::default()),
            records,
        });
        hub
    }

    /// Provider that records every prompt it receives
    fn recording(prompts: Arc<Mutex<Vec<String>>>) -> Arc<MockProvider> {
        Arc::new(MockProvider::new(move |prompt, _| {
            prompts.lock().unwrap().push(prompt.to_string());
            Ok("It is in src/cache.rs [file:src/cache.rs].".to_string())
        }))
    }

    fn engine(provider: Arc<MockProvider>, hub: Arc<ArtifactHub>) -> QueryEngine {
        let client = ModelClient::new(provider, GenerateOptions::default(), RetryPolicy::immediate(1));
        QueryEngine::new(client, hub, QueryConfig::default())
    }

    #[tokio::test]
    async fn test_grounded_answer_cites_included_nodes() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let hub = hub();
        let engine = engine(recording(prompts.clone()), hub.clone());
        let session = SessionId::new("s1");

        let answer = engine.ask(&session, "How does the cache evict entries?").await;
        assert!(answer.grounded);
        assert!(!answer.degraded);
        assert_eq!(answer.cited, vec![NodeId::file("src/cache.rs")]);

        let artifacts = hub.current().unwrap();
        assert!(answer.cited.iter().all(|id| artifacts.contains(id)));
        let prompt = prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("[file:src/cache.rs]"));
        assert!(!prompt.contains("[file:src/plan.rs]"));
    }

    #[tokio::test]
    async fn test_no_context_still_asks_with_note() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(recording(prompts.clone()), hub());

        let answer = engine.ask(&SessionId::new("s"), "Which kubernetes operators exist?").await;
        assert!(!answer.grounded);
        assert!(answer.cited.is_empty());
        assert!(answer.text.starts_with(NO_CONTEXT_NOTE));
        assert!(prompts.lock().unwrap()[0].contains(NO_CONTEXT_NOTE));
    }

    #[tokio::test]
    async fn test_no_artifacts_yet() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(recording(prompts.clone()), Arc::new(ArtifactHub::new()));

        let answer = engine.ask(&SessionId::new("s"), "What does the cache do?").await;
        assert!(!answer.grounded);
        assert!(answer.cited.is_empty());
        assert_eq!(prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_uses_session_history() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(recording(prompts.clone()), hub());
        let session = SessionId::new("s");
        let other = SessionId::new("other");

        engine.ask(&session, "Where is the ContentCache?").await;
        let follow_up = engine.ask(&session, "And its invariants?").await;
        assert_eq!(follow_up.cited, vec![NodeId::file("src/cache.rs")]);
        assert!(prompts.lock().unwrap()[1].contains("<HISTORY>\nQ: Where is the ContentCache?"));

        // Another session has no such history
        let fresh = engine.ask(&other, "And its invariants?").await;
        assert!(!fresh.grounded);

        let state = engine.sessions().open(&session).await;
        assert_eq!(state.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_degraded_answer() {
        let provider = Arc::new(MockProvider::new(|_, _| {
            Err(TransportError::timeout("deadline").into())
        }));
        let engine = engine(provider, hub());
        let session = SessionId::new("s");

        let answer = engine.ask(&session, "What does the cache do?").await;
        assert!(answer.degraded);
        assert!(answer.cited.is_empty());
        assert!(answer.text.contains("TIMEOUT"));

        let state = engine.sessions().open(&session).await;
        assert!(state.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_asking_sweeps_stale_persisted_sessions() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let db = Arc::new(db);
        let row = |session: &str, hours_ago: i64| TurnRow {
            session_id: session.to_string(),
            turn_index: 0,
            question: "where?".into(),
            answer: "here".into(),
            cited_json: "[]".into(),
            grounded: true,
            asked_at: Utc::now() - chrono::Duration::hours(hours_ago),
        };
        db.append_turn(&row("old", 5)).unwrap();
        db.append_turn(&row("recent", 0)).unwrap();

        let sessions = Arc::new(SessionStore::new(Duration::from_secs(600)).with_database(db.clone()));
        let engine = engine(Arc::new(MockProvider::constant("ok")), hub()).with_sessions(sessions);
        engine.ask(&SessionId::new("new"), "cache?").await;

        assert!(db.load_turns("old").unwrap().is_empty());
        assert_eq!(db.load_turns("recent").unwrap().len(), 1);
        assert_eq!(db.load_turns("new").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_end_session() {
        let engine = engine(Arc::new(MockProvider::constant("ok")), hub());
        let session = SessionId::new("s");
        engine.ask(&session, "cache?").await;
        assert!(engine.end(&session));
        assert!(!engine.end(&session));
    }
}
