//! Per-session conversation state with idle expiry.
//!
//! Each session owns its turns exclusively. The store hands out the state
//! behind an async mutex, so concurrent questions in one session are
//! serialized while different sessions never contend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::storage::{SharedDatabase, TurnRow};
use crate::types::{NodeId, Result, SessionId, log_filter_warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub cited: Vec<NodeId>,
    pub grounded: bool,
    pub asked_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ConversationState {
    session: SessionId,
    turns: Vec<Turn>,
    last_active: Instant,
}

impl ConversationState {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            turns: Vec::new(),
            last_active: Instant::now(),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Up to `n` latest turns, oldest first
    pub fn recent(&self, n: usize) -> &[Turn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub(crate) fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.touch();
        self.turns.len() - 1
    }

    pub(crate) fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn is_idle(&self, idle: Duration) -> bool {
        self.last_active.elapsed() >= idle
    }
}

type SharedState = Arc<Mutex<ConversationState>>;

pub struct SessionStore {
    sessions: DashMap<SessionId, SharedState>,
    idle: Duration,
    db: Option<SharedDatabase>,
}

impl SessionStore {
    pub fn new(idle: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle,
            db: None,
        }
    }

    /// Persist turns so a session survives process restarts until it expires
    pub fn with_database(mut self, db: SharedDatabase) -> Self {
        self.db = Some(db);
        self
    }

    /// State for `id`, created on first use. An expired session is ended and
    /// replaced by a fresh one.
    pub async fn open(&self, id: &SessionId) -> SharedState {
        let existing = self.sessions.get(id).map(|entry| entry.value().clone());
        if let Some(state) = existing {
            let expired = state.lock().await.is_idle(self.idle);
            if !expired {
                return state;
            }
            debug!(session = %id, "Session expired on access");
            log_filter_warn(self.end(id), "Failed to end expired session");
        }

        let restored = self.restore(id);
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(restored)))
            .value()
            .clone()
    }

    fn restore(&self, id: &SessionId) -> ConversationState {
        let mut state = ConversationState::new(id.clone());
        let Some(db) = &self.db else {
            return state;
        };
        let Some(rows) = log_filter_warn(db.load_turns(id.as_str()), "Failed to load session turns") else {
            return state;
        };

        if let Some(cutoff) = self.idle_cutoff()
            && rows.last().is_some_and(|row| row.asked_at < cutoff)
        {
            log_filter_warn(db.delete_session(id.as_str()), "Failed to delete expired session");
            return state;
        }

        for row in rows {
            let cited = serde_json::from_str(&row.cited_json).unwrap_or_default();
            state.turns.push(Turn {
                question: row.question,
                answer: row.answer,
                cited,
                grounded: row.grounded,
                asked_at: row.asked_at,
            });
        }
        if !state.turns.is_empty() {
            debug!(session = %id, turns = state.turns.len(), "Session restored");
        }
        state
    }

    pub(crate) fn persist(&self, id: &SessionId, index: usize, turn: &Turn) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        db.append_turn(&TurnRow {
            session_id: id.to_string(),
            turn_index: index,
            question: turn.question.clone(),
            answer: turn.answer.clone(),
            cited_json: serde_json::to_string(&turn.cited)?,
            grounded: turn.grounded,
            asked_at: turn.asked_at,
        })
    }

    /// Drop the session and its persisted turns; true if it was live
    pub fn end(&self, id: &SessionId) -> Result<bool> {
        let removed = self.sessions.remove(id).is_some();
        if let Some(db) = &self.db {
            db.delete_session(id.as_str())?;
        }
        Ok(removed)
    }

    /// End every idle session. Sessions busy answering are not idle.
    pub fn expire_idle(&self) -> Result<usize> {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .is_ok_and(|state| state.is_idle(self.idle))
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in &idle {
            self.sessions.remove(id);
        }
        if let Some(db) = &self.db
            && let Some(cutoff) = self.idle_cutoff()
        {
            db.delete_sessions_idle_before(cutoff)?;
        }
        if !idle.is_empty() {
            info!(expired = idle.len(), "Expired idle sessions");
        }
        Ok(idle.len())
    }

    /// Wall-clock instant before which persisted turns count as idle
    fn idle_cutoff(&self) -> Option<DateTime<Utc>> {
        let idle = chrono::Duration::from_std(self.idle).ok()?;
        Utc::now().checked_sub_signed(idle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
