//! Run status: state machine value, progress and partial-failure details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Analyzing,
    Assembling,
    Diagramming,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Position in the forward path; terminal states sort last
    pub fn phase(&self) -> u8 {
        match self {
            Self::Planning => 1,
            Self::Analyzing => 2,
            Self::Assembling => 3,
            Self::Diagramming => 4,
            Self::Done | Self::Failed | Self::Cancelled => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Analyzing => "analyzing",
            Self::Assembling => "assembling",
            Self::Diagramming => "diagramming",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedFile {
    pub path: String,
    pub reason: String,
}

/// Snapshot of a run, published on every transition and progress tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: String,
    pub snapshot_id: String,
    pub state: RunState,
    /// Work items resolved so far; never decreases within a run
    pub completed: usize,
    pub total: usize,
    /// Done with degraded or deferred files
    pub partial: bool,
    pub degraded: Vec<DegradedFile>,
    /// Files left out by the plan budget
    pub deferred: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatus {
    pub fn new(run_id: impl Into<String>, snapshot_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            snapshot_id: snapshot_id.into(),
            state: RunState::Planning,
            completed: 0,
            total: 0,
            partial: false,
            degraded: Vec::new(),
            deferred: Vec::new(),
            warnings: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            return if self.is_terminal() { 1.0 } else { 0.0 };
        }
        self.completed as f32 / self.total as f32
    }

    pub(crate) fn finish(&mut self, state: RunState) {
        self.state = state;
        self.partial = state == RunState::Done && (!self.degraded.is_empty() || !self.deferred.is_empty());
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
        self.finish(RunState::Failed);
    }

    pub fn to_json(&self) -> crate::types::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_only_when_done() {
        let mut status = RunStatus::new("r1", "s1");
        status.degraded.push(DegradedFile {
            path: "a.py".into(),
            reason: "rate limited".into(),
        });
        status.finish(RunState::Done);
        assert!(status.partial);
        assert!(status.finished_at.is_some());

        let mut failed = RunStatus::new("r2", "s1");
        failed.degraded = status.degraded.clone();
        failed.fail("transport lost");
        assert_eq!(failed.state, RunState::Failed);
        assert!(!failed.partial);
        assert_eq!(failed.error.as_deref(), Some("transport lost"));
    }

    #[test]
    fn test_progress() {
        let mut status = RunStatus::new("r", "s");
        assert_eq!(status.progress(), 0.0);
        status.total = 4;
        status.completed = 1;
        assert_eq!(status.progress(), 0.25);
        assert!(RunState::Done.is_terminal());
        assert!(!RunState::Diagramming.is_terminal());
        assert!(RunState::Analyzing.phase() < RunState::Assembling.phase());
    }
}
