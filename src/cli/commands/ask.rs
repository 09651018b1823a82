//! Ask Command
//!
//! Rebuilds artifacts from the persistent cache and answers one question
//! within a conversation session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use console::style;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::pipeline::{Orchestrator, RunOptions};
use crate::query::{Answer, QueryEngine, SessionStore};
use crate::types::{AtlasError, Result, SessionId};

#[derive(Debug, Clone, Default)]
pub struct AskArgs {
    pub question: Option<String>,
    pub session: Option<String>,
    pub path: PathBuf,
    /// End the session instead of asking
    pub end: bool,
    pub json: bool,
}

pub async fn run(args: AskArgs, config_file: Option<&Path>, out: &Output) -> Result<()> {
    let ctx = CommandContext::load(&args.path, config_file)?.with_existing_database()?;
    let db = ctx.database()?.clone();
    let sessions = Arc::new(SessionStore::new(ctx.config.query.session_idle()).with_database(db));

    if args.end {
        let id = args
            .session
            .map(SessionId::new)
            .ok_or_else(|| AtlasError::InvalidInput("--end requires --session".to_string()))?;
        let had_turns = !sessions.open(&id).await.lock().await.is_empty();
        sessions.end(&id)?;
        if had_turns {
            out.success(&format!("Ended session {}", id));
        } else {
            out.info(&format!("Session {} had no recorded turns", id));
        }
        return Ok(());
    }

    let question = args
        .question
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| AtlasError::InvalidInput("a question is required".to_string()))?;

    let (snapshot, _) = ctx.scan()?;
    let client = ctx.model_client()?;
    let orchestrator = Orchestrator::new(client.clone(), ctx.content_cache())
        .with_options(RunOptions {
            title: ctx.project_name(),
            ..RunOptions::default()
        })
        .with_diagram(ctx.config.diagram.clone(), ctx.diagram_cache());
    orchestrator.rebuild(&snapshot).await.map_err(|err| match err {
        AtlasError::NotInitialized => AtlasError::InvalidInput(
            "no analyzed files found; run 'repoatlas analyze' first".to_string(),
        ),
        other => other,
    })?;

    let engine = QueryEngine::new(client, orchestrator.artifacts().clone(), ctx.config.query.clone())
        .with_sessions(sessions);
    let session = args
        .session
        .map(SessionId::new)
        .unwrap_or_else(SessionId::generate);
    let answer = engine.ask(&session, &question).await;

    if args.json {
        out.result(&serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer, out);
    }
    Ok(())
}

fn print_answer(answer: &Answer, out: &Output) {
    out.result(&answer.text);
    if answer.degraded {
        out.warning("The model could not be reached; this answer is not grounded.");
    }
    if !answer.cited.is_empty() {
        out.section("Sources");
        for id in &answer.cited {
            out.result(&format!("  {}", style(id).cyan()));
        }
    }
    out.info(&format!(
        "Continue this conversation with --session {}",
        answer.session
    ));
}
