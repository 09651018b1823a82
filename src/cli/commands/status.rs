//! Status Command
//!
//! Display the last persisted run.

use std::path::Path;

use chrono::Utc;

use crate::cli::progress::{format_duration, state_label};
use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::pipeline::RunStatus;
use crate::storage::Database;
use crate::types::{Result, truncate_chars};

pub fn run(root: &Path, json: bool, out: &Output) -> Result<()> {
    let db_path = ConfigLoader::database_path(root);
    if !db_path.exists() {
        if json {
            out.result("{\"status\": \"not_initialized\"}");
        } else {
            out.warning("Not initialized. Run 'repoatlas init' first.");
        }
        // Informational command
        return Ok(());
    }

    let db = Database::open(&db_path)?;
    db.initialize()?;
    let Some(raw) = db.load_latest_run()? else {
        if json {
            out.result("{\"status\": \"no_runs\"}");
        } else {
            out.info("No analysis runs recorded yet.");
        }
        return Ok(());
    };

    let status: RunStatus = serde_json::from_str(&raw)?;
    if json {
        out.result(&status.to_json()?);
        return Ok(());
    }
    print_status(&status, out);
    Ok(())
}

/// Human-readable run summary shared with `analyze`
pub fn print_status(status: &RunStatus, out: &Output) {
    out.section("Run");
    out.field("Run", &status.run_id);
    out.field("Snapshot", truncate_chars(&status.snapshot_id, 12));
    let mut state = state_label(status.state);
    if status.partial {
        state.push_str(" (partial)");
    }
    out.field("State", state);
    out.field("Progress", format!("{}/{}", status.completed, status.total));
    let end = status.finished_at.unwrap_or_else(Utc::now);
    let elapsed = (end - status.started_at).num_seconds().max(0) as u64;
    out.field("Elapsed", format_duration(elapsed));

    if let Some(error) = &status.error {
        out.error(error);
    }
    if !status.degraded.is_empty() {
        out.section(&format!("Degraded files ({})", status.degraded.len()));
        for file in &status.degraded {
            out.warning(&format!("{}: {}", file.path, file.reason));
        }
    }
    if !status.deferred.is_empty() {
        out.section(&format!("Deferred by budget ({})", status.deferred.len()));
        for path in &status.deferred {
            out.info(path);
        }
    }
    for warning in &status.warnings {
        out.warning(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::util::open_project_db;
    use crate::pipeline::RunState;
    use tempfile::TempDir;

    #[test]
    fn test_status_without_project() {
        let dir = TempDir::new().unwrap();
        assert!(run(dir.path(), true, &Output::quiet(true)).is_ok());
    }

    #[test]
    fn test_status_reads_latest_run() {
        let dir = TempDir::new().unwrap();
        let db = open_project_db(dir.path()).unwrap();
        let mut status = RunStatus::new("run-1", "abcdef");
        status.state = RunState::Done;
        db.save_run(
            &status.run_id,
            &status.snapshot_id,
            status.state.name(),
            &status.to_json().unwrap(),
            status.started_at,
            None,
        )
        .unwrap();

        assert!(run(dir.path(), true, &Output::quiet(true)).is_ok());
        assert!(run(dir.path(), false, &Output::quiet(true)).is_ok());
    }
}
