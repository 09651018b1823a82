//! Cache Command
//!
//! Usage:
//!   repoatlas cache stats [--json]
//!   repoatlas cache prune [--older-than-hours N]
//!   repoatlas cache clear

use std::path::Path;
use std::time::Duration;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::Result;

pub fn stats(root: &Path, config_file: Option<&Path>, json: bool, out: &Output) -> Result<()> {
    let ctx = CommandContext::load(root, config_file)?.with_existing_database()?;
    let stats = ctx.content_cache().stats()?;

    if json {
        out.result(&serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    out.section("Content cache");
    out.field("Records", stats.persisted_entries);
    out.field("Size", format_bytes(stats.persisted_bytes));
    Ok(())
}

/// Apply the configured eviction policy; `older_than_hours` overrides `cache.max_age_hours`
pub fn prune(
    root: &Path,
    config_file: Option<&Path>,
    older_than_hours: Option<u64>,
    out: &Output,
) -> Result<()> {
    let ctx = CommandContext::load(root, config_file)?.with_existing_database()?;
    let mut policy = ctx.config.eviction_policy();
    if let Some(hours) = older_than_hours {
        policy = policy.with_max_age(Duration::from_secs(hours * 3600));
    }
    if policy.max_age.is_none() {
        out.info("No max age configured; persisted records are kept. Use --older-than-hours.");
    }

    let report = ctx.content_cache().evict(&policy)?;
    out.success(&format!("Pruned {} persisted records", report.pruned));
    Ok(())
}

pub fn clear(root: &Path, config_file: Option<&Path>, out: &Output) -> Result<()> {
    let ctx = CommandContext::load(root, config_file)?.with_existing_database()?;
    let removed = ctx.content_cache().clear()?;
    out.success(&format!("Removed {} cached records and all cached diagrams", removed));
    Ok(())
}

pub(crate) fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
