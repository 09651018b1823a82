//! Analyze Command
//!
//! Scans the repository, runs the orchestrator and exports the artifacts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::cache::format_bytes;
use super::status::print_status;
use crate::cli::progress::ConsoleRenderer;
use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::config::ConfigLoader;
use crate::pipeline::diagram::render;
use crate::pipeline::{
    Artifacts, DiagramFormat, Granularity, Orchestrator, RunOptions, RunStatus, Selection,
    render_markdown,
};
use crate::types::Result;

#[derive(Debug, Clone, Default)]
pub struct AnalyzeArgs {
    pub path: PathBuf,
    /// Restrict the run to these files, directories or globs
    pub only: Vec<String>,
    pub force: bool,
    pub budget_tokens: Option<u64>,
    pub budget_minutes: Option<u64>,
    /// Defaults to `.repoatlas/output`
    pub output: Option<PathBuf>,
    pub format: Option<DiagramFormat>,
    pub granularity: Option<Granularity>,
}

/// Files written for one published artifact set
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFiles {
    pub markdown: PathBuf,
    pub documentation_json: PathBuf,
    pub diagram: PathBuf,
    pub diagram_json: PathBuf,
}

pub async fn run(args: AnalyzeArgs, config_file: Option<&Path>, out: &Output) -> Result<RunStatus> {
    let mut ctx = CommandContext::load(&args.path, config_file)?.with_database()?;
    if let Some(format) = args.format {
        ctx.config.diagram.format = format;
    }
    if let Some(granularity) = args.granularity {
        ctx.config.diagram.granularity = granularity;
    }

    let (snapshot, report) = ctx.scan()?;
    out.info(&format!(
        "Scanned {} files, {} ({} excluded, {} too large, {} non-text)",
        report.included,
        format_bytes(snapshot.total_bytes() as usize),
        report.excluded,
        report.too_large,
        report.non_text
    ));

    let tuning = ctx.config.tuning(snapshot.len());
    let mut budget = ctx.config.plan_budget();
    if let Some(tokens) = args.budget_tokens {
        budget.max_tokens = Some(tokens);
    }
    if let Some(minutes) = args.budget_minutes {
        budget = budget.with_max_duration(Duration::from_secs(minutes * 60));
    }
    let options = RunOptions {
        budget,
        selection: Selection::parse(&args.only)?,
        force: args.force,
        grouping: ctx.config.grouping(&tuning),
        max_file_chars: tuning.max_file_chars,
        concurrency: tuning.concurrency,
        title: ctx.project_name(),
    };
    info!(
        mode = %ctx.config.analysis.mode,
        concurrency = options.concurrency,
        grouping = options.grouping.is_some(),
        "Analysis settings"
    );

    let cache = ctx.content_cache();
    let client = ctx.model_client()?;
    info!(provider = client.provider_name(), model = ?ctx.config.llm.model, "Model transport");
    let mut orchestrator = Orchestrator::new(client, cache.clone())
        .with_options(options)
        .with_diagram(ctx.config.diagram.clone(), ctx.diagram_cache());
    if let Some(db) = &ctx.db {
        orchestrator = orchestrator.with_database(db.clone());
    }

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        })
    };
    let renderer = tokio::spawn(ConsoleRenderer::new().follow(orchestrator.subscribe()));

    let status = orchestrator.run(Arc::new(snapshot), cancel).await;
    interrupt.abort();
    if let Err(err) = renderer.await {
        warn!(error = %err, "Progress display stopped");
    }

    match cache.evict(&ctx.config.eviction_policy()) {
        Ok(report) if report.evicted + report.pruned > 0 => {
            info!(evicted = report.evicted, pruned = report.pruned, "Cache trimmed");
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "Cache eviction failed"),
    }

    print_status(&status, out);
    match cache.stats() {
        Ok(stats) if stats.hits + stats.misses > 0 => {
            out.field("Cache hit rate", format!("{:.0}%", stats.hit_rate() * 100.0));
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "Cache statistics unavailable"),
    }

    if let Some(artifacts) = orchestrator.artifacts().current() {
        let dir = args
            .output
            .unwrap_or_else(|| ConfigLoader::project_dir(&ctx.project_root).join("output"));
        let files = export(&artifacts, &dir, ctx.config.diagram.format, ctx.config.diagram.max_nodes)?;
        out.section("Artifacts");
        out.field("Markdown", files.markdown.display());
        out.field("Tree", files.documentation_json.display());
        out.field("Diagram", files.diagram.display());
        out.field("Model", files.diagram_json.display());
    }

    Ok(status)
}

/// Write documentation and diagram exports into `dir`
pub fn export(
    artifacts: &Artifacts,
    dir: &Path,
    format: DiagramFormat,
    max_nodes: usize,
) -> Result<ExportedFiles> {
    fs::create_dir_all(dir)?;
    let files = ExportedFiles {
        markdown: dir.join("DOCUMENTATION.md"),
        documentation_json: dir.join("documentation.json"),
        diagram: dir.join(format!("diagram.{}", format.extension())),
        diagram_json: dir.join("diagram.json"),
    };

    fs::write(&files.markdown, render_markdown(&artifacts.documentation))?;
    fs::write(&files.documentation_json, artifacts.documentation.to_json()?)?;
    fs::write(&files.diagram, render(&artifacts.diagram, format, max_nodes))?;
    fs::write(&files.diagram_json, artifacts.diagram.to_json()?)?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DiagramModel, DocumentationAssembler, RecordSet};
    use tempfile::TempDir;

    #[test]
    fn test_export_writes_all_files() {
        let dir = TempDir::new().unwrap();
        let records = Arc::new(RecordSet::new());
        let artifacts = Artifacts {
            snapshot_id: "s1".into(),
            documentation: DocumentationAssembler::new("Demo").assemble(&records),
            diagram: Arc::new(DiagramModel::default()),
            records,
        };

        let files = export(&artifacts, &dir.path().join("out"), DiagramFormat::Dot, 10).unwrap();
        assert!(files.diagram.ends_with("diagram.dot"));
        for path in [&files.markdown, &files.documentation_json, &files.diagram, &files.diagram_json] {
            assert!(path.exists(), "{} missing", path.display());
        }
        let dot = fs::read_to_string(&files.diagram).unwrap();
        assert!(dot.starts_with("digraph repository {"));
    }
}
