//! Analysis Orchestrator
//!
//! Drives one run through the fixed stages:
//!
//! ```text
//! Planning → Analyzing (fan-out / fan-in) → Assembling → Diagramming → Done
//!     ↓            ↓                            ↓             ↓
//!   Failed    Failed | Cancelled            Cancelled     Cancelled
//! ```
//!
//! Only plan emptiness, cache corruption, storage failure and loss of the
//! model transport fail a run. Everything else degrades a single file and
//! the run finishes `Done` with the partial flag set.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::artifacts::{ArtifactHub, Artifacts};
use super::diagram::{DiagramCache, DiagramConfig, DiagramSynthesizer};
use super::documentation::DocumentationAssembler;
use super::file_analyzer::FileAnalyzer;
use super::plan::{Grouping, PlanBudget, PlanBuilder, Selection, WorkTarget};
use super::records::RecordSet;
use super::status::{DegradedFile, RunState, RunStatus};
use crate::ai::ModelClient;
use crate::cache::ContentCache;
use crate::constants::analysis;
use crate::storage::SharedDatabase;
use crate::types::{AnalysisRecord, AtlasError, FileEntry, RepositorySnapshot, Result};

/// Default bound on concurrent file analyses
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub budget: PlanBudget,
    pub selection: Selection,
    /// Re-analyze files that already have cached records
    pub force: bool,
    pub grouping: Option<Grouping>,
    pub max_file_chars: usize,
    /// Worker pool size for the analyzing stage
    pub concurrency: usize,
    pub title: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            budget: PlanBudget::unlimited(),
            selection: Selection::all(),
            force: false,
            grouping: None,
            max_file_chars: analysis::DEFAULT_MAX_FILE_CHARS,
            concurrency: DEFAULT_CONCURRENCY,
            title: "Repository".to_string(),
        }
    }
}

type Resolved = Vec<(String, Arc<AnalysisRecord>)>;

pub struct Orchestrator {
    client: ModelClient,
    cache: Arc<ContentCache>,
    diagram_cache: Arc<DiagramCache>,
    diagram: DiagramConfig,
    options: RunOptions,
    db: Option<SharedDatabase>,
    artifacts: Arc<ArtifactHub>,
    status: watch::Sender<RunStatus>,
}

impl Orchestrator {
    pub fn new(client: ModelClient, cache: Arc<ContentCache>) -> Self {
        let (status, _) = watch::channel(RunStatus::new("", ""));
        Self {
            client,
            cache,
            diagram_cache: Arc::new(DiagramCache::in_memory()),
            diagram: DiagramConfig::default(),
            options: RunOptions::default(),
            db: None,
            artifacts: Arc::new(ArtifactHub::new()),
            status,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_diagram(mut self, config: DiagramConfig, cache: Arc<DiagramCache>) -> Self {
        self.diagram = config;
        self.diagram_cache = cache;
        self
    }

    /// Record every finished run in the `runs` table
    pub fn with_database(mut self, db: SharedDatabase) -> Self {
        self.db = Some(db);
        self
    }

    pub fn artifacts(&self) -> &Arc<ArtifactHub> {
        &self.artifacts
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Live status of the current or last run
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Run the pipeline to a terminal state. Never returns an error: the
    /// outcome is the status itself.
    #[instrument(skip_all, fields(snapshot = %snapshot.id, files = snapshot.len()))]
    pub async fn run(&self, snapshot: Arc<RepositorySnapshot>, cancel: CancellationToken) -> RunStatus {
        let mut status = RunStatus::new(uuid::Uuid::new_v4().to_string(), snapshot.id.clone());
        self.publish(&status);
        info!(run_id = %status.run_id, "Analysis run started");

        match self.drive(&snapshot, &cancel, &mut status).await {
            Ok(()) => status.finish(RunState::Done),
            Err(AtlasError::Cancelled) => {
                warn!(completed = status.completed, total = status.total, "Run cancelled");
                status.finish(RunState::Cancelled);
            }
            Err(err) => {
                error!(state = %status.state, error = %err, "Run failed");
                status.fail(err);
            }
        }

        self.publish(&status);
        self.persist(&status);
        info!(
            state = %status.state,
            partial = status.partial,
            degraded = status.degraded.len(),
            deferred = status.deferred.len(),
            "Analysis run finished"
        );
        status
    }

    async fn drive(
        &self,
        snapshot: &Arc<RepositorySnapshot>,
        cancel: &CancellationToken,
        status: &mut RunStatus,
    ) -> Result<()> {
        info!("Phase 1: Planning");
        let plan = PlanBuilder::new(&self.cache)
            .budget(self.options.budget.clone())
            .selection(self.options.selection.clone())
            .force(self.options.force)
            .grouping(self.options.grouping)
            .max_file_chars(self.options.max_file_chars)
            .build(snapshot)?;

        status.deferred = plan.deferred_paths();
        status.total = plan.analyze_items().count() + plan.cached_items().count();
        self.publish(status);
        check(cancel)?;

        info!(items = status.total, "Phase 2: Analyzing");
        status.state = RunState::Analyzing;
        self.publish(status);

        let mut results: BTreeMap<String, Arc<AnalysisRecord>> = BTreeMap::new();
        let mut targets: Vec<WorkTarget> = plan.analyze_items().map(|i| i.target.clone()).collect();

        for item in plan.cached_items() {
            let mut hit = Vec::new();
            for path in item.target.paths() {
                let file = snapshot_file(snapshot, path)?;
                match self.cache.get(&file.hash)? {
                    Some(record) => hit.push((path.clone(), record)),
                    None => break,
                }
            }
            if hit.len() == item.target.paths().len() {
                results.extend(hit);
                status.completed += 1;
            } else {
                // Evicted between planning and now
                targets.push(item.target.clone());
            }
        }
        self.publish(status);

        self.fan_out(snapshot, targets, cancel, status, &mut results).await?;
        check(cancel)?;

        // Current record set: this run's results plus cached records of
        // files this run did not touch
        let mut records = RecordSet::new();
        for file in snapshot.files() {
            let record = match results.remove(&file.path) {
                Some(record) => Some(record),
                None if file.is_text() => self.cache.get(&file.hash)?,
                None => None,
            };
            if let Some(record) = record {
                records.insert(file, record);
            }
        }
        let records = Arc::new(records);

        check(cancel)?;
        info!(records = records.len(), "Phase 3: Assembling");
        status.state = RunState::Assembling;
        self.publish(status);
        let documentation = DocumentationAssembler::new(self.options.title.clone()).assemble(&records);

        check(cancel)?;
        info!("Phase 4: Diagramming");
        status.state = RunState::Diagramming;
        self.publish(status);
        let synthesizer = self.synthesizer();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AtlasError::Cancelled),
            outcome = synthesizer.synthesize(&records) => outcome?,
        };
        if let Some(warning) = outcome.warning {
            status.warnings.push(warning);
        }

        self.artifacts.publish(Artifacts {
            snapshot_id: snapshot.id.clone(),
            documentation,
            diagram: outcome.model,
            records,
        });
        Ok(())
    }

    /// Bounded fan-out over the analysis targets with a full fan-in barrier.
    /// A fatal error cancels the remaining items and is returned once every
    /// in-flight item has resolved.
    async fn fan_out(
        &self,
        snapshot: &Arc<RepositorySnapshot>,
        targets: Vec<WorkTarget>,
        cancel: &CancellationToken,
        status: &mut RunStatus,
        results: &mut BTreeMap<String, Arc<AnalysisRecord>>,
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let analyzer = Arc::new(FileAnalyzer::new(
            self.client.clone(),
            self.cache.clone(),
            self.options.max_file_chars,
        ));
        let workers = cancel.child_token();

        let mut stream = futures::stream::iter(targets)
            .map(|target| {
                let analyzer = Arc::clone(&analyzer);
                let snapshot = Arc::clone(snapshot);
                let workers = workers.clone();
                async move {
                    if workers.is_cancelled() {
                        return Err(AtlasError::Cancelled);
                    }
                    tokio::select! {
                        biased;
                        _ = workers.cancelled() => Err(AtlasError::Cancelled),
                        resolved = analyze_target(&analyzer, &target, &snapshot) => resolved,
                    }
                }
            })
            .buffer_unordered(self.options.concurrency.max(1));

        let mut fatal = None;
        while let Some(outcome) = stream.next().await {
            match outcome {
                Ok(resolved) => {
                    for (path, record) in resolved {
                        if record.is_degraded() {
                            status.degraded.push(DegradedFile {
                                path: path.clone(),
                                reason: record.degraded_reason.clone().unwrap_or_default(),
                            });
                        }
                        results.insert(path, record);
                    }
                    status.completed += 1;
                    self.publish(status);
                }
                Err(AtlasError::Cancelled) => {}
                Err(err) => {
                    if fatal.is_none() {
                        error!(error = %err, "Fatal error during analysis, stopping workers");
                        workers.cancel();
                        fatal = Some(err);
                    }
                }
            }
        }

        status.degraded.sort_by(|a, b| a.path.cmp(&b.path));
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Rebuild and publish artifacts from cached records only; no file is
    /// analyzed and the run history is untouched.
    #[instrument(skip_all, fields(snapshot = %snapshot.id))]
    pub async fn rebuild(&self, snapshot: &RepositorySnapshot) -> Result<Arc<Artifacts>> {
        let mut records = RecordSet::new();
        for file in snapshot.files().iter().filter(|f| f.is_text()) {
            if let Some(record) = self.cache.get(&file.hash)? {
                records.insert(file, record);
            }
        }
        if records.is_empty() {
            return Err(AtlasError::NotInitialized);
        }
        let records = Arc::new(records);

        let documentation = DocumentationAssembler::new(self.options.title.clone()).assemble(&records);
        let outcome = self.synthesizer().synthesize(&records).await?;
        if let Some(warning) = &outcome.warning {
            warn!(%warning, "Diagram rebuilt with warning");
        }
        Ok(self.artifacts.publish(Artifacts {
            snapshot_id: snapshot.id.clone(),
            documentation,
            diagram: outcome.model,
            records,
        }))
    }

    fn synthesizer(&self) -> DiagramSynthesizer {
        let synthesizer = DiagramSynthesizer::new(self.diagram.clone(), self.diagram_cache.clone());
        if self.diagram.describe {
            synthesizer.with_client(self.client.clone())
        } else {
            synthesizer
        }
    }

    fn publish(&self, status: &RunStatus) {
        self.status.send_replace(status.clone());
    }

    fn persist(&self, status: &RunStatus) {
        let Some(db) = &self.db else {
            return;
        };
        let saved = status.to_json().and_then(|json| {
            db.save_run(
                &status.run_id,
                &status.snapshot_id,
                status.state.name(),
                &json,
                status.started_at,
                status.finished_at,
            )
        });
        if let Err(err) = saved {
            warn!(error = %err, "Failed to record run history");
        }
    }
}

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AtlasError::Cancelled)
    } else {
        Ok(())
    }
}

fn snapshot_file<'a>(snapshot: &'a RepositorySnapshot, path: &str) -> Result<&'a FileEntry> {
    snapshot
        .get(path)
        .ok_or_else(|| AtlasError::InvalidInput(format!("planned file missing from snapshot: {}", path)))
}

/// Members of a group run one after another inside the same work item
async fn analyze_target(
    analyzer: &FileAnalyzer,
    target: &WorkTarget,
    snapshot: &RepositorySnapshot,
) -> Result<Resolved> {
    let mut resolved = Vec::with_capacity(target.paths().len());
    for path in target.paths() {
        let file = snapshot_file(snapshot, path)?;
        let record = analyzer.analyze(file, snapshot).await?;
        resolved.push((path.clone(), record));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ai::{GenerateOptions, RetryPolicy, TransportHealth};
    use crate::pipeline::render_markdown;
    use crate::storage::Database;
    use crate::testing::{MockProvider, prompt_path};
    use crate::types::{NodeId, TransportError};

    fn answer(path: &str) -> String {
        let stem = path.trim_end_matches(".py").replace('/', "_");
        let deps = if path == "a.py" { r#"["b"]"# } else { "[]" };
        format!(
            r#"{{"summary": "Module {stem}", "entities": [{{"name": "{stem}_main", "kind": "function"}}], "dependencies": {deps}}}"#
        )
    }

    fn healthy() -> Arc<MockProvider> {
        Arc::new(MockProvider::new(|prompt, _| {
            Ok(answer(prompt_path(prompt).unwrap_or("unknown")))
        }))
    }

    fn client(provider: Arc<MockProvider>) -> ModelClient {
        ModelClient::new(provider, GenerateOptions::default(), RetryPolicy::immediate(3))
    }

    fn snapshot(n: usize) -> Arc<RepositorySnapshot> {
        let names = ["a.py", "b.py", "c.py", "d.py", "e.py", "f.py"];
        Arc::new(RepositorySnapshot::from_contents(
            names.iter().take(n).map(|name| (*name, format!("# {}\ndef run(): pass\n", name))),
        ))
    }

    fn orchestrator(provider: Arc<MockProvider>) -> Orchestrator {
        Orchestrator::new(client(provider), Arc::new(ContentCache::in_memory()))
    }

    #[tokio::test]
    async fn test_run_reaches_done_and_publishes() {
        let orch = orchestrator(healthy());
        let status = orch.run(snapshot(3), CancellationToken::new()).await;

        assert_eq!(status.state, RunState::Done);
        assert!(!status.partial);
        assert_eq!((status.completed, status.total), (3, 3));

        let artifacts = orch.artifacts().current().unwrap();
        assert_eq!(artifacts.records.len(), 3);
        assert_eq!(artifacts.diagram.nodes.len(), 3);
        assert_eq!(artifacts.diagram.edges.len(), 1);
        assert!(artifacts.documentation.contains(&NodeId::file("c.py")));
        assert_eq!(orch.subscribe().borrow().state, RunState::Done);
    }

    #[tokio::test]
    async fn test_one_failing_file_is_contained() {
        let provider = Arc::new(MockProvider::new(|prompt, _| {
            match prompt_path(prompt) {
                Some("c.py") => Err(TransportError::rate_limited("429").into()),
                Some(path) => Ok(answer(path)),
                None => Ok(String::new()),
            }
        }));
        let orch = orchestrator(provider.clone());
        let status = orch.run(snapshot(5), CancellationToken::new()).await;

        assert_eq!(status.state, RunState::Done);
        assert!(status.partial);
        assert_eq!(status.degraded.len(), 1);
        assert_eq!(status.degraded[0].path, "c.py");
        assert!(status.degraded[0].reason.contains("RATE_LIMITED"));
        assert_eq!(status.completed, 5);

        let artifacts = orch.artifacts().current().unwrap();
        assert_eq!(artifacts.records.len(), 5);
        let markdown = render_markdown(&artifacts.documentation);
        assert!(markdown.contains("`c.py` (degraded)"));
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let provider = Arc::new(
            MockProvider::new(|prompt, _| Ok(answer(prompt_path(prompt).unwrap_or("x"))))
                .with_delay(Duration::from_millis(5)),
        );
        let options = RunOptions {
            concurrency: 2,
            ..Default::default()
        };
        let orch = orchestrator(provider).with_options(options);
        let mut rx = orch.subscribe();

        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let status = rx.borrow_and_update().clone();
                seen.push((status.completed, status.state.phase()));
                if status.is_terminal() {
                    break;
                }
            }
            seen
        });

        let status = orch.run(snapshot(6), CancellationToken::new()).await;
        let seen = observer.await.unwrap();

        assert_eq!(status.state, RunState::Done);
        assert!(seen.len() > 1);
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));
        assert_eq!(seen.last().map(|s| s.0), Some(status.total));
        assert_eq!(status.total, 6);
    }

    #[tokio::test]
    async fn test_budget_defers_and_marks_partial() {
        let provider = healthy();
        let snap = snapshot(5);
        let cache = Arc::new(ContentCache::in_memory());
        let builder = PlanBuilder::new(&cache);
        let per_file = builder.estimate_cost(&snap.files()[0]).tokens;

        let options = RunOptions {
            budget: PlanBudget::tokens(per_file * 2),
            concurrency: 1,
            ..Default::default()
        };
        let orch = Orchestrator::new(client(provider.clone()), cache).with_options(options);
        let status = orch.run(snap, CancellationToken::new()).await;

        assert_eq!(status.state, RunState::Done);
        assert!(status.partial);
        assert_eq!(status.total, 2);
        assert_eq!(status.deferred.len(), 3);
        assert!(status.degraded.is_empty());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_plan_fails() {
        let orch = orchestrator(healthy());
        let snap = Arc::new(RepositorySnapshot::from_contents(Vec::<(&str, &str)>::new()));
        let status = orch.run(snap, CancellationToken::new()).await;

        assert_eq!(status.state, RunState::Failed);
        assert!(status.error.unwrap().contains("Nothing to analyze"));
        assert!(orch.artifacts().current().is_none());
    }

    #[tokio::test]
    async fn test_transport_loss_fails_run() {
        let provider = Arc::new(MockProvider::new(|_, _| {
            Err(TransportError::unavailable("connection refused").into())
        }));
        let client = client(provider).with_health(Arc::new(TransportHealth::new(1)));
        let options = RunOptions {
            concurrency: 1,
            ..Default::default()
        };
        let orch = Orchestrator::new(client, Arc::new(ContentCache::in_memory())).with_options(options);
        let status = orch.run(snapshot(4), CancellationToken::new()).await;

        assert_eq!(status.state, RunState::Failed);
        assert!(status.error.unwrap().contains("transport lost"));
        assert!(orch.artifacts().current().is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_analyzing() {
        let provider = healthy();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = orchestrator(provider.clone()).run(snapshot(3), cancel).await;

        assert_eq!(status.state, RunState::Cancelled);
        assert_eq!(status.completed, 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_leaves_cache_consistent() {
        let slow = Arc::new(
            MockProvider::new(|prompt, _| Ok(answer(prompt_path(prompt).unwrap_or("x"))))
                .with_delay(Duration::from_secs(30)),
        );
        let cache = Arc::new(ContentCache::in_memory());
        let orch = Orchestrator::new(client(slow), cache.clone());
        let snap = snapshot(3);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let status = orch.run(snap.clone(), cancel).await;
        assert_eq!(status.state, RunState::Cancelled);
        for file in snap.files() {
            assert!(cache.get(&file.hash).unwrap().is_none());
        }
        assert!(orch.artifacts().current().is_none());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_and_cached() {
        let provider = healthy();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let db = Arc::new(db);
        let orch = orchestrator(provider.clone()).with_database(db.clone());
        let snap = snapshot(3);

        let first = orch.run(snap.clone(), CancellationToken::new()).await;
        let first_docs = orch.artifacts().current().unwrap();
        let calls = provider.calls();

        let second = orch.run(snap, CancellationToken::new()).await;
        let second_docs = orch.artifacts().current().unwrap();

        assert_eq!(first.state, RunState::Done);
        assert_eq!(second.state, RunState::Done);
        assert_eq!(provider.calls(), calls);
        assert_eq!(second.completed, 3);
        assert_eq!(
            first_docs.documentation.to_json().unwrap(),
            second_docs.documentation.to_json().unwrap()
        );
        assert!(Arc::ptr_eq(&first_docs.diagram, &second_docs.diagram));

        let latest: RunStatus = serde_json::from_str(&db.load_latest_run().unwrap().unwrap()).unwrap();
        assert_eq!(latest.state, RunState::Done);
    }

    #[tokio::test]
    async fn test_rebuild_from_cache() {
        let orch = orchestrator(healthy());
        let snap = snapshot(2);
        assert!(matches!(orch.rebuild(&snap).await, Err(AtlasError::NotInitialized)));

        orch.run(snap.clone(), CancellationToken::new()).await;
        let rebuilt = orch.rebuild(&snap).await.unwrap();
        assert_eq!(rebuilt.records.len(), 2);
    }
}
