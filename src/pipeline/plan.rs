//! Plan Builder
//!
//! Turns a snapshot into an ordered, budgeted [`WorkPlan`]:
//! 1. Files outside the selection or without text content are not eligible
//! 2. Files whose content hash is already cached sink to the lowest priority
//!    and are skipped unless the run is forced
//! 3. New and changed files are ordered entry points first, then by size
//! 4. Items that do not fit the remaining budget are deferred and reported

use std::collections::BTreeMap;
use std::time::Duration;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::cache::ContentCache;
use crate::constants::{analysis, plan};
use crate::types::{AtlasError, FileEntry, RepositorySnapshot, Result, estimate_code_tokens};

// =============================================================================
// Inputs
// =============================================================================

/// Token and wall-clock budget for one run. `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanBudget {
    pub max_tokens: Option<u64>,
    pub max_duration: Option<Duration>,
    /// Throughput used to turn token estimates into durations
    pub tokens_per_second: u64,
}

impl Default for PlanBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl PlanBudget {
    pub fn unlimited() -> Self {
        Self {
            max_tokens: None,
            max_duration: None,
            tokens_per_second: plan::DEFAULT_TOKENS_PER_SECOND,
        }
    }

    pub fn tokens(max_tokens: u64) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..Self::unlimited()
        }
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    pub fn with_tokens_per_second(mut self, tps: u64) -> Self {
        self.tokens_per_second = tps.max(1);
        self
    }
}

/// Optional restriction of a run to some files or directories
#[derive(Debug, Clone, Default)]
pub struct Selection {
    prefixes: Vec<String>,
    patterns: Vec<Pattern>,
    raw: Vec<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    /// Each entry is a file path, a directory, or a glob pattern
    pub fn parse(entries: &[String]) -> Result<Self> {
        let mut selection = Self::default();
        for entry in entries {
            let normalized = crate::types::snapshot::normalize_path(entry);
            if normalized.contains(['*', '?', '[']) {
                let pattern = Pattern::new(&normalized).map_err(|e| {
                    AtlasError::InvalidInput(format!("Invalid selection '{}': {}", entry, e))
                })?;
                selection.patterns.push(pattern);
            } else {
                selection.prefixes.push(normalized);
            }
            selection.raw.push(entry.clone());
        }
        Ok(selection)
    }

    pub fn is_all(&self) -> bool {
        self.prefixes.is_empty() && self.patterns.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.is_all() {
            return true;
        }
        self.prefixes.iter().any(|prefix| {
            prefix.is_empty()
                || path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        }) || self.patterns.iter().any(|p| p.matches(path))
    }

    pub fn describe(&self) -> String {
        if self.is_all() {
            "the repository".to_string()
        } else {
            format!("selection [{}]", self.raw.join(", "))
        }
    }
}

/// Bundling of small files that share a directory into one work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    /// Files up to this size are candidates for a group
    pub max_file_bytes: u64,
    pub max_group_files: usize,
}

// =============================================================================
// Plan
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkTarget {
    File(String),
    Group { name: String, paths: Vec<String> },
}

impl WorkTarget {
    pub fn paths(&self) -> &[String] {
        match self {
            WorkTarget::File(path) => std::slice::from_ref(path),
            WorkTarget::Group { paths, .. } => paths,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            WorkTarget::File(path) => path,
            WorkTarget::Group { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    pub tokens: u64,
    pub duration: Duration,
}

impl std::ops::Add for CostEstimate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            tokens: self.tokens + rhs.tokens,
            duration: self.duration + rhs.duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Run the file analyzer
    Analyze,
    /// Reuse the cached record
    Cached,
    /// Over budget; reported as partial coverage
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    pub target: WorkTarget,
    /// Higher runs earlier; cached items are 0
    pub priority: u32,
    pub estimated_cost: CostEstimate,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkPlan {
    pub items: Vec<WorkItem>,
    pub eligible_files: usize,
    pub budgeted_cost: CostEstimate,
}

impl WorkPlan {
    fn with(&self, disposition: Disposition) -> impl Iterator<Item = &WorkItem> {
        self.items
            .iter()
            .filter(move |item| item.disposition == disposition)
    }

    pub fn analyze_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.with(Disposition::Analyze)
    }

    pub fn cached_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.with(Disposition::Cached)
    }

    pub fn deferred_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.with(Disposition::Deferred)
    }

    pub fn deferred_paths(&self) -> Vec<String> {
        self.deferred_items()
            .flat_map(|item| item.target.paths().iter().cloned())
            .collect()
    }

    /// Some eligible files will not be covered by this run
    pub fn is_partial(&self) -> bool {
        self.deferred_items().next().is_some()
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct PlanBuilder<'a> {
    cache: &'a ContentCache,
    budget: PlanBudget,
    selection: Selection,
    force: bool,
    grouping: Option<Grouping>,
    max_file_chars: usize,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(cache: &'a ContentCache) -> Self {
        Self {
            cache,
            budget: PlanBudget::unlimited(),
            selection: Selection::all(),
            force: false,
            grouping: None,
            max_file_chars: analysis::DEFAULT_MAX_FILE_CHARS,
        }
    }

    pub fn budget(mut self, budget: PlanBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Re-analyze cached files too
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn grouping(mut self, grouping: Option<Grouping>) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn max_file_chars(mut self, max_file_chars: usize) -> Self {
        self.max_file_chars = max_file_chars;
        self
    }

    /// Estimated cost of analyzing one file with the bounded prompt
    pub fn estimate_cost(&self, file: &FileEntry) -> CostEstimate {
        let content = crate::types::truncate_chars(file.content(), self.max_file_chars);
        let tokens = estimate_code_tokens(content) as u64
            + plan::PROMPT_OVERHEAD_TOKENS
            + plan::EXPECTED_OUTPUT_TOKENS;
        let tps = self.budget.tokens_per_second.max(1);
        CostEstimate {
            tokens,
            duration: Duration::from_millis(tokens * 1000 / tps),
        }
    }

    #[instrument(skip_all, fields(files = snapshot.len()))]
    pub fn build(&self, snapshot: &RepositorySnapshot) -> Result<WorkPlan> {
        let eligible: Vec<&FileEntry> = snapshot
            .files()
            .iter()
            .filter(|f| f.is_text() && self.selection.matches(&f.path))
            .collect();

        if eligible.is_empty() {
            return Err(AtlasError::PlanEmpty {
                selection: self.selection.describe(),
            });
        }

        let mut fresh = Vec::new();
        let mut cached = Vec::new();
        for file in &eligible {
            if !self.force && self.cache.contains(&file.hash)? {
                cached.push(*file);
            } else {
                fresh.push(*file);
            }
        }

        fresh.sort_by(|a, b| {
            is_entry_point(&b.path)
                .cmp(&is_entry_point(&a.path))
                .then_with(|| b.size.cmp(&a.size))
                .then_with(|| a.path.cmp(&b.path))
        });

        let targets = self.group(fresh);
        let mut remaining_tokens = self.budget.max_tokens;
        let mut remaining_time = self.budget.max_duration;
        let mut budgeted_cost = CostEstimate::default();
        let count = targets.len() as u32;

        let mut items: Vec<WorkItem> = Vec::with_capacity(eligible.len());
        for (idx, (target, cost)) in targets.into_iter().enumerate() {
            let fits = remaining_tokens.is_none_or(|t| cost.tokens <= t)
                && remaining_time.is_none_or(|d| cost.duration <= d);

            let disposition = if fits {
                remaining_tokens = remaining_tokens.map(|t| t - cost.tokens);
                remaining_time = remaining_time.map(|d| d - cost.duration);
                budgeted_cost = budgeted_cost + cost;
                Disposition::Analyze
            } else {
                debug!(target = target.label(), tokens = cost.tokens, "Deferred over budget");
                Disposition::Deferred
            };

            items.push(WorkItem {
                target,
                priority: count - idx as u32,
                estimated_cost: cost,
                disposition,
            });
        }

        cached.sort_by(|a, b| a.path.cmp(&b.path));
        items.extend(cached.into_iter().map(|file| WorkItem {
            target: WorkTarget::File(file.path.clone()),
            priority: 0,
            estimated_cost: CostEstimate::default(),
            disposition: Disposition::Cached,
        }));

        let plan = WorkPlan {
            items,
            eligible_files: eligible.len(),
            budgeted_cost,
        };

        info!(
            analyze = plan.analyze_items().count(),
            cached = plan.cached_items().count(),
            deferred = plan.deferred_items().count(),
            tokens = plan.budgeted_cost.tokens,
            "Work plan built"
        );
        Ok(plan)
    }

    /// Keep priority order; small files of one directory collapse into a
    /// group placed where its first member would have run.
    fn group(&self, ordered: Vec<&FileEntry>) -> Vec<(WorkTarget, CostEstimate)> {
        let Some(grouping) = self.grouping.filter(|g| g.max_group_files > 1) else {
            return ordered
                .into_iter()
                .map(|f| (WorkTarget::File(f.path.clone()), self.estimate_cost(f)))
                .collect();
        };

        let mut slots: Vec<Option<(WorkTarget, CostEstimate)>> = Vec::new();
        let mut open: BTreeMap<String, usize> = BTreeMap::new();

        for file in ordered {
            let cost = self.estimate_cost(file);
            let small = file.size <= grouping.max_file_bytes && !is_entry_point(&file.path);
            if !small {
                slots.push(Some((WorkTarget::File(file.path.clone()), cost)));
                continue;
            }

            let dir = file.directory().to_string();
            if let Some(&slot) = open.get(&dir)
                && let Some((WorkTarget::Group { paths, .. }, total)) = slots[slot].as_mut()
                && paths.len() < grouping.max_group_files
            {
                paths.push(file.path.clone());
                *total = *total + cost;
                continue;
            }

            let name = if dir.is_empty() {
                "(root)".to_string()
            } else {
                format!("{}/", dir)
            };
            open.insert(dir, slots.len());
            slots.push(Some((
                WorkTarget::Group {
                    name,
                    paths: vec![file.path.clone()],
                },
                cost,
            )));
        }

        // Single-member groups are plain files
        slots
            .into_iter()
            .flatten()
            .map(|(target, cost)| match target {
                WorkTarget::Group { mut paths, .. } if paths.len() == 1 => {
                    (WorkTarget::File(paths.remove(0)), cost)
                }
                other => (other, cost),
            })
            .collect()
    }
}

pub fn is_entry_point(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    plan::ENTRY_POINT_FILES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(file_name))
}
