//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (`~/.config/repoatlas/`) and project (`.repoatlas/`) level configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ai::{ProviderConfig, RetryPolicy};
use crate::cache::EvictionPolicy;
use crate::constants::{analysis, cache, network, plan, retry, transport};
use crate::pipeline::{DiagramConfig, Grouping, PlanBudget};
use crate::query::QueryConfig;
use crate::types::{AtlasError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub pipeline: PipelineConfig,
    pub budget: BudgetConfig,
    pub cache: CacheConfig,
    pub diagram: DiagramConfig,
    pub query: QueryConfig,
}

fn invalid(message: impl Into<String>) -> AtlasError {
    AtlasError::Config(message.into())
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.timeout_secs == 0 {
            return Err(invalid("llm.timeout_secs must be greater than 0"));
        }
        if self.llm.max_tokens == 0 {
            return Err(invalid("llm.max_tokens must be greater than 0"));
        }
        if !matches!(self.llm.provider.as_str(), "openai" | "ollama") {
            return Err(invalid(format!(
                "llm.provider must be openai or ollama, got {}",
                self.llm.provider
            )));
        }

        if self.pipeline.concurrency == Some(0) {
            return Err(invalid("pipeline.concurrency must be greater than 0"));
        }
        if self.pipeline.max_file_chars == Some(0) {
            return Err(invalid("pipeline.max_file_chars must be greater than 0"));
        }
        if self.pipeline.retry.max_attempts == 0 {
            return Err(invalid("pipeline.retry.max_attempts must be at least 1"));
        }
        if self.pipeline.retry.factor < 1.0 {
            return Err(invalid("pipeline.retry.factor must be at least 1.0"));
        }
        if self.pipeline.retry.base_delay_ms > self.pipeline.retry.max_delay_ms {
            return Err(invalid("pipeline.retry.base_delay_ms must not exceed max_delay_ms"));
        }
        if self.pipeline.transport_loss_threshold == 0 {
            return Err(invalid("pipeline.transport_loss_threshold must be greater than 0"));
        }

        if self.budget.max_tokens == Some(0) || self.budget.max_minutes == Some(0) {
            return Err(invalid("budget limits must be greater than 0 when set"));
        }
        if self.budget.tokens_per_second == 0 {
            return Err(invalid("budget.tokens_per_second must be greater than 0"));
        }

        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.diagram.min_confidence) {
            return Err(invalid(format!(
                "diagram.min_confidence must be between 0.0 and 1.0, got {}",
                self.diagram.min_confidence
            )));
        }
        if self.diagram.max_nodes == 0 {
            return Err(invalid("diagram.max_nodes must be greater than 0"));
        }

        if self.query.max_candidates == 0 || self.query.max_context_tokens == 0 {
            return Err(invalid("query.max_candidates and max_context_tokens must be greater than 0"));
        }
        if self.query.session_idle_minutes == 0 {
            return Err(invalid("query.session_idle_minutes must be greater than 0"));
        }

        Ok(())
    }

    /// Concurrency and prompt size: explicit pipeline settings win over the
    /// mode preset for the repository's scale
    pub fn tuning(&self, file_count: usize) -> ModeConfig {
        let preset = get_mode_config(self.analysis.mode, ProjectScale::from_file_count(file_count));
        ModeConfig {
            concurrency: self.pipeline.concurrency.unwrap_or(preset.concurrency),
            max_file_chars: self.pipeline.max_file_chars.unwrap_or(preset.max_file_chars),
            group_small_files: self.pipeline.grouping.enabled.unwrap_or(preset.group_small_files),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.pipeline.retry;
        RetryPolicy {
            max_attempts: r.max_attempts,
            min_delay: Duration::from_millis(r.base_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
            factor: r.factor,
            jitter: true,
        }
    }

    pub fn plan_budget(&self) -> PlanBudget {
        let mut budget = PlanBudget::unlimited().with_tokens_per_second(self.budget.tokens_per_second);
        budget.max_tokens = self.budget.max_tokens;
        if let Some(minutes) = self.budget.max_minutes {
            budget = budget.with_max_duration(Duration::from_secs(minutes * 60));
        }
        budget
    }

    pub fn grouping(&self, tuning: &ModeConfig) -> Option<Grouping> {
        tuning.group_small_files.then_some(Grouping {
            max_file_bytes: self.pipeline.grouping.max_file_bytes,
            max_group_files: self.pipeline.grouping.max_group_files,
        })
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        let policy = EvictionPolicy::entries(self.cache.max_entries).with_max_bytes(self.cache.max_bytes);
        match self.cache.max_age_hours {
            Some(hours) => policy.with_max_age(Duration::from_secs(hours * 3600)),
            None => policy,
        }
    }
}

// =============================================================================
// Analysis Mode & Project Scale
// =============================================================================

/// Analysis mode trading coverage of each file against speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Smaller prompts, small files grouped
    Fast,
    #[default]
    Standard,
    /// Larger prompts, every file its own call
    Deep,
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisMode::Fast => write!(f, "fast"),
            AnalysisMode::Standard => write!(f, "standard"),
            AnalysisMode::Deep => write!(f, "deep"),
        }
    }
}

impl std::str::FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(AnalysisMode::Fast),
            "standard" => Ok(AnalysisMode::Standard),
            "deep" => Ok(AnalysisMode::Deep),
            _ => Err(format!(
                "Unknown analysis mode: {}. Valid values: fast, standard, deep",
                s
            )),
        }
    }
}

/// Project scale classification based on file count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectScale {
    /// < 50 files
    Small,
    /// 50-199 files
    #[default]
    Medium,
    /// 200-499 files
    Large,
    /// 500+ files
    Enterprise,
}

impl ProjectScale {
    pub fn from_file_count(count: usize) -> Self {
        match count {
            0..=49 => ProjectScale::Small,
            50..=199 => ProjectScale::Medium,
            200..=499 => ProjectScale::Large,
            _ => ProjectScale::Enterprise,
        }
    }
}

impl std::fmt::Display for ProjectScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectScale::Small => write!(f, "small"),
            ProjectScale::Medium => write!(f, "medium"),
            ProjectScale::Large => write!(f, "large"),
            ProjectScale::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Pipeline tuning for one mode × scale combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Concurrent file analyses
    pub concurrency: usize,
    /// Characters of file content per prompt
    pub max_file_chars: usize,
    /// Bundle small files of one directory into one work item
    pub group_small_files: bool,
}

impl Default for ModeConfig {
    fn default() -> Self {
        // Standard mode, Medium scale
        Self {
            concurrency: 4,
            max_file_chars: analysis::DEFAULT_MAX_FILE_CHARS,
            group_small_files: false,
        }
    }
}

/// Preset for a mode and scale
///
/// - **Fast**: small prompts, grouping on, concurrency grows with scale
/// - **Standard**: default prompts, grouping from large scale up
/// - **Deep**: large prompts, no grouping, modest concurrency
pub fn get_mode_config(mode: AnalysisMode, scale: ProjectScale) -> ModeConfig {
    let scale_concurrency = match scale {
        ProjectScale::Small => 2,
        ProjectScale::Medium => 4,
        ProjectScale::Large => 6,
        ProjectScale::Enterprise => 8,
    };
    match mode {
        AnalysisMode::Fast => ModeConfig {
            concurrency: scale_concurrency + 2,
            max_file_chars: 8_000,
            group_small_files: true,
        },
        AnalysisMode::Standard if scale == ProjectScale::Medium => ModeConfig::default(),
        AnalysisMode::Standard => ModeConfig {
            concurrency: scale_concurrency,
            max_file_chars: analysis::DEFAULT_MAX_FILE_CHARS,
            group_small_files: matches!(scale, ProjectScale::Large | ProjectScale::Enterprise),
        },
        AnalysisMode::Deep => ModeConfig {
            concurrency: scale_concurrency.min(4),
            max_file_chars: 48_000,
            group_small_files: false,
        },
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Transport: "openai" or "ollama"
    pub provider: String,
    pub model: Option<String>,
    pub api_base: Option<String>,
    /// Never written back out; prefer `REPOATLAS_LLM__API_KEY` or `OPENAI_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// 0.0 = deterministic, 1.0 = creative
    pub temperature: f32,
    pub max_tokens: usize,
    /// Deadline of one model call
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: None,
            api_base: None,
            api_key: None,
            temperature: 0.2,
            max_tokens: 2048,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LlmConfig {
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider.clone(),
            model: self.model.clone(),
            timeout_secs: self.timeout_secs,
            temperature: self.temperature,
            api_key: self.api_key.clone(),
            api_base: self.api_base.clone(),
            max_tokens: self.max_tokens,
        }
    }
}

// =============================================================================
// Analysis Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Glob patterns to include
    pub include: Vec<String>,
    /// Glob patterns to exclude
    pub exclude: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: u64,
    pub mode: AnalysisMode,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            include: vec!["**/*".to_string()],
            exclude: vec![
                "node_modules/**".to_string(),
                "dist/**".to_string(),
                ".git/**".to_string(),
                "target/**".to_string(),
                "vendor/**".to_string(),
                "__pycache__/**".to_string(),
                ".venv/**".to_string(),
                "build/**".to_string(),
                ".repoatlas/**".to_string(),
            ],
            max_file_size: 1_048_576, // 1MB
            mode: AnalysisMode::Standard,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Overrides the mode preset when set
    pub concurrency: Option<usize>,
    /// Overrides the mode preset when set
    pub max_file_chars: Option<usize>,
    pub retry: RetryConfig,
    /// Consecutive exhausted `Unavailable` calls that count as transport loss
    pub transport_loss_threshold: u32,
    pub grouping: GroupingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            max_file_chars: None,
            retry: RetryConfig::default(),
            transport_loss_threshold: transport::LOSS_THRESHOLD,
            grouping: GroupingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            max_delay_ms: retry::MAX_DELAY_SECS * 1000,
            factor: retry::BACKOFF_FACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Overrides the mode preset when set
    pub enabled: Option<bool>,
    pub max_file_bytes: u64,
    pub max_group_files: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            max_file_bytes: 2_048,
            max_group_files: 8,
        }
    }
}

// =============================================================================
// Budget & Cache Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_tokens: Option<u64>,
    pub max_minutes: Option<u64>,
    /// Throughput assumed when converting token estimates to time
    pub tokens_per_second: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_minutes: None,
            tokens_per_second: plan::DEFAULT_TOKENS_PER_SECOND,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep records in the project database across runs
    pub persist: bool,
    pub max_entries: usize,
    pub max_bytes: usize,
    /// Persisted records unused for longer are pruned
    pub max_age_hours: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persist: true,
            max_entries: cache::DEFAULT_MAX_ENTRIES,
            max_bytes: cache::DEFAULT_MAX_BYTES,
            max_age_hours: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.pipeline.retry.max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = Config::default();
        config.llm.temperature = 3.0;
        assert!(matches!(config.validate(), Err(AtlasError::Config(_))));

        let mut config = Config::default();
        config.diagram.min_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.concurrency = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.provider = "carrier-pigeon".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_analysis_mode() {
        assert_eq!(AnalysisMode::Fast.to_string(), "fast");
        assert_eq!("deep".parse::<AnalysisMode>().unwrap(), AnalysisMode::Deep);
        assert!("turbo".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn test_project_scale() {
        assert_eq!(ProjectScale::from_file_count(10), ProjectScale::Small);
        assert_eq!(ProjectScale::from_file_count(100), ProjectScale::Medium);
        assert_eq!(ProjectScale::from_file_count(300), ProjectScale::Large);
        assert_eq!(ProjectScale::from_file_count(1000), ProjectScale::Enterprise);
    }

    #[test]
    fn test_tuning_prefers_explicit_settings() {
        let mut config = Config::default();
        config.analysis.mode = AnalysisMode::Fast;
        let preset = config.tuning(10);
        assert!(preset.group_small_files);
        assert_eq!(preset.concurrency, 4);

        config.pipeline.concurrency = Some(1);
        config.pipeline.grouping.enabled = Some(false);
        let tuned = config.tuning(10);
        assert_eq!(tuned.concurrency, 1);
        assert!(config.grouping(&tuned).is_none());
    }

    #[test]
    fn test_budget_and_policy_conversion() {
        let mut config = Config::default();
        config.budget.max_tokens = Some(5_000);
        config.budget.max_minutes = Some(2);
        let budget = config.plan_budget();
        assert_eq!(budget.max_tokens, Some(5_000));
        assert_eq!(budget.max_duration, Some(Duration::from_secs(120)));

        config.cache.max_age_hours = Some(24);
        let policy = config.eviction_policy();
        assert_eq!(policy.max_age, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_api_key_redacted() {
        let mut config = LlmConfig::default();
        config.api_key = Some("sk-secret".into());
        assert!(!format!("{:?}", config).contains("sk-secret"));
        assert!(!serde_json::to_string(&config).unwrap().contains("sk-secret"));
    }
}
