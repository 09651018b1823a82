//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (platform config dir, e.g. ~/.config/repoatlas/config.toml)
//! 3. Project config (.repoatlas/config.toml)
//! 4. Environment variables (REPOATLAS_* prefix, `__` between sections)

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use tracing::{debug, info};

use super::types::Config;
use crate::constants::storage;
use crate::types::{AtlasError, Result};

/// Output format for `config show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
    Json,
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load(project_root: &Path) -> Result<Config> {
        let config: Config = Self::figment(project_root).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load with an explicit config file in place of the global and project files
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(AtlasError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Self::env())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(project_root: &Path) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(global_path));
        }

        let project_path = Self::project_config_path(project_root);
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(project_path));
        }

        figment.merge(Self::env())
    }

    // REPOATLAS_LLM__MODEL -> llm.model, REPOATLAS_QUERY__MAX_CANDIDATES -> query.max_candidates
    fn env() -> Env {
        Env::prefixed("REPOATLAS_").split("__").lowercase(true)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Platform config directory, e.g. ~/.config/repoatlas/
    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "repoatlas").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join(storage::CONFIG_FILE))
    }

    /// Project state directory (.repoatlas/)
    pub fn project_dir(project_root: &Path) -> PathBuf {
        project_root.join(storage::STATE_DIR)
    }

    pub fn project_config_path(project_root: &Path) -> PathBuf {
        Self::project_dir(project_root).join(storage::CONFIG_FILE)
    }

    /// Persistent cache, runs, and sessions live here
    pub fn database_path(project_root: &Path) -> PathBuf {
        Self::project_dir(project_root).join(storage::DATABASE_FILE)
    }

    pub fn is_project_initialized(project_root: &Path) -> bool {
        Self::project_config_path(project_root).exists()
    }

    // =========================================================================
    // Rendering & Initialization
    // =========================================================================

    /// Render the effective configuration; the API key is never included
    pub fn render(config: &Config, format: ConfigFormat) -> Result<String> {
        Ok(match format {
            ConfigFormat::Toml => toml::to_string_pretty(config)?,
            ConfigFormat::Yaml => serde_yaml::to_string(config)?,
            ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        })
    }

    /// Create `.repoatlas/` with a commented default config.
    /// An existing config is left alone unless `force` is set.
    pub fn init_project(project_root: &Path, force: bool) -> Result<PathBuf> {
        let project_dir = Self::project_dir(project_root);
        fs::create_dir_all(&project_dir)?;

        let config_path = Self::project_config_path(project_root);
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_project_config())?;
            info!("Created project config: {}", config_path.display());
        } else {
            info!("Project config exists: {}", config_path.display());
        }

        Ok(project_dir)
    }

    fn default_project_config() -> String {
        r#"# RepoAtlas Project Configuration
# Overrides the global config. Environment variables override both,
# e.g. REPOATLAS_LLM__MODEL=llama3.1 or REPOATLAS_BUDGET__MAX_TOKENS=200000

[llm]
provider = "ollama"
# model = "llama3.1"
# api_base = "http://localhost:11434"
temperature = 0.2
timeout_secs = 120

[analysis]
mode = "standard"
include = ["**/*"]
exclude = [
    "node_modules/**",
    "dist/**",
    ".git/**",
    "target/**",
    "build/**",
    ".repoatlas/**",
]

[pipeline.retry]
max_attempts = 3

[budget]
# max_tokens = 500000
# max_minutes = 30

[cache]
persist = true

[diagram]
granularity = "file"
min_confidence = 0.5
format = "mermaid"

[query]
max_candidates = 8
session_idle_minutes = 30
"#
        .to_string()
    }
}
