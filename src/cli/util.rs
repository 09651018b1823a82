//! CLI Common Utilities
//!
//! Shared initialization and context management for CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::ai::{GenerateOptions, ModelClient, TransportHealth, create_provider};
use crate::analyzer::scanner::{FileScanner, ScanReport};
use crate::cache::ContentCache;
use crate::config::{Config, ConfigLoader};
use crate::pipeline::DiagramCache;
use crate::storage::{Database, SharedDatabase};
use crate::types::{AtlasError, RepositorySnapshot, Result};

/// Command execution context
///
/// Resolved project root, effective configuration and the project database
/// when the project is initialized.
#[derive(Clone)]
pub struct CommandContext {
    pub project_root: PathBuf,
    pub config: Config,
    pub db: Option<SharedDatabase>,
}

impl CommandContext {
    /// Load configuration for `root`; an explicit `config_file` replaces the
    /// global and project files.
    pub fn load(root: &Path, config_file: Option<&Path>) -> Result<Self> {
        let project_root = root
            .canonicalize()
            .map_err(|e| AtlasError::InvalidInput(format!("{}: {}", root.display(), e)))?;
        let config = match config_file {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&project_root)?,
        };
        Ok(Self {
            project_root,
            config,
            db: None,
        })
    }

    /// Open (creating if needed) the project database
    pub fn with_database(mut self) -> Result<Self> {
        let db = open_project_db(&self.project_root)?;
        self.db = Some(Arc::new(db));
        Ok(self)
    }

    /// Like [`with_database`](Self::with_database) but only when the database already exists
    pub fn with_existing_database(mut self) -> Result<Self> {
        let path = ConfigLoader::database_path(&self.project_root);
        if !path.exists() {
            return Err(AtlasError::NotInitialized);
        }
        let db = Database::open(&path)?;
        db.initialize()?;
        self.db = Some(Arc::new(db));
        Ok(self)
    }

    pub fn database(&self) -> Result<&SharedDatabase> {
        self.db.as_ref().ok_or(AtlasError::NotInitialized)
    }

    /// Content cache, persistent when `cache.persist` is on and a database is open
    pub fn content_cache(&self) -> Arc<ContentCache> {
        match (&self.db, self.config.cache.persist) {
            (Some(db), true) => Arc::new(ContentCache::persistent(db.clone())),
            _ => Arc::new(ContentCache::in_memory()),
        }
    }

    pub fn diagram_cache(&self) -> Arc<DiagramCache> {
        match (&self.db, self.config.cache.persist) {
            (Some(db), true) => Arc::new(DiagramCache::persistent(db.clone())),
            _ => Arc::new(DiagramCache::in_memory()),
        }
    }

    /// Model client with the configured transport, retry policy and loss threshold
    pub fn model_client(&self) -> Result<ModelClient> {
        let provider_config = self.config.llm.provider_config();
        let provider = create_provider(&provider_config)?;
        let health = Arc::new(TransportHealth::new(
            self.config.pipeline.transport_loss_threshold,
        ));
        debug!(
            provider = provider.name(),
            model = provider.model(),
            "Model transport ready"
        );
        Ok(ModelClient::new(
            provider,
            GenerateOptions::from_config(&provider_config),
            self.config.retry_policy(),
        )
        .with_health(health))
    }

    /// Scan the project root with the configured filters
    pub fn scan(&self) -> Result<(RepositorySnapshot, ScanReport)> {
        let analysis = &self.config.analysis;
        FileScanner::new(&self.project_root)
            .with_include(&analysis.include)?
            .with_exclude(&analysis.exclude)?
            .with_max_file_size(analysis.max_file_size)
            .snapshot()
    }

    /// Directory name used as the documentation title
    pub fn project_name(&self) -> String {
        self.project_root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("Repository")
            .to_string()
    }
}

/// Open the project database, creating `.repoatlas/` and the schema when missing
pub fn open_project_db(project_root: &Path) -> Result<Database> {
    let db_path = ConfigLoader::database_path(project_root);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&db_path)?;
    db.initialize()?;
    Ok(db)
}
