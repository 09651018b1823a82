//! Init Command
//!
//! Initialize RepoAtlas in a project directory.

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::open_project_db;
use crate::config::ConfigLoader;
use crate::types::{AtlasError, Result};

pub fn run(root: &Path, force: bool, out: &Output) -> Result<()> {
    if ConfigLoader::is_project_initialized(root) && !force {
        return Err(AtlasError::Config(
            "Already initialized. Use --force to overwrite.".to_string(),
        ));
    }

    let dir = ConfigLoader::init_project(root, force)?;
    open_project_db(root)?;

    out.success(&format!("Initialized RepoAtlas in {}", dir.display()));
    out.field("Config", ConfigLoader::project_config_path(root).display());
    out.field("Database", ConfigLoader::database_path(root).display());
    out.info("Next: run 'repoatlas analyze' to document the repository");
    Ok(())
}
