//! Config Command
//!
//! Usage:
//!   repoatlas config show [-f toml|yaml|json]
//!   repoatlas config path

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::config::{ConfigFormat, ConfigLoader};
use crate::types::{AtlasError, Result};

pub fn parse_format(s: &str) -> std::result::Result<ConfigFormat, String> {
    match s.to_lowercase().as_str() {
        "toml" | "text" => Ok(ConfigFormat::Toml),
        "yaml" | "yml" => Ok(ConfigFormat::Yaml),
        "json" => Ok(ConfigFormat::Json),
        _ => Err(format!("Invalid format '{}'. Valid values: toml, yaml, json", s)),
    }
}

/// Print the effective configuration; the API key is never shown
pub fn show(root: &Path, config_file: Option<&Path>, format: ConfigFormat, out: &Output) -> Result<()> {
    let ctx = CommandContext::load(root, config_file)?;
    let rendered = ConfigLoader::render(&ctx.config, format)?;
    out.result(rendered.trim_end());
    Ok(())
}

/// Show configuration paths
pub fn path(root: &Path, config_file: Option<&Path>, out: &Output) -> Result<()> {
    let mark = |p: &Path| if p.exists() { "✓" } else { "✗" };

    out.header("Configuration paths");
    if let Some(explicit) = config_file {
        out.field("Explicit", format!("{} {}", mark(explicit), explicit.display()));
    }
    match ConfigLoader::global_config_path() {
        Some(global) => out.field("Global", format!("{} {}", mark(&global), global.display())),
        None => out.field("Global", "(not available)"),
    }
    let project = ConfigLoader::project_config_path(root);
    out.field("Project", format!("{} {}", mark(&project), project.display()));
    let db = ConfigLoader::database_path(root);
    out.field("Database", format!("{} {}", mark(&db), db.display()));

    if config_file.is_some_and(|p| !p.exists()) {
        return Err(AtlasError::Config("Explicit config file does not exist".to_string()));
    }
    Ok(())
}
