//! Configuration Management
//!
//! Hierarchical resolution, later sources winning:
//! 1. Built-in defaults
//! 2. Global config (platform config dir)
//! 3. Project config (.repoatlas/config.toml)
//! 4. Environment variables (REPOATLAS_*)
//! 5. CLI arguments

mod loader;
mod types;

pub use loader::{ConfigFormat, ConfigLoader};
pub use types::*;
