//! Model Transport Abstraction
//!
//! Defines the [`LlmProvider`] trait: a single `generate(prompt, options) -> text`
//! call. Transports classify their own failures into
//! [`TransportError`](crate::types::TransportError) kinds; retry and timeout
//! policy lives in [`crate::ai::retry`].

mod ollama;
mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::network as net_constants;
use crate::types::{AtlasError, Result};

/// Shared provider type for concurrent access across pipeline workers
pub type SharedProvider = Arc<dyn LlmProvider + Send + Sync>;

// =============================================================================
// Generation Options
// =============================================================================

/// Per-call generation options
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: usize,
    /// 0.0 = deterministic, 1.0 = creative
    pub temperature: f32,
    /// Deadline for a single call; expiry counts as a retryable timeout
    pub timeout: Duration,
    /// Ask the transport for JSON-only output when it supports that
    pub json: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.2,
            timeout: Duration::from_secs(net_constants::DEFAULT_TIMEOUT_SECS),
            json: true,
        }
    }
}

impl GenerateOptions {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            json: true,
        }
    }

    /// Free-text variant for answers and captions
    pub fn text(mut self) -> Self {
        self.json = false;
        self
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Configuration for model transports
///
/// API keys are never serialized to output and are redacted in debug output.
/// Each provider converts the key to `SecretString` internally.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider type: "openai", "ollama"
    pub provider: String,
    /// Model name (provider-specific)
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: usize,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: None,
            timeout_secs: net_constants::DEFAULT_TIMEOUT_SECS,
            temperature: 0.2,
            api_key: None,
            api_base: None,
            max_tokens: 2048,
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate text for `prompt`
    ///
    /// Failures are reported as `AtlasError::Transport` with a classified kind.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;

    /// Check if the provider is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// Create a shared provider from configuration
pub fn create_provider(config: &ProviderConfig) -> Result<SharedProvider> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config.clone())?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config.clone())?)),
        _ => Err(AtlasError::Config(format!(
            "Unknown provider: {}. Supported: openai, ollama",
            config.provider
        ))),
    }
}

/// Validate an endpoint URL (http/https only) and strip the trailing slash
pub(crate) fn validate_endpoint(endpoint: &str, provider: &str) -> Result<String> {
    let url = url::Url::parse(endpoint).map_err(|e| {
        AtlasError::Config(format!("Invalid {} endpoint URL '{}': {}", provider, endpoint, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AtlasError::Config(format!(
            "{} endpoint must use http or https scheme, got: {}",
            provider,
            url.scheme()
        )));
    }

    let mut result = url.to_string();
    if result.ends_with('/') {
        result.pop();
    }
    Ok(result)
}
