//! Model invocation layer
//!
//! ## Components
//!
//! - `provider`: transport trait with OpenAI-compatible and Ollama backends
//! - `retry`: `ModelClient` with timeout, backoff and bounded attempts
//! - `health`: run-wide transport health (loss detection)
//! - `validation`: JSON extraction from untrusted model output

pub mod health;
pub mod provider;
pub mod retry;
pub mod timeout;
pub mod validation;

pub use health::{HealthState, TransportHealth};
pub use provider::{
    GenerateOptions, LlmProvider, OllamaProvider, OpenAiProvider, ProviderConfig, SharedProvider,
    create_provider,
};
pub use retry::{Generation, ModelClient, RetryPolicy};
pub use timeout::with_timeout;
