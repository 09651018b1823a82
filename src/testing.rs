//! Test doubles shared across module tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::ai::{GenerateOptions, LlmProvider};
use crate::types::Result;

type Responder = dyn Fn(&str, u32) -> Result<String> + Send + Sync;

/// Provider answering from a closure of `(prompt, call_index)`
pub struct MockProvider {
    responder: Box<Responder>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, u32) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(prompt, call)
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// File path line every analysis prompt carries; lets responders branch per file
pub fn prompt_path(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Path: "))
        .map(str::trim)
}
