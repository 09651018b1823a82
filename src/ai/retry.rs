//! Retrying Model Client
//!
//! Wraps a [`SharedProvider`] with the call discipline every stage uses:
//! - per-attempt timeout (expiry is a retryable `Timeout`)
//! - exponential backoff via `backon`, honouring provider `retry_after` hints
//! - bounded attempts, then the last error is returned for the caller to degrade
//! - run-wide [`TransportHealth`] so losing the transport fails fast

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{debug, instrument, warn};

use super::health::TransportHealth;
use super::provider::{GenerateOptions, SharedProvider};
use super::timeout::with_timeout;
use crate::constants::retry as retry_constants;
use crate::types::{AtlasError, Result};

/// Backoff and attempt bounds for model calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry_constants::DEFAULT_MAX_ATTEMPTS,
            min_delay: Duration::from_millis(retry_constants::BASE_DELAY_MS),
            max_delay: Duration::from_secs(retry_constants::MAX_DELAY_SECS),
            factor: retry_constants::BACKOFF_FACTOR,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy without waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: retry_constants::BACKOFF_FACTOR,
            jitter: false,
        }
    }

    /// Delays between attempts; yields `max_attempts - 1` items
    fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);
        if self.jitter {
            builder.with_jitter().build()
        } else {
            builder.build()
        }
    }
}

/// Successful generation and how many attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct ModelClient {
    provider: SharedProvider,
    options: GenerateOptions,
    policy: RetryPolicy,
    health: Arc<TransportHealth>,
}

impl ModelClient {
    pub fn new(provider: SharedProvider, options: GenerateOptions, policy: RetryPolicy) -> Self {
        Self {
            provider,
            options,
            policy,
            health: Arc::new(TransportHealth::default()),
        }
    }

    /// Share transport health with other clients of the same run
    pub fn with_health(mut self, health: Arc<TransportHealth>) -> Self {
        self.health = health;
        self
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    pub fn health(&self) -> &Arc<TransportHealth> {
        &self.health
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn generate(&self, prompt: &str) -> Result<Generation> {
        self.generate_with(prompt, &self.options).await
    }

    #[instrument(skip(self, prompt, options), fields(provider = %self.provider.name()))]
    pub async fn generate_with(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation> {
        if self.health.is_lost() {
            return Err(AtlasError::TransportLost {
                failures: self.health.consecutive_failures(),
            });
        }

        let mut delays = self.policy.delays();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = with_timeout(
                options.timeout,
                self.provider.generate(prompt, options),
                "model generation",
            )
            .await;

            let err = match result {
                Ok(text) => {
                    self.health.record_success();
                    debug!(attempts, "Model call succeeded");
                    return Ok(Generation { text, attempts });
                }
                Err(err) => err,
            };

            let Some(kind) = err.transport_kind() else {
                return Err(err);
            };

            match delays.next() {
                Some(backoff) => {
                    let delay = err
                        .retry_after()
                        .map_or(backoff, |hint| hint.max(backoff))
                        .min(self.policy.max_delay);
                    warn!(attempts, %kind, delay_ms = delay.as_millis() as u64, "Model call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(attempts, %kind, "Model call failed, retries exhausted");
                    if self.health.record_exhausted(kind) {
                        return Err(AtlasError::TransportLost {
                            failures: self.health.consecutive_failures(),
                        });
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use crate::types::{TransportError, TransportErrorKind};

    fn client(provider: Arc<MockProvider>, attempts: u32) -> ModelClient {
        ModelClient::new(
            provider,
            GenerateOptions::default(),
            RetryPolicy::immediate(attempts),
        )
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let provider = Arc::new(MockProvider::constant("ok"));
        let out = client(provider.clone(), 3).generate("p").await.unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(out.attempts, 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let provider = Arc::new(MockProvider::new(|_, call| {
            if call < 2 {
                Err(TransportError::rate_limited("slow down").into())
            } else {
                Ok("done".to_string())
            }
        }));
        let out = client(provider.clone(), 3).generate("p").await.unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let provider = Arc::new(MockProvider::new(|_, _| {
            Err(TransportError::rate_limited("slow down").into())
        }));
        let err = client(provider.clone(), 3).generate("p").await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::RateLimited));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_transport_error_is_not_retried() {
        let provider = Arc::new(MockProvider::new(|_, _| {
            Err(AtlasError::InvalidInput("bad prompt".into()))
        }));
        let err = client(provider.clone(), 3).generate("p").await.unwrap_err();
        assert!(matches!(err, AtlasError::InvalidInput(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let provider = Arc::new(
            MockProvider::constant("late").with_delay(Duration::from_millis(200)),
        );
        let options = GenerateOptions {
            timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let c = ModelClient::new(provider.clone(), options, RetryPolicy::immediate(2));
        let err = c.generate("p").await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_exhaustion_loses_transport() {
        let provider = Arc::new(MockProvider::new(|_, _| {
            Err(TransportError::unavailable("connection refused").into())
        }));
        let c = client(provider.clone(), 1).with_health(Arc::new(TransportHealth::new(2)));

        let first = c.generate("a").await.unwrap_err();
        assert!(matches!(first, AtlasError::Transport(_)));
        let second = c.generate("b").await.unwrap_err();
        assert!(matches!(second, AtlasError::TransportLost { .. }));

        // Fails fast without touching the provider
        let calls = provider.calls();
        assert!(matches!(
            c.generate("c").await,
            Err(AtlasError::TransportLost { .. })
        ));
        assert_eq!(provider.calls(), calls);
    }

    #[test]
    fn test_delay_count_matches_attempts() {
        assert_eq!(RetryPolicy::immediate(3).delays().count(), 2);
        assert_eq!(RetryPolicy::immediate(1).delays().count(), 0);
        assert!(RetryPolicy::immediate(4).delays().all(|d| d == Duration::ZERO));
    }
}
