//! File Analyzer
//!
//! One model call per file, validated before it becomes a record:
//! - Malformed output gets one retry with a stricter prompt
//! - A second malformed answer or exhausted transport retries degrade the file
//! - Loss of the transport is the only model failure that propagates
//!
//! The analyzer is immutable and shared across concurrent workers via `Arc`.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::parsers::parse_analysis_response;
use super::prompts::build_analysis_prompt;
use crate::ai::ModelClient;
use crate::cache::ContentCache;
use crate::types::{AnalysisRecord, AtlasError, FileEntry, RepositorySnapshot, Result};

pub struct FileAnalyzer {
    client: ModelClient,
    cache: Arc<ContentCache>,
    max_file_chars: usize,
}

impl FileAnalyzer {
    pub fn new(client: ModelClient, cache: Arc<ContentCache>, max_file_chars: usize) -> Self {
        Self {
            client,
            cache,
            max_file_chars,
        }
    }

    /// Analyze `file` and write the record to the content cache.
    ///
    /// Returns degraded records instead of errors for per-file failures;
    /// `Err` means the whole run must stop.
    #[instrument(skip_all, fields(path = %file.path))]
    pub async fn analyze(
        &self,
        file: &FileEntry,
        snapshot: &RepositorySnapshot,
    ) -> Result<Arc<AnalysisRecord>> {
        let record = match self.analyze_uncached(file, snapshot).await {
            Ok(record) => record,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(path = %file.path, error = %err, "File analysis degraded");
                AnalysisRecord::degraded(file.hash.clone(), err.to_string())
            }
        };
        self.cache.put(&file.hash, record)
    }

    async fn analyze_uncached(
        &self,
        file: &FileEntry,
        snapshot: &RepositorySnapshot,
    ) -> Result<AnalysisRecord> {
        let prompt = build_analysis_prompt(file, snapshot, self.max_file_chars, false);
        let first = self.client.generate(&prompt).await?;

        let rejected = match parse_analysis_response(&file.hash, &first.text) {
            Ok(record) => return Ok(record),
            Err(err) => err,
        };
        debug!(path = %file.path, error = %rejected, "Malformed response, retrying strictly");

        let strict = build_analysis_prompt(file, snapshot, self.max_file_chars, true);
        let second = self.client.generate(&strict).await?;
        parse_analysis_response(&file.hash, &second.text).map_err(AtlasError::MalformedResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{GenerateOptions, RetryPolicy, TransportHealth};
    use crate::testing::MockProvider;
    use crate::types::{TransportError, TransportErrorKind};

    const GOOD: &str = r#"{"summary": "Defines A", "entities": [{"name": "A", "kind": "class"}]}"#;

    fn analyzer(provider: Arc<MockProvider>, cache: Arc<ContentCache>) -> FileAnalyzer {
        let client = ModelClient::new(provider, GenerateOptions::default(), RetryPolicy::immediate(3));
        FileAnalyzer::new(client, cache, 4000)
    }

    fn snapshot() -> RepositorySnapshot {
        RepositorySnapshot::from_contents([("a.py", "class A: pass\n")])
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let cache = Arc::new(ContentCache::in_memory());
        let provider = Arc::new(MockProvider::constant(GOOD));
        let snap = snapshot();
        let file = &snap.files()[0];

        let record = analyzer(provider.clone(), cache.clone())
            .analyze(file, &snap)
            .await
            .unwrap();
        assert_eq!(record.summary, "Defines A");
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.get(&file.hash).unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_malformed_then_strict_retry_succeeds() {
        let cache = Arc::new(ContentCache::in_memory());
        let provider = Arc::new(MockProvider::new(|prompt, _| {
            if prompt.contains("<STRICT>") {
                Ok(GOOD.to_string())
            } else {
                Ok("Sure! This file defines a class.".to_string())
            }
        }));
        let snap = snapshot();

        let record = analyzer(provider.clone(), cache)
            .analyze(&snap.files()[0], &snap)
            .await
            .unwrap();
        assert!(!record.is_degraded());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_twice_degrades() {
        let cache = Arc::new(ContentCache::in_memory());
        let provider = Arc::new(MockProvider::constant("{\"entities\": []}"));
        let snap = snapshot();
        let file = &snap.files()[0];

        let record = analyzer(provider.clone(), cache.clone())
            .analyze(file, &snap)
            .await
            .unwrap();
        assert!(record.is_degraded());
        assert_eq!(record.summary, crate::types::DEGRADED_SUMMARY);
        assert!(record.entities.is_empty());
        assert_eq!(provider.calls(), 2);
        // Degraded records are retried on the next run
        assert!(cache.get(&file.hash).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_three_times_degrades() {
        let cache = Arc::new(ContentCache::in_memory());
        let provider = Arc::new(MockProvider::new(|_, _| {
            Err(TransportError::rate_limited("429").into())
        }));
        let snap = snapshot();

        let record = analyzer(provider.clone(), cache)
            .analyze(&snap.files()[0], &snap)
            .await
            .unwrap();
        assert!(record.is_degraded());
        assert_eq!(provider.calls(), 3);
        assert!(
            record
                .degraded_reason
                .as_deref()
                .is_some_and(|r| r.contains(&TransportErrorKind::RateLimited.to_string()))
        );
    }

    #[tokio::test]
    async fn test_transport_loss_propagates() {
        let cache = Arc::new(ContentCache::in_memory());
        let provider = Arc::new(MockProvider::new(|_, _| {
            Err(TransportError::unavailable("connection refused").into())
        }));
        let health = Arc::new(TransportHealth::new(1));
        let client = ModelClient::new(provider, GenerateOptions::default(), RetryPolicy::immediate(2))
            .with_health(health);
        let snap = snapshot();

        let err = FileAnalyzer::new(client, cache, 4000)
            .analyze(&snap.files()[0], &snap)
            .await
            .unwrap_err();
        assert!(matches!(err, AtlasError::TransportLost { .. }));
    }
}
