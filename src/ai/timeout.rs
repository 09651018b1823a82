//! Timeout Helpers
//!
//! Wraps async operations so that expiry becomes an
//! [`AtlasError::Timeout`], which the retry layer treats as a retryable
//! transport failure rather than a hang.

use std::future::Future;
use std::time::Duration;

use crate::types::{AtlasError, Result};

/// Execute an async operation with a timeout
///
/// # Example
///
/// ```ignore
/// let text = with_timeout(
///     Duration::from_secs(30),
///     provider.generate(prompt, &options),
///     "model generation"
/// ).await?;
/// ```
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(AtlasError::timeout(operation_name, timeout)),
    }
}
