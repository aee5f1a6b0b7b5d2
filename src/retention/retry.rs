//! Retry with exponential backoff for transient store errors.
//!
//! Only [`StoreError::Transient`] is retried. Counting, fetching and deleting
//! by identity are all idempotent, so repeating one cannot delete a document
//! twice.

use std::future::Future;

use tracing::{debug, warn};

use crate::{config::RetryConfig, store::StoreResult};

/// Execute a store operation, retrying transient failures per `config`.
///
/// With retries disabled the operation runs exactly once.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    collection: &str,
    operation: &str,
    mut make_request: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    if !config.enabled() {
        return make_request().await;
    }

    let max_attempts = config.max_retries + 1; // +1 for initial attempt
    let mut attempt = 0;

    loop {
        match make_request().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        collection,
                        operation,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    collection,
                    operation,
                    error = %error,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Transient error, will retry after delay"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                if attempt > 0 {
                    warn!(
                        collection,
                        operation,
                        error = %error,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts"
                    );
                }
                return Err(error);
            }
        }
    }
}
