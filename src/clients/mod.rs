pub mod arcgis;
pub mod docusign;
pub mod mediavalet;
pub mod token_cache;

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Bounded exponential backoff for idempotent GETs against the external
/// services. Nothing else retries: token exchanges, uploads and attribute
/// patches run at most once per workflow step.
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run an idempotent request, retrying only on upstream failures.
/// Validation/NotFound/Configuration outcomes are definitive and return
/// immediately.
pub async fn get_with_retry<T, F, Fut>(
    operation: &'static str,
    config: &RetryConfig,
    request: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match request().await {
            Ok(value) => return Ok(value),
            Err(err @ AppError::ExternalService { .. }) if attempt < config.attempts => {
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "external call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, config);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    #[test]
    fn delay_doubles_until_the_cap() {
        let config = RetryConfig::default();
        let mut delay = config.initial_delay;
        let expected_ms = [500, 1000, 2000, 4000, 5000, 5000];
        for &ms in &expected_ms {
            assert_eq!(delay.as_millis() as u64, ms);
            delay = next_delay(delay, &config);
        }
    }

    #[tokio::test]
    async fn transient_upstream_failures_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = get_with_retry("list assets", &fast_config(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::external("mediavalet", "503"))
            } else {
                Ok("payload")
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "payload");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = get_with_retry("list assets", &fast_config(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::external("mediavalet", "503"))
        })
        .await;

        assert!(matches!(result, Err(AppError::ExternalService { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn definitive_errors_do_not_retry() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = get_with_retry("find folder", &fast_config(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::not_found("folder missing"))
        })
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
