/// Bounded exponential backoff for transient remote errors.
///
/// Non-transient errors are returned immediately. The delay doubles from
/// `base_delay` up to `max_delay`; attempts are capped by `max_attempts`.
use std::time::Duration;

use super::RemoteError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before the given retry (0-based retry index).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `f` with retries on transient errors.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    f: F,
) -> Result<T, RemoteError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, RemoteError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    log::info!(
                        "[boardsync.remote] {} succeeded after {} retries",
                        operation,
                        attempt
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                attempt += 1;
                if !err.is_transient() || attempt >= config.max_attempts {
                    if err.is_transient() {
                        log::warn!(
                            "[boardsync.remote] {} exhausted {} attempts: {}",
                            operation,
                            attempt,
                            err
                        );
                    }
                    return Err(err);
                }
                let delay = config.delay(attempt - 1);
                log::warn!(
                    "[boardsync.remote] {} transient failure (attempt {}): {}; retrying in {:?}",
                    operation,
                    attempt,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let cfg = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(cfg.delay(0), Duration::from_millis(500));
        assert_eq!(cfg.delay(1), Duration::from_secs(1));
        assert_eq!(cfg.delay(2), Duration::from_secs(2));
        assert_eq!(cfg.delay(3), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let cfg = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result = with_retry(&cfg, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::Http(503))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let cfg = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&cfg, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::NotFound("card".into()))
        })
        .await;
        assert!(matches!(result, Err(RemoteError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let cfg = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&cfg, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::RateLimited)
        })
        .await;
        assert!(matches!(result, Err(RemoteError::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
