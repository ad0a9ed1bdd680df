// Bounded retry for units of work that lost an optimistic-concurrency race

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Exponential backoff with full jitter, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        let ceiling = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let ceiling_micros = ceiling.as_micros() as u64;
        if ceiling_micros == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::rng().random_range(0..=ceiling_micros))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget runs out. Exhaustion surfaces as `Unavailable`.
    /// `on_retry` fires once per conflict that is retried.
    pub async fn run<T, F, Fut, R>(&self, operation: &str, mut op: F, mut on_retry: R) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
        R: FnMut(),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(err) if err.is_transient() => {
                    let reason = err.to_string();
                    if attempt >= self.max_attempts {
                        warn!(operation, attempts = attempt, %reason, "retries exhausted");
                        return Err(AppError::Unavailable(format!(
                            "{} gave up after {} attempts: {}",
                            operation, attempt, reason
                        )));
                    }
                    on_retry();
                    let delay = self.backoff(attempt - 1);
                    debug!(operation, attempt, ?delay, %reason, "conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let mut retries = 0;
        let result = fast_policy(5)
            .run(
                "flaky",
                move || async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(AppError::Conflict("version moved".into()))
                    } else {
                        Ok(n)
                    }
                },
                || retries += 1,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_is_unavailable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: AppResult<()> = fast_policy(3)
            .run(
                "always_conflicts",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::Conflict("busy".into()))
                },
                || {},
            )
            .await;

        assert!(matches!(result, Err(AppError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: AppResult<()> = fast_policy(5)
            .run(
                "missing",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::NotFound("post 9".into()))
                },
                || {},
            )
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(4),
            max_delay: Duration::from_millis(20),
        };
        for attempt in 0..40 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(20));
        }
        let zero = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        assert_eq!(zero.backoff(3), Duration::ZERO);
    }
}
