//! Bounded retry with exponential backoff around a fallible source call.
//!
//! Only transient failures (`Timeout`, `RateLimited`, `Unreachable`) are
//! retried. Before retry `n` (0-based) the caller sleeps
//! `base_delay * 2^n + n * jitter_increment`; the linear term spreads out
//! sources that start retrying at the same moment.

use std::future::Future;
use std::time::Duration;

use harvester_shared::{RetryConfig, SourceError};
use tracing::warn;

/// Retry limits and backoff timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter_increment: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            jitter_increment: Duration::from_millis(100),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter_increment: Duration::from_millis(config.jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (0-based). Saturates instead of overflowing.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64
            .checked_shl(retry)
            .and_then(|f| u32::try_from(f).ok())
            .unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(self.jitter_increment.saturating_mul(retry))
    }

    /// Total calls an always-transiently-failing operation receives.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// The last error of an operation that gave up, with the calls made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryFailure {
    pub error: SourceError,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails permanently or exhausts
/// `policy.max_retries`.
///
/// `operation` receives the 1-based attempt number. On success returns the
/// value and the number of calls made.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<(T, u32), RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let error = match operation(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => error,
        };

        let retry = attempt - 1;
        if !error.is_transient() || retry >= policy.max_retries {
            return Err(RetryFailure {
                error,
                attempts: attempt,
            });
        }

        let delay = policy.delay_for(retry);
        warn!(
            attempt,
            kind = %error.kind(),
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "transient source failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            jitter_increment: Duration::from_millis(1),
        }
    }

    #[test]
    fn delay_grows_exponentially_with_linear_jitter() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4300));
    }

    #[test]
    fn delay_saturates() {
        let policy = RetryPolicy {
            max_retries: 100,
            base_delay: Duration::from_secs(u64::MAX / 2),
            jitter_increment: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(64), Duration::MAX);
    }

    #[tokio::test]
    async fn always_rate_limited_is_called_max_retries_plus_one_times() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result: Result<((), u32), RetryFailure> = execute_with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SourceError::RateLimited("HTTP 429".into())) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(failure.attempts, 4);
        assert_eq!(failure.error, SourceError::RateLimited("HTTP 429".into()));
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), RetryFailure> =
            execute_with_retry(&fast_policy(5), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Parse("bad xml".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let result = execute_with_retry(&fast_policy(3), |attempt| async move {
            if attempt < 3 {
                Err(SourceError::Unreachable("HTTP 503".into()))
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), ("ok", 3));
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let result: Result<((), u32), RetryFailure> =
            execute_with_retry(&fast_policy(0), |_| async {
                Err(SourceError::Timeout("slow".into()))
            })
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[test]
    fn policy_from_config() {
        let config = RetryConfig {
            max_retries: 2,
            base_delay_ms: 10,
            jitter_ms: 5,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(25));
    }
}
