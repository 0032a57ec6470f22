//! Bounded exponential-backoff retry for remote calls.
//!
//! Every attempt runs under a caller-specified timeout. The attempt future is
//! dropped when the timeout fires, which cancels the in-flight request.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use blogpostgen_shared::{BlogPostGenError, Result, RetryConfig};

/// How many times to try a remote call and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait before the first retry. Doubles for each further retry.
    pub base_delay: Duration,
    /// Cap on any single wait.
    pub max_delay: Duration,
    /// Random extra wait, as a fraction of the current backoff step.
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_ratio: 0.0,
        }
    }

    /// Add up to `ratio` × step of random delay to each wait.
    ///
    /// Clamped to `0.0..=1.0` so a step plus its jitter never exceeds the
    /// next step, which keeps successive waits non-decreasing.
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Attempts actually made (at least one).
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before retry number `retry` (1 = the wait after the first failure).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let step = self.base_delay.saturating_mul(factor);

        let jitter = if self.jitter_ratio > 0.0 {
            let sample = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
            step.mul_f64(sample).min(step)
        } else {
            Duration::ZERO
        };

        step.saturating_add(jitter).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(config.jitter_ratio)
    }
}

/// Run `op` under `policy`, giving each attempt at most `timeout`.
///
/// Only errors for which [`BlogPostGenError::is_retryable`] holds are retried.
/// When the budget is exhausted the last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(BlogPostGenError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = policy.backoff(attempt);
                warn!(
                    call = label,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "remote call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(call = label, attempts = attempt, error = %e, "retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_millis(1_000),
        )
    }

    fn unavailable() -> BlogPostGenError {
        BlogPostGenError::Http {
            status: 503,
            message: "service unavailable".into(),
        }
    }

    #[test]
    fn default_policy_from_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.jitter_ratio - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = fast_policy(10);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1_000));
    }

    #[test]
    fn jittered_backoff_is_non_decreasing_and_bounded() {
        let policy = fast_policy(10).with_jitter(1.0);
        for _ in 0..200 {
            let delays: Vec<Duration> = (1..=8).map(|retry| policy.backoff(retry)).collect();
            for pair in delays.windows(2) {
                assert!(pair[0] <= pair[1], "{delays:?} not non-decreasing");
            }
            assert!(delays.iter().all(|d| *d <= policy.max_delay));
            assert!(delays[0] >= policy.base_delay);
        }
    }

    #[test]
    fn jitter_ratio_is_clamped() {
        assert!((fast_policy(1).with_jitter(3.0).jitter_ratio - 1.0).abs() < f64::EPSILON);
        assert_eq!(fast_policy(1).with_jitter(-1.0).jitter_ratio, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_uses_full_budget_then_propagates() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<()> = with_retry(&fast_policy(3), Duration::from_secs(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(BlogPostGenError::Http { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "service unavailable");
            }
            other => panic!("expected HTTP 503, got {other:?}"),
        }
        // 100ms + 200ms of backoff between the three attempts
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast_policy(3), Duration::from_secs(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(BlogPostGenError::Http {
                    status: 404,
                    message: "no such article".into(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().status(), Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_policy(3), Duration::from_secs(5), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BlogPostGenError::Network("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast_policy(2), Duration::from_secs(1), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(BlogPostGenError::Timeout { timeout_ms: 1_000 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);
        let _: Result<()> = with_retry(&fast_policy(0), Duration::from_secs(1), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
