//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Retry policy configuration.
///
/// Delay for retry `n` (1-indexed) is
/// `min(base_delay * backoff_multiplier^(n-1), max_delay)` scaled by a
/// uniformly random factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first (0 behaves like 1).
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub backoff_multiplier: f64,
    /// Jitter factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Backoff delay before retry number `retry` (1-indexed), jitter applied.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = self.backoff_multiplier.powi((retry - 1) as i32);
        let delay_ms = (base_ms * exp).min(max_ms);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };

        Duration::from_millis((delay_ms * factor).max(0.0) as u64)
    }

    /// Run `op` until it succeeds, exhausts the attempt budget, or fails with
    /// an error `should_retry` rejects.
    ///
    /// The returned error is always the *last* error observed; failures are
    /// never swallowed. A non-retryable error propagates after exactly one
    /// attempt.
    pub async fn run<T, E, F, Fut, P>(&self, should_retry: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !should_retry(&err) {
                        debug!(attempt, error = %err, "error not retryable");
                        return Err(err);
                    }
                    if attempt >= max_attempts {
                        debug!(attempt, error = %err, "retry budget exhausted");
                        return Err(err);
                    }

                    let delay = self.delay_for_retry(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable: {})", self.retryable)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_retry(4), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.0,
            jitter: 0.5,
        };

        for _ in 0..100 {
            let d = policy.delay_for_retry(1).as_millis();
            assert!((500..=1500).contains(&d), "delay {} out of bounds", d);
        }
    }

    #[tokio::test]
    async fn retryable_error_is_attempted_max_times() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result: Result<(), TestError> = policy
            .run(
                |e: &TestError| e.retryable,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError { retryable: true }) }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_is_attempted_once() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result: Result<(), TestError> = policy
            .run(
                |e: &TestError| e.retryable,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError { retryable: false }) }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(5);

        let result: Result<u32, TestError> = policy
            .run(
                |e: &TestError| e.retryable,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 3 {
                            Err(TestError { retryable: true })
                        } else {
                            Ok(n)
                        }
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
