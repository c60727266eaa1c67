//! Bounded retry with fixed or exponential backoff.
//!
//! [`BackoffPolicy::run_with_retry`] drives a fallible async operation until
//! it succeeds, fails terminally, or runs out of attempts. Only failures that
//! report themselves as [`Retryable`] are retried; everything else is handed
//! straight back to the caller.
//!
//! # Delay schedule
//!
//! ```text
//! fixed:        delay(n) = base_delay
//! exponential:  delay(n) = min(base_delay * 2^n, max_delay)
//! ```
//!
//! where `n` counts the retryable failures seen before the current one,
//! starting at 0. Optional jitter in `0..=jitter` is added on top.

use crate::error::{ClassifyError, RetryError};
use rand::{Rng, rng};
use std::error::Error;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Classifies a failure as worth retrying or not.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ClassifyError {
    fn is_retryable(&self) -> bool {
        ClassifyError::is_retryable(self)
    }
}

/// Retry policy for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Upper bound on the number of times the operation is invoked.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub exponential: bool,
    /// Cap for exponential delays; ignored in fixed mode.
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            exponential: false,
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        }
    }
}

/// A successful result plus how much retrying it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    /// Number of backoff sleeps before the successful call.
    pub retries: u32,
    pub waited: Duration,
}

/// Per-call retry bookkeeping; dropped when the call returns.
#[derive(Debug, Default)]
struct RetryState {
    attempts: u32,
    next_delay: Duration,
    waited: Duration,
}

impl BackoffPolicy {
    /// Delay after the `prior_failures + 1`-th retryable failure, before jitter.
    pub fn delay_for(&self, prior_failures: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        2u32.checked_pow(prior_failures)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter.is_zero() {
            return delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(jitter_ms)
    }

    /// Run `operation` under this policy.
    ///
    /// Returns as soon as the operation succeeds, or with
    /// [`RetryError::Terminal`] on the first non-retryable failure. After
    /// `max_attempts` retryable failures it gives up with
    /// [`RetryError::MaxRetriesExceeded`] without sleeping again.
    ///
    /// # Arguments
    /// * `operation` - Called once per attempt to produce a fresh future.
    ///
    /// # Returns
    /// The value with retry counts, or the error that ended the attempts.
    pub async fn run_with_retry<T, E, F, Fut>(
        &self,
        mut operation: F,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Error + 'static,
    {
        let total_t0 = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut state = RetryState::default();

        loop {
            let attempt_t0 = Instant::now();
            state.attempts += 1;
            match operation().await {
                Ok(value) => {
                    if state.attempts > 1 {
                        debug!(
                            attempts = state.attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis(),
                            "Succeeded after backing off"
                        );
                    }
                    return Ok(Retried {
                        value,
                        retries: state.attempts - 1,
                        waited: state.waited,
                    });
                }
                Err(cause) if !cause.is_retryable() => {
                    return Err(RetryError::Terminal { cause });
                }
                Err(last) => {
                    if state.attempts >= max_attempts {
                        error!(
                            attempt = state.attempts,
                            max = max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis(),
                            error = %last,
                            "Exhausted retries"
                        );
                        return Err(RetryError::MaxRetriesExceeded {
                            attempts: state.attempts,
                            waited: state.waited,
                            last,
                        });
                    }

                    state.next_delay = self.jittered(self.delay_for(state.attempts - 1));
                    warn!(
                        attempt = state.attempts,
                        max = max_attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis(),
                        delay = ?state.next_delay,
                        error = %last,
                        "Rate limited; backing off"
                    );
                    sleep(state.next_delay).await;
                    state.waited += state.next_delay;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(max_attempts: u32, secs: u64) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            base_delay: Duration::from_secs(secs),
            exponential: false,
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        }
    }

    fn rate_limited() -> ClassifyError {
        ClassifyError::RateLimited("429 Too Many Requests".to_string())
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = fixed(3, 5);
        for n in 0..10 {
            assert_eq!(policy.delay_for(n), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_exponential_delay_is_monotonic_and_capped() {
        let policy = BackoffPolicy {
            exponential: true,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            ..fixed(10, 1)
        };

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        // Overflowing shifts saturate at the cap instead of wrapping.
        assert_eq!(policy.delay_for(64), Duration::from_secs(30));

        let delays: Vec<_> = (0..40).map(|n| policy.delay_for(n)).collect();
        assert!(delays.windows(2).all(|w| w[1] >= w[0]));
        assert!(delays.iter().all(|d| *d <= policy.max_delay));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = BackoffPolicy {
            jitter: Duration::from_millis(250),
            ..fixed(3, 1)
        };
        for _ in 0..100 {
            let d = policy.jittered(Duration::from_secs(1));
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_millis(1250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_try_has_no_delay() {
        let t0 = tokio::time::Instant::now();
        let out = fixed(3, 5)
            .run_with_retry(|| async { Ok::<_, ClassifyError>("Technology") })
            .await
            .unwrap();

        assert_eq!(out.value, "Technology");
        assert_eq!(out.retries, 0);
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_rate_limits_then_success() {
        let calls = AtomicU32::new(0);
        let t0 = tokio::time::Instant::now();

        let out = fixed(3, 5)
            .run_with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(rate_limited())
                    } else {
                        Ok(format!("call {n}"))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(out.value, "call 3");
        assert_eq!(out.retries, 2);
        assert_eq!(out.waited, Duration::from_secs(10));
        assert_eq!(t0.elapsed(), Duration::from_secs(10));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_rate_limited_gives_up_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = fixed(3, 5)
            .run_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(rate_limited()) }
            })
            .await;

        match result {
            Err(RetryError::MaxRetriesExceeded {
                attempts, waited, ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(waited, Duration::from_secs(10));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let t0 = tokio::time::Instant::now();
        let result = fixed(5, 5)
            .run_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClassifyError::Response("empty".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Terminal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_waits_follow_schedule() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            exponential: true,
            max_delay: Duration::from_secs(10),
            jitter: Duration::ZERO,
        };
        let t0 = tokio::time::Instant::now();
        let result = policy
            .run_with_retry(|| async { Err::<(), _>(rate_limited()) })
            .await;

        // 2 + 4 + 8 + 10 (capped); no sleep after the last attempt.
        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { attempts: 5, .. })
        ));
        assert_eq!(t0.elapsed(), Duration::from_secs(24));
    }
}
