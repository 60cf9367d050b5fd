//! Retry execution: bounded attempts with exponential backoff.
//!
//! Used by the orchestrator for satisfied checks and `execute` calls, and by the
//! privilege broker for each elevated step.

use std::future::Future;
use std::time::Duration;

use crate::models::Configuration;

/// Bounded retry with a doubling delay.
///
/// The delay after failed attempt `n` (1-based) is `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Phase retry policy from the run configuration.
    pub fn from_config(config: &Configuration) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_secs(config.retry_base_delay_secs),
        )
    }

    /// Policy for individual elevated filesystem operations.
    pub fn for_privileged_ops() -> Self {
        Self::new(3, Duration::from_millis(250))
    }

    /// Run at most once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Outcome of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. `on_retry` is told about each failure
/// that will be retried and the delay before the next attempt.
pub async fn retry_with_backoff<T, E, F, Fut, R, N>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut on_retry: N,
    mut op: F,
) -> Attempted<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    N: FnMut(u32, Duration, &E),
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_after(attempt);
                on_retry(attempt, delay, &e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}
