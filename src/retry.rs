//! Retry Logic
//!
//! Bounded retry with fixed or exponential backoff, used by the executor to
//! ride out transient store failures when recording an outcome.
//!
//! ## Usage
//!
//! ```
//! use std::time::Duration;
//! use tokio_genjob::retry::{retry_if, RetryPolicy};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let policy = RetryPolicy::exponential(3, Duration::from_millis(50));
//!
//! let result: Result<u8, &str> = retry_if(&policy, || async { Ok(7) }, |_| true).await;
//! assert_eq!(result, Ok(7));
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (values below 1 behave as 1).
    pub max_attempts: usize,
    /// Delay between attempts.
    pub strategy: RetryStrategy,
}

/// Retry backoff strategy
#[derive(Clone, Debug, PartialEq)]
pub enum RetryStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff (delay doubles each time, capped)
    Exponential {
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
    },
}

impl RetryPolicy {
    /// Create policy with fixed delay
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Fixed(delay),
        }
    }

    /// Create policy with exponential backoff capped at 5 seconds
    pub fn exponential(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Exponential {
                initial_delay,
                max_delay: Duration::from_secs(5),
            },
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match &self.strategy {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential {
                initial_delay,
                max_delay,
            } => {
                let shift = attempt.saturating_sub(1).min(16) as u32;
                initial_delay
                    .checked_mul(1u32 << shift)
                    .unwrap_or(*max_delay)
                    .min(*max_delay)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100))
    }
}

/// Run `f` until it succeeds, `should_retry` refuses an error, or the policy
/// runs out of attempts. Returns the last error in the failure cases.
pub async fn retry_if<F, Fut, T, E, P>(policy: &RetryPolicy, mut f: F, mut should_retry: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "retry: operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!(error = %e, "retry: error is not retryable");
                    return Err(e);
                }

                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %e, "retry: all attempts exhausted");
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max = max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "retry: operation failed"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
