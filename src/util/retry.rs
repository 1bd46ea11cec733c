// ============================================================================
// Bounded Retry
// ============================================================================
//
// Runs a fallible async operation a fixed number of times. Every failed
// attempt is logged; the last error is handed back unchanged once the
// attempts are used up.
//
// Sleep accounting:
// - Constant: `interval` between attempts, nothing after the last one.
//   Worst case (max_attempts - 1) * interval.
// - Linear:   `interval * attempt` after every retryable failure, the last
//   one included. Worst case interval * m * (m + 1) / 2.
//
// ============================================================================

use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Constant,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn constant(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Constant,
        }
    }

    pub fn linear(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Linear,
        }
    }

    /// Single attempt, no sleeping
    pub fn once() -> Self {
        Self::constant(1, Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-based), if another sleep is due
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        match self.backoff {
            Backoff::Constant if attempt < self.max_attempts => Some(self.interval),
            Backoff::Constant => None,
            Backoff::Linear => Some(self.interval * attempt),
        }
    }

    /// Total sleep when every attempt fails
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_attempts)
            .filter_map(|attempt| self.delay_after(attempt))
            .sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DbError::ExecutionError("max_attempts must be >= 1".into()));
        }
        Ok(())
    }
}

/// Outcome of one failed attempt
#[derive(Debug)]
pub enum Attempt<E> {
    /// Transient failure, try again
    Retry(E),
    /// Permanent failure, give up now
    Stop(E),
}

impl<E> Attempt<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Retry(err) | Self::Stop(err) => err,
        }
    }
}

/// Runs `op` until it succeeds, asks to stop, or `policy.max_attempts` is used up.
///
/// An attempt in flight is never interrupted; the delay is only evaluated after
/// it completes.
pub async fn run_with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> std::result::Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, Attempt<E>>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Stop(err)) => return Err(err),
            Err(Attempt::Retry(err)) => err,
        };

        warn!(attempt, max_attempts, error = %err, "attempt failed");

        if let Some(delay) = policy.delay_after(attempt) {
            tokio::time::sleep(delay).await;
        }

        if attempt >= max_attempts {
            return Err(err);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[test]
    fn test_worst_case_wait() {
        let constant = RetryPolicy::constant(3, Duration::from_millis(100));
        assert_eq!(constant.worst_case_wait(), Duration::from_millis(200));

        let linear = RetryPolicy::linear(3, Duration::from_millis(10));
        assert_eq!(linear.worst_case_wait(), Duration::from_millis(60));

        assert_eq!(RetryPolicy::once().worst_case_wait(), Duration::ZERO);
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::constant(0, Duration::ZERO).validate().is_err());
        assert!(RetryPolicy::once().validate().is_ok());
    }

    #[tokio::test]
    async fn test_success_returns_immediately() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::linear(5, Duration::from_secs(10));

        let result: std::result::Result<u32, String> = run_with_retry(&policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::constant(5, Duration::from_millis(1));

        let result = run_with_retry(&policy, || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(Attempt::Retry(format!("attempt {}", n)))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_attempts() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::constant(5, Duration::from_secs(10));
        let start = Instant::now();

        let result: std::result::Result<(), String> = run_with_retry(&policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Stop("fatal".to_string()))
        })
        .await;

        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_constant_backoff_bound() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::constant(3, Duration::from_millis(20));
        let start = Instant::now();

        let result: std::result::Result<(), String> = run_with_retry(&policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Retry("down".to_string()))
        })
        .await;

        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_sleep() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::constant(1, Duration::from_secs(10));
        let start = Instant::now();

        let result: std::result::Result<(), String> = run_with_retry(&policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Retry("once".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
