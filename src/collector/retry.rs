//! Bounded exponential backoff for transient fetch failures.
//!
//! Only [`FetchError::Transient`] is retried. Every other kind is
//! returned on the first occurrence without consuming budget.

use std::future::Future;
use std::time::Duration;

use crate::collector::CancelSignal;
use crate::config::CollectorConfig;
use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(c: &CollectorConfig) -> Self {
        Self {
            attempts: c.fetch_attempts.max(1),
            base: Duration::from_millis(c.backoff_base_ms),
            max: Duration::from_millis(c.backoff_max_ms),
        }
    }

    /// Delay before attempt `attempt + 1`: `base * 2^(attempt-1)`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Result of a retried call.
#[derive(Debug)]
pub enum Retried<T> {
    Done {
        result: Result<T, FetchError>,
        /// Attempts actually made
        attempts: u32,
    },
    Cancelled,
}

/// Runs `op` until it succeeds, fails non-transiently, or the
/// attempt ceiling is reached.
///
/// Each attempt and each backoff sleep races the cancel signal.
pub async fn with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &mut CancelSignal,
    mut on_retry: impl FnMut(u32, &FetchError),
    mut op: F,
) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            r = op() => r,
            _ = cancel.cancelled() => return Retried::Cancelled,
        };

        match result {
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                let delay = policy.delay(attempt);
                log::warn!(
                    "Transient error (attempt {}/{}): {}; retrying in {:?}",
                    attempt,
                    policy.attempts,
                    e,
                    delay
                );
                on_retry(attempt, &e);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Retried::Cancelled,
                }
                attempt += 1;
            }
            result => {
                return Retried::Done {
                    result,
                    attempts: attempt,
                };
            }
        }
    }
}
