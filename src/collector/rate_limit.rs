use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::sources::adapter::RateLimitState;

/// Shortest wait after an explicit rate-limit response.
const MIN_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

/// Local view of the platform quota.
///
/// Updated only from observed responses. The gate never
/// re-probes: after a reset window it assumes a conservative
/// default budget that the next response corrects.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: RateLimitState,
    default_remaining: u32,
}

/// What the gate decided before a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    Wait(Duration),
}

impl RateLimiter {
    pub fn new(initial: RateLimitState, default_remaining: u32) -> Self {
        Self {
            state: initial,
            default_remaining,
        }
    }

    pub fn state(&self) -> RateLimitState {
        self.state
    }

    pub fn observe(&mut self, state: RateLimitState) {
        self.state = state;
    }

    /// Records an explicit out-of-quota signal.
    pub fn exhausted_until(&mut self, reset_at: DateTime<Utc>) {
        self.state = RateLimitState {
            remaining_calls: 0,
            reset_at,
        };
    }

    /// Checks the budget before a fetch.
    ///
    /// An exhausted budget whose reset already passed is restored
    /// to the default immediately.
    pub fn check(&mut self, now: DateTime<Utc>) -> Gate {
        if self.state.remaining_calls > 0 {
            return Gate::Open;
        }
        if now < self.state.reset_at {
            return Gate::Wait(until(self.state.reset_at, now));
        }
        log::warn!("Rate limit exhausted but reset time passed, restoring default budget");
        self.restore(now);
        Gate::Open
    }

    /// Called after sleeping through a reset window.
    pub fn restore(&mut self, now: DateTime<Utc>) {
        self.state = RateLimitState {
            remaining_calls: self.default_remaining,
            reset_at: now,
        };
    }
}

/// Time left until `reset_at`, zero if already passed.
pub fn until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (reset_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Wait after an explicit `RateLimited` response, at least one second.
pub fn rate_limited_wait(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    until(reset_at, now).max(MIN_RATE_LIMIT_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn open_while_budget_remains() {
        let mut limiter = RateLimiter::new(
            RateLimitState {
                remaining_calls: 3,
                reset_at: at(100),
            },
            900,
        );
        assert_eq!(limiter.check(at(0)), Gate::Open);
    }

    #[test]
    fn waits_until_reset_when_exhausted() {
        let mut limiter = RateLimiter::new(
            RateLimitState {
                remaining_calls: 0,
                reset_at: at(30),
            },
            900,
        );
        assert_eq!(limiter.check(at(0)), Gate::Wait(Duration::from_secs(30)));

        limiter.restore(at(30));
        assert_eq!(limiter.state().remaining_calls, 900);
        assert_eq!(limiter.check(at(30)), Gate::Open);
    }

    #[test]
    fn passed_reset_restores_default_without_waiting() {
        let mut limiter = RateLimiter::new(
            RateLimitState {
                remaining_calls: 0,
                reset_at: at(10),
            },
            450,
        );
        assert_eq!(limiter.check(at(20)), Gate::Open);
        assert_eq!(limiter.state().remaining_calls, 450);
    }

    #[test]
    fn explicit_rate_limit_waits_at_least_a_second() {
        assert_eq!(rate_limited_wait(at(0), at(5)), Duration::from_secs(1));
        assert_eq!(rate_limited_wait(at(60), at(0)), Duration::from_secs(60));
    }
}
