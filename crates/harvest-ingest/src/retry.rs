//! Retry decisions for page requests
//!
//! [`RetryPolicy`] never sleeps. It looks at a classified failure and the
//! number of attempts made so far and answers with a [`RetryDecision`]; the
//! fetcher performs the wait. This keeps the backoff curve testable without
//! real I/O or real time.
//!
//! Curve: `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`, then
//! scaled by a uniform jitter factor in `[1 - jitter, 1 + jitter]` and capped
//! again. A 429 carrying `Retry-After` skips the curve entirely.

use crate::error::{ErrorKind, FetchError};
use harvest_common::{HarvestError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per page, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Upper bound for computed delays
    pub max_delay: Duration,
    /// Relative jitter, 0.2 means ±20 %
    pub jitter: f64,
    /// Minimum wait after a 429 that carried no hint
    pub rate_limit_fallback: Duration,
    /// Upper bound for server-supplied wait hints
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
            rate_limit_fallback: Duration::from_secs(10),
            max_retry_after: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(HarvestError::config("retry max_attempts must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(HarvestError::config(format!(
                "retry multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(HarvestError::config(format!(
                "retry jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(HarvestError::config("retry base_delay exceeds max_delay"));
        }
        Ok(())
    }
}

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again once `after` has elapsed
    Retry { after: Duration },
    /// Report the failure to the caller
    GiveUp,
}

/// Bookkeeping for one page fetch, discarded when the fetch returns
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempt: u32,
    last_error: Option<ErrorKind>,
    next_delay: Option<Duration>,
    total_delay: Duration,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failed attempt and return how many attempts have now been made
    pub fn record_failure(&mut self, error: &FetchError) -> u32 {
        self.attempt += 1;
        self.last_error = Some(error.kind());
        self.next_delay = None;
        self.attempt
    }

    /// Record the wait before the next attempt
    pub fn schedule(&mut self, delay: Duration) {
        self.next_delay = Some(delay);
        self.total_delay += delay;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    /// Sum of all scheduled waits so far
    pub fn total_delay(&self) -> Duration {
        self.total_delay
    }
}

/// Pure retry/backoff decision function
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide with a freshly drawn jitter sample
    pub fn decide(&self, error: &FetchError, attempt: u32) -> RetryDecision {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.decide_with_jitter(error, attempt, sample)
    }

    /// Decide given `attempt` attempts already made and a jitter sample in `[-1, 1]`
    pub fn decide_with_jitter(
        &self,
        error: &FetchError,
        attempt: u32,
        jitter_sample: f64,
    ) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }

        let after = match error {
            FetchError::RateLimited {
                retry_after: Some(hint),
            } => (*hint).min(self.config.max_retry_after),
            FetchError::RateLimited { retry_after: None } => self
                .backoff(attempt, jitter_sample)
                .max(self.config.rate_limit_fallback),
            _ => self.backoff(attempt, jitter_sample),
        };

        RetryDecision::Retry { after }
    }

    /// Computed delay after the `attempt`-th failure (1-based)
    pub fn backoff(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let cap = self.config.max_delay.as_secs_f64();
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.config.base_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let factor = 1.0 + self.config.jitter * jitter_sample.clamp(-1.0, 1.0);
        let secs = (raw.min(cap) * factor).clamp(0.0, cap);

        if secs.is_finite() {
            Duration::from_secs_f64(secs)
        } else {
            self.config.max_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        })
    }

    fn server_error() -> FetchError {
        FetchError::Server {
            status: Some(502),
            message: "bad gateway".into(),
        }
    }

    #[test]
    fn test_exponential_curve_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: 0.0,
            max_attempts: 20,
            ..RetryConfig::default()
        });
        let delays: Vec<u64> = (1..=8).map(|a| policy.backoff(a, 0.0).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_jitter_scales_within_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(2, -1.0), Duration::from_secs_f64(1.6));
        assert_eq!(policy.backoff(2, 1.0), Duration::from_secs_f64(2.4));
        // samples outside [-1, 1] are clamped
        assert_eq!(policy.backoff(2, 7.0), Duration::from_secs_f64(2.4));
    }

    #[test]
    fn test_retryable_failures_retry_until_ceiling() {
        let policy = no_jitter();
        for attempt in 1..5 {
            assert!(matches!(
                policy.decide_with_jitter(&server_error(), attempt, 0.0),
                RetryDecision::Retry { .. }
            ));
        }
        assert_eq!(
            policy.decide_with_jitter(&server_error(), 5, 0.0),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide_with_jitter(&FetchError::Network("timeout".into()), 5, 0.0),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_client_errors_are_never_retried() {
        let err = FetchError::Client {
            status: 404,
            message: "no such project".into(),
        };
        assert_eq!(no_jitter().decide(&err, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_wait_hint_is_used_verbatim() {
        let policy = RetryPolicy::default();
        let err = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        // jitter does not touch the hint
        assert_eq!(
            policy.decide_with_jitter(&err, 1, 1.0),
            RetryDecision::Retry {
                after: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn test_wait_hint_is_bounded() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retry_after: Duration::from_secs(30),
            ..RetryConfig::default()
        });
        let err = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
        };
        assert_eq!(
            policy.decide(&err, 1),
            RetryDecision::Retry {
                after: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_rate_limit_without_hint_uses_fallback_floor() {
        let err = FetchError::RateLimited { retry_after: None };
        assert_eq!(
            no_jitter().decide_with_jitter(&err, 1, 0.0),
            RetryDecision::Retry {
                after: Duration::from_secs(10)
            }
        );
        assert_eq!(
            no_jitter().decide_with_jitter(&err, 5, 0.0),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_retry_state_tracks_attempts() {
        let mut state = RetryState::new();
        assert_eq!(state.record_failure(&server_error()), 1);
        state.schedule(Duration::from_secs(1));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(1)));

        assert_eq!(
            state.record_failure(&FetchError::RateLimited { retry_after: None }),
            2
        );
        assert_eq!(state.last_error(), Some(ErrorKind::RateLimit));
        assert_eq!(state.next_delay(), None);

        state.schedule(Duration::from_secs(10));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(state.total_delay(), Duration::from_secs(11));
    }

    #[test]
    fn test_validate_rejects_bad_tunables() {
        let zero_attempts = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(zero_attempts.validate().is_err());

        let shrinking = RetryConfig {
            multiplier: 0.5,
            ..RetryConfig::default()
        };
        assert!(shrinking.validate().is_err());

        assert!(RetryConfig::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_computed_delay_never_exceeds_cap(attempt in 1u32..10_000, sample in -5.0f64..5.0) {
            let policy = RetryPolicy::default();
            let delay = policy.backoff(attempt, sample);
            prop_assert!(delay <= policy.config().max_delay);
        }

        #[test]
        fn prop_decision_respects_ceiling(attempt in 0u32..50) {
            let policy = RetryPolicy::default();
            let decision = policy.decide(&FetchError::Network("reset".into()), attempt);
            prop_assert_eq!(
                matches!(decision, RetryDecision::GiveUp),
                attempt >= policy.config().max_attempts
            );
        }
    }
}
