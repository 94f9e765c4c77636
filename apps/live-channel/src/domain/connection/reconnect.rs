//! Reconnection Policy
//!
//! Bounded exponential backoff for the live channel. The delay schedule is a
//! pure function of the attempt number so it can be tested without timers:
//!
//! ```text
//! delay(attempt) = min(initial_delay * multiplier^attempt, max_delay)
//! ```
//!
//! The policy owns the attempt counter: it resets on every successful open
//! and on manual reconnect, and increments on every abnormal closure.

use std::time::Duration;

use rand::Rng;

/// Default maximum number of automatic reconnection attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles the delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.1 = ±10% randomization, 0.0 = exact).
    pub jitter_factor: f64,
    /// Maximum number of automatic reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_attempts,
        }
    }
}

/// Compute the un-jittered delay for a zero-based attempt number.
///
/// Attempt 0 yields `initial_delay`; each further attempt multiplies by
/// `multiplier` until `max_delay` caps the result.
#[must_use]
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    #[allow(clippy::cast_precision_loss)]
    let base = config.initial_delay.as_millis() as f64;
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let scaled = (base * config.multiplier.powi(exponent)).round();

    let max_millis = config.max_delay.as_millis();
    let millis = if scaled.is_finite() && scaled >= 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            (scaled as u128).min(max_millis)
        }
    } else {
        max_millis
    };

    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Reconnection policy tracking attempts against a [`ReconnectConfig`].
///
/// # Example
///
/// ```rust
/// use live_channel::domain::connection::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the delay for the next attempt and count it.
    ///
    /// Returns `None` once the attempt ceiling has been reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = backoff_delay(&self.config, self.attempt_count);
        self.attempt_count += 1;

        Some(self.apply_jitter(delay))
    }

    /// Reset the policy after a successful connection or a manual reconnect.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Get the configured attempt ceiling (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Get the policy configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

/// Error type for reconnection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn exact(initial_ms: u64, max_ms: u64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test_case(1, 1_000 ; "first attempt uses base delay")]
    #[test_case(2, 2_000 ; "second attempt doubles")]
    #[test_case(3, 4_000 ; "third attempt")]
    #[test_case(4, 8_000 ; "fourth attempt")]
    #[test_case(5, 16_000 ; "fifth attempt")]
    #[test_case(6, 30_000 ; "sixth attempt is capped")]
    fn nth_delay_matches_schedule(n: u32, expected_ms: u64) {
        let config = exact(1_000, 30_000, 0);
        assert_eq!(
            backoff_delay(&config, n - 1),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn policy_walks_schedule() {
        let mut policy = ReconnectPolicy::new(exact(100, 10_000, 0));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(800)));
        assert_eq!(policy.attempt_count(), 4);
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(exact(100, 1_000, 3));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn policy_reset_restarts_at_base() {
        let mut policy = ReconnectPolicy::new(exact(100, 10_000, 3));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..exact(1_000, 10_000, 0)
            });

            let millis = policy.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(exact(1_000, 30_000, 0));
        for _ in 0..1000 {
            assert!(policy.should_retry());
            assert!(policy.next_delay().is_some());
        }
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let config = exact(1_000, 30_000, 0);
        assert_eq!(backoff_delay(&config, u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn exhausted_error_message() {
        assert_eq!(
            ReconnectError::MaxAttemptsExceeded(5).to_string(),
            "maximum reconnection attempts (5) exceeded"
        );
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(
            initial in 1u64..5_000,
            cap in 1u64..120_000,
            attempt in 0u32..64,
        ) {
            let config = exact(initial, cap, 0);
            prop_assert!(backoff_delay(&config, attempt) <= Duration::from_millis(cap));
        }

        #[test]
        fn delay_is_monotonic(initial in 1u64..5_000, attempt in 0u32..40) {
            let config = exact(initial, 30_000, 0);
            prop_assert!(backoff_delay(&config, attempt) <= backoff_delay(&config, attempt + 1));
        }
    }
}
