//! Reconnect pacing
//!
//! Exponential backoff between failed attempts, capped at `max_delay`, and
//! an optional limit on consecutive failures. Any attempt that reaches a
//! ready session resets both.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use crate::config::ReconnectConfig;

/// Tracks consecutive failed attempts and the delay before the next one
#[derive(Debug)]
pub struct ReconnectPolicy {
    backoff: ExponentialBackoff,
    max_attempts: Option<u32>,
    failures: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(config.initial_delay)
            .with_max_interval(config.max_delay)
            .with_multiplier(config.multiplier)
            .with_randomization_factor(config.randomization_factor)
            .with_max_elapsed_time(None)
            .build();

        ReconnectPolicy {
            backoff,
            max_attempts: config.max_attempts,
            failures: 0,
        }
    }

    /// Record a failed attempt. Returns the delay before the next attempt,
    /// or `None` once the attempt limit is used up.
    pub fn failed(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.exhausted() {
            return None;
        }
        self.backoff.next_backoff()
    }

    /// Forget earlier failures after reaching a ready session
    pub fn succeeded(&mut self) {
        self.failures = 0;
        self.backoff.reset();
    }

    /// Consecutive failed attempts
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn exhausted(&self) -> bool {
        self.max_attempts.map_or(false, |max| self.failures >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: Option<u32>) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_attempts,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let mut policy = ReconnectPolicy::new(&config(None));
        let delays: Vec<_> = (0..5).map(|_| policy.failed().unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_attempt_limit() {
        let mut policy = ReconnectPolicy::new(&config(Some(3)));
        assert!(policy.failed().is_some());
        assert!(policy.failed().is_some());
        assert!(policy.failed().is_none());
        assert!(policy.exhausted());
        assert_eq!(policy.failures(), 3);
    }

    #[test]
    fn test_success_resets() {
        let mut policy = ReconnectPolicy::new(&config(Some(2)));
        policy.failed();
        policy.succeeded();
        assert_eq!(policy.failures(), 0);
        assert_eq!(policy.failed(), Some(Duration::from_millis(100)));
    }
}
