//! Rate budget for outbound gateway commands
//!
//! A fixed-window token bucket: `capacity` sends per `window`. The gateway
//! enforces its limit per connection, so the dispatcher resets the budget
//! whenever a new connection is attached.

use std::time::Duration;
use tokio::time::Instant;

/// Fixed-window send budget
#[derive(Debug)]
pub struct RateBudget {
    /// Sends permitted per window
    capacity: u32,
    /// Sends left in the current window
    remaining: u32,
    /// When the current window ends
    refill_at: Instant,
    /// Window length
    window: Duration,
}

impl RateBudget {
    /// Create a full budget whose first window starts now
    pub fn new(capacity: u32, window: Duration) -> Self {
        RateBudget {
            capacity,
            remaining: capacity,
            refill_at: Instant::now() + window,
            window,
        }
    }

    /// Try to take one token while leaving `reserve` tokens untouched.
    ///
    /// Returns the instant at which the next window opens when the budget
    /// is exhausted.
    pub fn try_acquire(&mut self, reserve: u32) -> Result<(), Instant> {
        self.refill(Instant::now());

        if self.remaining > reserve {
            self.remaining -= 1;
            Ok(())
        } else {
            Err(self.refill_at)
        }
    }

    /// Start a fresh, full window
    pub fn reset(&mut self) {
        self.remaining = self.capacity;
        self.refill_at = Instant::now() + self.window;
    }

    /// Tokens left in the current window
    pub fn remaining(&mut self) -> u32 {
        self.refill(Instant::now());
        self.remaining
    }

    /// Sends permitted per window
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn refill(&mut self, now: Instant) {
        if now >= self.refill_at {
            self.remaining = self.capacity;
            self.refill_at = now + self.window;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausts_and_refills() {
        let mut budget = RateBudget::new(3, Duration::from_secs(60));
        let start = Instant::now();

        assert!(budget.try_acquire(0).is_ok());
        assert!(budget.try_acquire(0).is_ok());
        assert!(budget.try_acquire(0).is_ok());

        let retry_at = budget.try_acquire(0).unwrap_err();
        assert_eq!(retry_at, start + Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(budget.remaining(), 3);
        assert!(budget.try_acquire(0).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_is_held_back() {
        let mut budget = RateBudget::new(4, Duration::from_secs(60));

        assert!(budget.try_acquire(2).is_ok());
        assert!(budget.try_acquire(2).is_ok());
        // Two tokens left, both reserved
        assert!(budget.try_acquire(2).is_err());
        // Priority callers pass a zero reserve
        assert!(budget.try_acquire(0).is_ok());
        assert!(budget.try_acquire(0).is_ok());
        assert!(budget.try_acquire(0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_capacity() {
        let mut budget = RateBudget::new(2, Duration::from_secs(60));
        budget.try_acquire(0).unwrap();
        budget.try_acquire(0).unwrap();
        budget.reset();
        assert_eq!(budget.remaining(), budget.capacity());
    }
}
