//! Linear reconnect backoff with a capped multiplier.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: u32) -> Self {
        Self {
            base,
            cap: cap.max(1),
        }
    }

    /// Delay before the `attempt`-th consecutive reconnect (1-based):
    /// `base * min(attempt, cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * attempt.clamp(1, self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_linearly_then_cap() {
        let backoff = Backoff::new(Duration::from_millis(3000), 5);
        let delays: Vec<u128> = (1..=6).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![3000, 6000, 9000, 12000, 15000, 15000]);
    }

    #[test]
    fn test_attempt_zero_uses_base() {
        let backoff = Backoff::new(Duration::from_millis(100), 5);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
    }
}
