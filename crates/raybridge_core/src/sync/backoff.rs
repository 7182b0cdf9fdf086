//! Spin, then yield, then sleep.
//!
//! Used by every cross-process wait. The peer is another process, so a
//! pure spin would burn a core for the length of a frame.

use std::time::Duration;

/// Rounds spent spinning before yielding.
const SPIN_ROUNDS: u32 = 6;

/// Rounds spent yielding before sleeping.
const YIELD_ROUNDS: u32 = 16;

/// Base sleep once spinning and yielding are exhausted.
const BASE_SLEEP: Duration = Duration::from_micros(20);

/// Longest single sleep. Bounds wake-up latency after a signal.
const MAX_SLEEP: Duration = Duration::from_micros(500);

/// Exponential backoff state for one wait.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Fresh state.
    #[must_use]
    pub const fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Starts over after progress.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// True once the wait has moved past spinning.
    #[inline]
    #[must_use]
    pub const fn is_sleeping(&self) -> bool {
        self.attempt >= SPIN_ROUNDS + YIELD_ROUNDS
    }

    /// Current delay for the sleeping phase.
    #[must_use]
    pub fn sleep_duration(&self) -> Duration {
        let exponent = self.attempt.saturating_sub(SPIN_ROUNDS + YIELD_ROUNDS).min(8);
        BASE_SLEEP.saturating_mul(1 << exponent).min(MAX_SLEEP)
    }

    /// Backs off once.
    pub fn snooze(&mut self) {
        if self.attempt < SPIN_ROUNDS {
            for _ in 0..(1u32 << self.attempt) {
                std::hint::spin_loop();
            }
        } else if self.attempt < SPIN_ROUNDS + YIELD_ROUNDS {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.sleep_duration());
        }
        self.attempt = self.attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_is_capped() {
        let mut backoff = Backoff::new();
        for _ in 0..(SPIN_ROUNDS + YIELD_ROUNDS) {
            backoff.snooze();
        }
        assert!(backoff.is_sleeping());
        assert_eq!(backoff.sleep_duration(), BASE_SLEEP);

        backoff.attempt += 20;
        assert_eq!(backoff.sleep_duration(), MAX_SLEEP);

        backoff.reset();
        assert!(!backoff.is_sleeping());
    }
}
