//! Jittered reconnect backoff shared by every retry path (control gateway,
//! voice gateway and the RTC capture stream).

use std::time::Duration;

use rand::Rng;

/// Upper bound (exclusive) of the delay for attempts 1..=9.
pub const RECONNECT_TABLE_MS: [u64; 9] = [10, 50, 100, 150, 200, 250, 500, 1_000, 2_000];

/// Upper bound used for attempt 0 and anything past the table.
pub const RECONNECT_CEILING_MS: u64 = 5_000;

/// Returns a random delay in `[0, bound)` for the given 1-based attempt.
pub fn reconnect_after_ms(attempt: u32) -> u64 {
    let bound = attempt
        .checked_sub(1)
        .and_then(|i| RECONNECT_TABLE_MS.get(i as usize))
        .copied()
        .unwrap_or(RECONNECT_CEILING_MS);
    rand::thread_rng().gen_range(0..bound)
}

/// Retry counter owned by a reconnecting component.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Bumps the counter and returns the delay before the next attempt.
    pub fn next(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(reconnect_after_ms(self.attempt))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// A pending retry only fires while this is true.
    pub fn is_pending(&self) -> bool {
        self.attempt > 0
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabulated_attempts_stay_below_their_bound() {
        for (i, bound) in RECONNECT_TABLE_MS.iter().enumerate() {
            for _ in 0..200 {
                let delay = reconnect_after_ms(i as u32 + 1);
                assert!(delay < *bound, "attempt {} gave {}", i + 1, delay);
            }
        }
    }

    #[test]
    fn attempts_past_the_table_use_the_ceiling() {
        for attempt in [0, 10, 11, 50, u32::MAX] {
            for _ in 0..100 {
                assert!(reconnect_after_ms(attempt) < RECONNECT_CEILING_MS);
            }
        }
    }

    #[test]
    fn counter_tracks_attempts_and_resets() {
        let mut backoff = Backoff::new();
        assert!(!backoff.is_pending());
        let first = backoff.next();
        assert!(first < Duration::from_millis(10));
        backoff.next();
        assert_eq!(backoff.attempts(), 2);
        assert!(backoff.is_pending());
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(!backoff.is_pending());
    }
}
