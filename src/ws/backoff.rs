//! Reconnection delay policy.
//!
//! The delay for attempt `n` of an outage is `min(max, min * 2^n)` plus a random jitter in
//! `[0, 20%)` of that base. The attempt counter advances when a delay is handed out, so closures
//! that happen before any successful open keep growing the delay up to the cap. There is no
//! attempt ceiling.

use std::time::Duration;

use backoff::backoff::Backoff;
use rand::Rng;

/// Jitter is bounded by `base / JITTER_DIVISOR`, i.e. 20% of the base delay.
const JITTER_DIVISOR: u128 = 5;

/// Lower bound on every reconnect delay, whatever the configured minimum.
pub const MIN_DELAY_FLOOR: Duration = Duration::from_millis(10);

/// Exponential backoff with additive jitter, reset on every successful open.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    min_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    #[must_use]
    pub const fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            attempt: 0,
        }
    }

    /// Change the delay bounds, keeping the current attempt count.
    pub fn set_bounds(&mut self, min_delay: Duration, max_delay: Duration) {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
    }

    /// Number of delays handed out since the last [`Backoff::reset`].
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before jitter for the given attempt number, never below [`MIN_DELAY_FLOOR`].
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let min_delay = self.min_delay.max(MIN_DELAY_FLOOR);

        1_u32
            .checked_shl(attempt)
            .and_then(|factor| min_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
            .max(MIN_DELAY_FLOOR)
    }

    /// Random jitter for `base`, always strictly below 20% of it (zero for tiny bases).
    pub fn jitter<R: Rng>(base: Duration, rng: &mut R) -> Duration {
        let bound = base.as_millis() / JITTER_DIVISOR;
        if bound == 0 {
            return Duration::ZERO;
        }

        let bound = u64::try_from(bound).unwrap_or(u64::MAX);
        Duration::from_millis(rng.random_range(0..bound))
    }

    /// Same as [`Backoff::next_backoff`] with an explicit source of randomness.
    pub fn next_delay<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        base.saturating_add(Self::jitter(base, rng))
    }
}

impl Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.next_delay(&mut rand::rng()))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use rand::rngs::StdRng;

    use super::*;

    fn policy() -> ReconnectBackoff {
        ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(15))
    }

    #[test]
    fn base_delay_doubles_until_cap() {
        let backoff = policy();

        let delays: Vec<u64> = (0..6)
            .map(|n| backoff.base_delay(n).as_secs())
            .collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 15, 15]);
    }

    #[test]
    fn base_delay_saturates_for_huge_attempts() {
        let backoff = policy();

        assert_eq!(backoff.base_delay(31), Duration::from_secs(15));
        assert_eq!(backoff.base_delay(32), Duration::from_secs(15));
        assert_eq!(backoff.base_delay(u32::MAX), Duration::from_secs(15));
    }

    #[test]
    fn jitter_stays_below_twenty_percent() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_millis(1_000);

        for _ in 0..1_000 {
            let jitter = ReconnectBackoff::jitter(base, &mut rng);
            assert!(jitter < Duration::from_millis(200), "jitter {jitter:?} out of range");
        }
    }

    #[test]
    fn jitter_is_zero_for_tiny_bases() {
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(
            ReconnectBackoff::jitter(Duration::from_millis(4), &mut rng),
            Duration::ZERO
        );
    }

    #[test]
    fn attempt_advances_when_scheduled_and_resets() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut backoff = policy();

        for n in 0..8 {
            let base = backoff.base_delay(n);
            let delay = backoff.next_delay(&mut rng);

            assert!(delay >= base, "attempt {n}: {delay:?} below base {base:?}");
            assert!(
                delay < base + base / 5,
                "attempt {n}: {delay:?} above jitter bound"
            );
            assert_eq!(backoff.attempt(), n + 1);
        }

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);

        let first = backoff.next_backoff().unwrap();
        assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1_200));
    }

    #[test]
    fn min_above_max_is_capped() {
        let backoff = ReconnectBackoff::new(Duration::from_secs(30), Duration::from_secs(15));

        assert_eq!(backoff.base_delay(0), Duration::from_secs(15));
    }

    #[test]
    fn zero_bounds_still_back_off() {
        let backoff = ReconnectBackoff::new(Duration::ZERO, Duration::from_millis(100));

        let delays: Vec<u128> = (0..5).map(|n| backoff.base_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 100]);

        let no_max = ReconnectBackoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(no_max.base_delay(3), MIN_DELAY_FLOOR);
    }
}
