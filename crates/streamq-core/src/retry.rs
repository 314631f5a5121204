//! Retry backoff: exponential growth with multiplicative jitter.

use std::time::Duration;

use rand::Rng;

/// Jitter spread, applied as a factor in `[1 - JITTER, 1 + JITTER]`.
pub const JITTER: f64 = 0.2;

/// Exponential backoff with ±20% jitter.
///
/// `delay(attempt) = min(base * 2^(attempt - 1), cap) * U(0.8, 1.2)`
///
/// Jitter is applied after capping, so the largest possible delay is `1.2 * cap`.
/// `attempt` is clamped to at least 1.
///
/// Example with base=500ms, cap=30s (before jitter):
/// - attempt 1: 500ms
/// - attempt 2: 1s
/// - attempt 3: 2s
/// - attempt 7: 30s (capped)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before jitter.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        // 2^1000 is still finite, so base * factor never turns into NaN.
        let factor = 2_f64.powi(exponent.min(1000) as i32);
        let secs = (self.base.as_secs_f64() * factor).min(self.cap.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.cap)
    }

    /// Jittered delay using the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Jittered delay drawing from `rng`; a seeded RNG makes this deterministic.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let factor = rng.gen_range((1.0 - JITTER)..=(1.0 + JITTER));
        // Saturates instead of panicking when 1.2 * cap exceeds `Duration::MAX`.
        Duration::try_from_secs_f64(self.nominal(attempt).as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;

    #[rstest]
    #[case(0, 500)]
    #[case(1, 500)]
    #[case(2, 1_000)]
    #[case(3, 2_000)]
    #[case(6, 16_000)]
    #[case(7, 30_000)]
    #[case(200, 30_000)]
    fn nominal_doubles_until_capped(#[case] attempt: u32, #[case] expected_ms: u64) {
        let backoff = Backoff::default();
        assert_eq!(backoff.nominal(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn same_seed_gives_same_delay() {
        let backoff = Backoff::default();
        let a = backoff.delay_with(3, &mut StdRng::seed_from_u64(7));
        let b = backoff.delay_with(3, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn jitter_actually_spreads_delays() {
        let backoff = Backoff::default();
        let mut rng = StdRng::seed_from_u64(42);
        let delays: std::collections::HashSet<_> =
            (0..32).map(|_| backoff.delay_with(4, &mut rng)).collect();
        assert!(delays.len() > 1);
    }

    #[test]
    fn effective_ceiling_is_cap_plus_twenty_percent() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            assert!(backoff.delay_with(50, &mut rng) <= Duration::from_secs(12));
        }
    }

    #[test]
    fn huge_cap_saturates_instead_of_panicking() {
        let backoff = Backoff::new(Duration::MAX, Duration::MAX);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(backoff.nominal(64) > Duration::from_secs(u64::MAX / 2));
        assert!(backoff.delay_with(64, &mut rng) > Duration::from_secs(u64::MAX / 2));
    }

    #[test]
    fn zero_base_stays_zero() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(backoff.delay(40), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn delay_stays_within_jitter_bounds(
            base_ms in 1u64..10_000,
            cap_ms in 1u64..120_000,
            attempt in 1u32..64,
            seed in any::<u64>(),
        ) {
            let backoff = Backoff::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms));
            let nominal = backoff.nominal(attempt);
            let delay = backoff.delay_with(attempt, &mut StdRng::seed_from_u64(seed));

            let slack = Duration::from_micros(1);
            prop_assert!(delay + slack >= nominal.mul_f64(0.8));
            prop_assert!(delay <= nominal.mul_f64(1.2) + slack);
            prop_assert!(nominal <= Duration::from_millis(cap_ms));
        }
    }
}
