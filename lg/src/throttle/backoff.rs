//! Exponential backoff between capacity checks
//!
//! The n-th draw (0-indexed) waits `initial_delay * exponent^n`. After
//! `max_retries` draws the sequence is exhausted, which is a state of its
//! own rather than an error. Optional jitter is seeded so identical
//! configuration always yields identical sequences, and the sequence never
//! shrinks from one draw to the next.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Immutable backoff configuration; call [`BackoffPolicy::backoff`] per submission
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    exponent: f64,
    max_retries: u32,
    max_delay: Option<Duration>,
    jitter: f64,
    seed: Option<u64>,
}

/// One draw from a backoff sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Sleep this long, then check again
    Wait(Duration),

    /// No draws left
    Exhausted,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, exponent: f64, max_retries: u32) -> Self {
        Self {
            initial_delay,
            exponent,
            max_retries,
            max_delay: None,
            jitter: 0.0,
            seed: None,
        }
    }

    /// Cap every individual delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Randomize each delay by up to `jitter` of its value
    pub fn with_jitter(mut self, jitter: f64, seed: Option<u64>) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self.seed = seed;
        self
    }

    /// Un-jittered, uncapped delay for draw `n`
    pub fn base_delay(&self, n: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.exponent.powi(n.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Start a fresh sequence
    pub fn backoff(&self) -> Backoff {
        debug!(
            initial_delay_ms = self.initial_delay.as_millis() as u64,
            exponent = self.exponent,
            max_retries = self.max_retries,
            "BackoffPolicy::backoff: called"
        );
        let rng = (self.jitter > 0.0).then(|| match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        });
        Backoff {
            policy: self.clone(),
            draws: 0,
            last: Duration::ZERO,
            rng,
        }
    }
}

/// A single backoff sequence
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    draws: u32,
    last: Duration,
    rng: Option<StdRng>,
}

impl Backoff {
    /// Draw the next delay, or learn that the budget is spent
    pub fn next_step(&mut self) -> BackoffStep {
        if self.draws >= self.policy.max_retries {
            debug!(draws = self.draws, "Backoff::next_step: exhausted");
            return BackoffStep::Exhausted;
        }

        let mut delay = self.policy.base_delay(self.draws);
        if let Some(rng) = self.rng.as_mut() {
            let spread: f64 = rng.random_range(-1.0..=1.0);
            let factor = 1.0 + self.policy.jitter * spread;
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay);
        }
        if let Some(max_delay) = self.policy.max_delay {
            delay = delay.min(max_delay);
        }
        delay = delay.max(self.last);

        self.draws += 1;
        self.last = delay;
        debug!(draw = self.draws, delay_ms = delay.as_millis() as u64, "Backoff::next_step: wait");
        BackoffStep::Wait(delay)
    }

    /// Draws taken so far
    pub fn draws(&self) -> u32 {
        self.draws
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        match self.next_step() {
            BackoffStep::Wait(delay) => Some(delay),
            BackoffStep::Exhausted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exponential_sequence() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 2.0, 4);
        let delays: Vec<_> = policy.backoff().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[test]
    fn test_exhaustion_after_max_retries() {
        let policy = BackoffPolicy::new(Duration::from_secs(5), 1.5, 3);
        let mut backoff = policy.backoff();

        assert_eq!(backoff.next_step(), BackoffStep::Wait(Duration::from_secs(5)));
        assert_eq!(backoff.next_step(), BackoffStep::Wait(Duration::from_millis(7500)));
        assert_eq!(backoff.next_step(), BackoffStep::Wait(Duration::from_millis(11250)));
        assert_eq!(backoff.next_step(), BackoffStep::Exhausted);
        // Stays exhausted
        assert_eq!(backoff.next_step(), BackoffStep::Exhausted);
        assert_eq!(backoff.draws(), 3);
    }

    #[test]
    fn test_zero_retries_is_immediately_exhausted() {
        let mut backoff = BackoffPolicy::new(Duration::from_secs(1), 2.0, 0).backoff();
        assert_eq!(backoff.next_step(), BackoffStep::Exhausted);
    }

    #[test]
    fn test_max_delay_caps_each_draw() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 10.0, 4).with_max_delay(Duration::from_secs(50));
        let delays: Vec<_> = policy.backoff().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(10),
                Duration::from_secs(50),
                Duration::from_secs(50)
            ]
        );
    }

    #[test]
    fn test_huge_exponent_does_not_panic() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 1e300, 3);
        let delays: Vec<_> = policy.backoff().collect();
        assert_eq!(delays.len(), 3);
        assert_eq!(delays[2], Duration::MAX);
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 2.0, 8).with_jitter(0.5, Some(42));
        let first: Vec<_> = policy.backoff().collect();
        let second: Vec<_> = policy.backoff().collect();
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_nth_draw_matches_formula(d_ms in 1u64..10_000, e in 1.0f64..4.0, m in 0u32..12) {
            let policy = BackoffPolicy::new(Duration::from_millis(d_ms), e, m);
            let mut backoff = policy.backoff();
            for n in 0..m {
                let expected = Duration::from_secs_f64(Duration::from_millis(d_ms).as_secs_f64() * e.powi(n as i32));
                prop_assert_eq!(backoff.next_step(), BackoffStep::Wait(expected));
            }
            prop_assert_eq!(backoff.next_step(), BackoffStep::Exhausted);
        }

        #[test]
        fn prop_jittered_sequence_never_shrinks(seed in any::<u64>(), jitter in 0.0f64..0.99) {
            let policy = BackoffPolicy::new(Duration::from_millis(100), 1.2, 10).with_jitter(jitter, Some(seed));
            let delays: Vec<_> = policy.backoff().collect();
            prop_assert_eq!(delays.len(), 10);
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
        }
    }
}
