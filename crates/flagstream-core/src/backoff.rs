// ── Reconnect backoff ──
//
// Exponential delay generator shared by the backoff and retry timers.
// Each timer owns its own counter; counters are never shared across
// unrelated retry sequences.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Exponential backoff parameters for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay returned by the first `next()` after a reset. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30 minutes.
    pub max_delay: Duration,

    /// Maximum consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1800),
            max_retries: None,
        }
    }
}

/// Monotonic exponential delay generator.
///
/// `next()` returns `min(initial * 2^n, max)` where `n` counts calls since
/// the last `reset()`. No jitter: successive delays never decrease.
#[derive(Debug)]
pub struct BackoffCounter {
    initial: Duration,
    max: Duration,
    attempt: AtomicU32,
}

impl BackoffCounter {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay, config.max_delay)
    }

    /// Delay for the next attempt; advances the counter.
    pub fn next(&self) -> Duration {
        let attempt = self.attempt.fetch_add(1, Ordering::AcqRel);
        delay_for(attempt, self.initial, self.max)
    }

    /// Return to the initial delay.
    pub fn reset(&self) {
        self.attempt.store(0, Ordering::Release);
    }

    /// Number of `next()` calls since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }
}

fn delay_for(attempt: u32, initial: Duration, max: Duration) -> Duration {
    // 2^31 saturates well past any sane cap.
    let factor = 2u32.saturating_pow(attempt.min(31));
    initial.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(1800));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn delays_double_until_capped() {
        let counter = BackoffCounter::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<u64> = (0..6).map(|_| counter.next().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn delays_are_non_decreasing() {
        let counter = BackoffCounter::from_config(&ReconnectConfig::default());
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let next = counter.next();
            assert!(next >= previous);
            previous = next;
        }
        assert_eq!(previous, Duration::from_secs(1800));
    }

    #[test]
    fn reset_returns_to_initial() {
        let counter = BackoffCounter::new(Duration::from_millis(500), Duration::from_secs(60));
        counter.next();
        counter.next();
        counter.next();
        assert_eq!(counter.attempts(), 3);

        counter.reset();
        assert_eq!(counter.attempts(), 0);
        assert_eq!(counter.next(), Duration::from_millis(500));
    }

    #[test]
    fn max_below_initial_is_raised() {
        let counter = BackoffCounter::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(counter.next(), Duration::from_secs(5));
        assert_eq!(counter.next(), Duration::from_secs(5));
    }
}
