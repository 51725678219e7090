use std::time::Duration;

use crate::config::Pacing;

/// Exponential delay for consecutive rate-limit responses.
///
/// The n-th consecutive delay is `base * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    streak: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            streak: 0,
        }
    }

    pub fn from_pacing(pacing: &Pacing) -> Self {
        Self::new(
            Duration::from_secs(pacing.backoff_base_secs),
            Duration::from_secs(pacing.backoff_max_secs),
        )
    }

    /// Consecutive rate limits seen so far.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn next_delay(&mut self) -> Duration {
        self.streak = self.streak.saturating_add(1);
        let factor = 1u32.checked_shl(self.streak - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn reset(&mut self) {
        self.streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_increase_then_plateau() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(100));
        let delays: Vec<Duration> = (0..8).map(|_| backoff.next_delay()).collect();

        let secs: Vec<u64> = delays.iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![10, 20, 40, 80, 100, 100, 100, 100]);

        let cap = delays.iter().position(|d| *d == Duration::from_secs(100)).unwrap();
        assert!(delays[..=cap].windows(2).all(|w| w[0] < w[1]));
        assert!(delays[cap..].iter().all(|d| *d == Duration::from_secs(100)));
        assert_eq!(backoff.streak(), 8);
    }

    #[test]
    fn reset_starts_over_from_base() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.streak(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn long_streaks_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(900));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(900));
        }
    }
}
