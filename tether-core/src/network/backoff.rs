//! Reconnect delay schedule.

use std::time::Duration;

/// Seconds to wait before each successive retry. The last entry repeats.
pub const BACKOFF_STAGES: [u64; 7] = [3, 5, 8, 16, 32, 51, 60];

#[derive(Debug, Default, Clone)]
pub struct Backoff {
    stage: usize,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next attempt; advances the stage.
    pub fn next_delay(&mut self) -> Duration {
        let secs = BACKOFF_STAGES[self.stage.min(BACKOFF_STAGES.len() - 1)];
        self.stage = self.stage.saturating_add(1);
        Duration::from_secs(secs)
    }

    /// Jump straight to the longest delay.
    pub fn saturate(&mut self) {
        self.stage = self.stage.max(BACKOFF_STAGES.len() - 1);
    }

    /// Back to the first stage after a successful connect.
    pub fn reset(&mut self) {
        self.stage = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> usize {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nth_retry_uses_saturating_stage() {
        let mut backoff = Backoff::new();
        for n in 0..20 {
            let expected = BACKOFF_STAGES[n.min(6)];
            assert_eq!(backoff.next_delay(), Duration::from_secs(expected), "retry {n}");
        }
    }

    #[test]
    fn refusal_timeline() {
        // Refused at t=0; retries land at these absolute times.
        let mut backoff = Backoff::new();
        let mut t = 0;
        let times: Vec<u64> = (0..9)
            .map(|_| {
                t += backoff.next_delay().as_secs();
                t
            })
            .collect();
        assert_eq!(times, vec![3, 8, 16, 32, 64, 115, 175, 235, 295]);
    }

    #[test]
    fn reset_returns_to_first_stage() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn saturate_skips_to_the_longest_delay() {
        let mut backoff = Backoff::new();
        backoff.saturate();
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }
}
