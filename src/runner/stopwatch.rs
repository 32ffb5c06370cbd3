//! Free-running stopwatch clock

use std::time::Duration;

use tokio::time::Instant;

/// Elapsed-time accumulator. Pausing folds the running segment into the
/// total; starting again adds to it.
#[derive(Debug, Clone, Default)]
pub struct StopwatchClock {
    accumulated: Duration,
    started_at: Option<Instant>,
}

impl StopwatchClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Start or resume; a running clock is left alone
    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(started_at) = self.started_at.take() {
            self.accumulated += now.saturating_duration_since(started_at);
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.started_at = None;
    }

    /// Reset to zero and keep running
    pub fn restart(&mut self, now: Instant) {
        self.reset();
        self.started_at = Some(now);
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let running = self
            .started_at
            .map(|started_at| now.saturating_duration_since(started_at))
            .unwrap_or_default();
        self.accumulated + running
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        u64::try_from(self.elapsed(now).as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_pauses() {
        let t0 = Instant::now();
        let mut clock = StopwatchClock::new();
        clock.start(t0);
        clock.pause(t0 + Duration::from_millis(1_200));
        assert_eq!(clock.elapsed_ms(t0 + Duration::from_secs(60)), 1_200);

        clock.start(t0 + Duration::from_secs(10));
        assert_eq!(clock.elapsed_ms(t0 + Duration::from_millis(10_300)), 1_500);
        assert!(clock.is_running());
    }

    #[test]
    fn start_while_running_keeps_the_original_start() {
        let t0 = Instant::now();
        let mut clock = StopwatchClock::new();
        clock.start(t0);
        clock.start(t0 + Duration::from_secs(5));
        assert_eq!(clock.elapsed_ms(t0 + Duration::from_secs(6)), 6_000);
    }

    #[test]
    fn reset_and_restart() {
        let t0 = Instant::now();
        let mut clock = StopwatchClock::new();
        clock.start(t0);
        clock.restart(t0 + Duration::from_secs(3));
        assert_eq!(clock.elapsed_ms(t0 + Duration::from_secs(4)), 1_000);

        clock.reset();
        assert!(!clock.is_running());
        assert_eq!(clock.elapsed_ms(t0 + Duration::from_secs(9)), 0);
    }
}
