//! Sliding-window admission control.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Timestamps of recent physical calls.
#[derive(Debug)]
pub struct RateWindow {
    span: Duration,
    cap: usize,
    threshold: f64,
    entries: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(span: Duration, cap: usize, threshold: f64) -> Self {
        Self {
            span,
            cap,
            threshold,
            entries: VecDeque::with_capacity(cap),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.entries.front() {
            if now.saturating_duration_since(*oldest) >= self.span {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long a new call must wait, or `None` if it may proceed now.
    pub fn admission_wait(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        let limit = self.threshold * self.cap as f64;
        if (self.entries.len() as f64) < limit {
            return None;
        }
        self.entries
            .front()
            .map(|oldest| (*oldest + self.span).saturating_duration_since(now))
            .filter(|wait| !wait.is_zero())
    }

    /// Record one physical call.
    pub fn record(&mut self, now: Instant) {
        self.entries.push_back(now);
    }

    /// Calls inside the window as of `now`.
    pub fn occupancy(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.entries.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_until_threshold() {
        let now = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(60), 10, 0.8);
        for _ in 0..8 {
            assert_eq!(window.admission_wait(now), None);
            window.record(now);
        }
        assert_eq!(window.admission_wait(now), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_wait_is_until_oldest_expires() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(60), 2, 1.0);
        window.record(start);
        window.record(start + Duration::from_secs(10));

        let later = start + Duration::from_secs(25);
        assert_eq!(window.admission_wait(later), Some(Duration::from_secs(35)));

        let expired = start + Duration::from_secs(60);
        assert_eq!(window.admission_wait(expired), None);
        assert_eq!(window.occupancy(expired), 1);
    }
}
