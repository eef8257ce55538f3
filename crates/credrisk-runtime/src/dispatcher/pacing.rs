//! Adaptive inter-call pacing.
//!
//! The pacing factor shrinks while calls mostly succeed and grows while they
//! mostly fail. The sleep before each call is `base_delay * factor`.

use std::time::Duration;

use crate::config::PacingConfig;

#[derive(Debug)]
pub struct AdaptivePacer {
    config: PacingConfig,
    factor: f64,
    successes: f64,
    failures: f64,
}

impl AdaptivePacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            factor: 1.0,
            successes: 0.0,
            failures: 0.0,
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Adjust the factor from the current success ratio and return the sleep
    /// to apply before the next call, if it is long enough to matter.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let total = self.successes + self.failures;
        if total > 0.0 {
            let ratio = self.successes / total;
            if ratio > self.config.healthy_ratio {
                self.factor *= self.config.speed_up;
            } else if ratio < self.config.degraded_ratio {
                self.factor *= self.config.slow_down;
            }
            self.factor = self.factor.clamp(self.config.min_factor, self.config.max_factor);
        }

        let delay = self.config.base_delay.mul_f64(self.factor);
        (delay > self.config.min_sleep).then_some(delay)
    }

    /// Record the outcome of one physical attempt.
    pub fn record(&mut self, success: bool) {
        if success {
            self.successes += 1.0;
        } else {
            self.failures += 1.0;
        }

        if self.successes + self.failures > self.config.decay_after as f64 {
            self.successes *= self.config.decay;
            self.failures *= self.config.decay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_delay_is_base() {
        let mut pacer = AdaptivePacer::new(PacingConfig::default());
        assert_eq!(pacer.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_factor_floor_on_success() {
        let mut pacer = AdaptivePacer::new(PacingConfig::default());
        for _ in 0..50 {
            pacer.record(true);
            pacer.next_delay();
        }
        assert!((pacer.factor() - 0.5).abs() < 1e-9);
        assert_eq!(pacer.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_factor_ceiling_on_failure() {
        let mut pacer = AdaptivePacer::new(PacingConfig::default());
        for _ in 0..50 {
            pacer.record(false);
            pacer.next_delay();
        }
        assert!((pacer.factor() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_middle_ratio_keeps_factor() {
        let mut pacer = AdaptivePacer::new(PacingConfig::default());
        for i in 0..10 {
            pacer.record(i % 5 != 0);
        }
        pacer.next_delay();
        assert_eq!(pacer.factor(), 1.0);
    }

    #[test]
    fn test_factor_stays_in_bounds_with_inverted_multipliers() {
        let mut pacer = AdaptivePacer::new(PacingConfig {
            slow_down: 0.1,
            speed_up: 4.0,
            ..PacingConfig::default()
        });
        for _ in 0..20 {
            pacer.record(false);
            pacer.next_delay();
        }
        assert!((pacer.factor() - 0.5).abs() < 1e-9);
        for _ in 0..500 {
            pacer.record(true);
            pacer.next_delay();
        }
        assert!((pacer.factor() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_counters_decay() {
        let mut pacer = AdaptivePacer::new(PacingConfig::default());
        for _ in 0..101 {
            pacer.record(true);
        }
        assert!(pacer.successes < 100.0);
    }

    #[test]
    fn test_short_delays_are_skipped() {
        let mut pacer = AdaptivePacer::new(PacingConfig {
            base_delay: Duration::from_millis(110),
            ..PacingConfig::default()
        });
        for _ in 0..20 {
            pacer.record(true);
        }
        assert_eq!(pacer.next_delay(), None);
    }
}
