//! Capped exponential retry schedule with jitter.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use rand::Rng;

use crate::config::RetryConfig;

const MIN_DELAY: Duration = Duration::from_millis(100);
const JITTER: f64 = 0.1;

/// Retry schedule for one failure class within one logical call.
///
/// Each call to [`RetrySchedule::next_delay`] consumes one retry, whether or
/// not a server hint replaces the computed delay.
#[derive(Debug)]
pub struct RetrySchedule {
    steps: ExponentialBackoff,
    max_delay: Duration,
}

impl RetrySchedule {
    pub fn new(config: &RetryConfig) -> Self {
        let steps = ExponentialBuilder::default()
            .with_min_delay(config.base_delay)
            .with_factor(config.growth)
            .with_max_delay(config.max_delay)
            .with_max_times(config.max_retries)
            .build();

        Self {
            steps,
            max_delay: config.max_delay,
        }
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        let computed = self.steps.next()?;
        let delay = hint.map_or(computed, |h| h.min(self.max_delay));
        Some(jittered(delay))
    }
}

fn jittered(delay: Duration) -> Duration {
    let spread = delay.as_secs_f64() * JITTER;
    let offset = if spread > 0.0 {
        rand::thread_rng().gen_range(-spread..=spread)
    } else {
        0.0
    };
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0)).max(MIN_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn within_jitter(actual: Duration, expected_secs: f64) -> bool {
        let a = actual.as_secs_f64();
        a >= expected_secs * 0.9 - 1e-6 && a <= expected_secs * 1.1 + 1e-6
    }

    #[test]
    fn test_schedule_grows_and_caps() {
        let mut schedule = RetrySchedule::new(&RetryConfig::rate_limit());
        let delays: Vec<Duration> = std::iter::from_fn(|| schedule.next_delay(None)).collect();

        assert_eq!(delays.len(), 8);
        assert!(within_jitter(delays[0], 2.0));
        assert!(within_jitter(delays[1], 3.6));
        assert!(within_jitter(delays[2], 6.48));
        assert!(within_jitter(delays[7], 120.0));
    }

    #[test]
    fn test_transient_schedule_has_three_retries() {
        let mut schedule = RetrySchedule::new(&RetryConfig::transient());
        assert!(schedule.next_delay(None).is_some());
        assert!(schedule.next_delay(None).is_some());
        assert!(schedule.next_delay(None).is_some());
        assert!(schedule.next_delay(None).is_none());
    }

    #[test]
    fn test_hint_overrides_and_consumes_a_retry() {
        let mut schedule = RetrySchedule::new(&RetryConfig::transient());
        let d = schedule.next_delay(Some(Duration::from_secs(10))).unwrap();
        assert!(within_jitter(d, 10.0));

        let capped = schedule.next_delay(Some(Duration::from_secs(600))).unwrap();
        assert!(within_jitter(capped, 30.0));

        assert!(schedule.next_delay(None).is_some());
        assert!(schedule.next_delay(None).is_none());
    }

    proptest! {
        #[test]
        fn prop_jitter_stays_within_ten_percent(ms in 1_000u64..600_000) {
            let delay = Duration::from_millis(ms);
            prop_assert!(within_jitter(jittered(delay), delay.as_secs_f64()));
        }
    }

    #[test]
    fn test_minimum_delay() {
        assert_eq!(jittered(Duration::ZERO), MIN_DELAY);
        assert!(jittered(Duration::from_millis(50)) >= MIN_DELAY);
    }
}
