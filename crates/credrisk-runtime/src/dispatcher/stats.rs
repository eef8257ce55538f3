//! Dispatcher counters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Running totals kept under the dispatcher lock.
#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub rate_limited_requests: u64,
    pub retried_requests: u64,
    pub failed_requests: u64,
    pub total_tokens_used: u64,
    response_time_total: Duration,
}

impl DispatchCounters {
    pub fn record_success(&mut self, tokens: u32, elapsed: Duration) {
        self.successful_requests += 1;
        self.total_tokens_used += u64::from(tokens);
        self.response_time_total += elapsed;
    }

    pub fn snapshot(&self, window_occupancy: usize, window_cap: usize, pacing_factor: f64) -> DispatcherStats {
        let average_response_ms = if self.successful_requests == 0 {
            0.0
        } else {
            self.response_time_total.as_secs_f64() * 1000.0 / self.successful_requests as f64
        };

        DispatcherStats {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            rate_limited_requests: self.rate_limited_requests,
            retried_requests: self.retried_requests,
            failed_requests: self.failed_requests,
            total_tokens_used: self.total_tokens_used,
            average_response_ms,
            window_occupancy,
            window_cap,
            pacing_factor,
        }
    }
}

/// Point-in-time dispatcher statistics.
///
/// `total_requests` counts logical invocations; `retried_requests` counts
/// retry attempts and `rate_limited_requests` counts throttled attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub rate_limited_requests: u64,
    pub retried_requests: u64,
    pub failed_requests: u64,
    pub total_tokens_used: u64,
    pub average_response_ms: f64,
    pub window_occupancy: usize,
    pub window_cap: usize,
    pub pacing_factor: f64,
}

impl DispatcherStats {
    /// Percentage of logical invocations that succeeded.
    pub fn success_rate(&self) -> f64 {
        self.successful_requests as f64 * 100.0 / self.total_requests.max(1) as f64
    }

    /// Percentage of the admission window currently in use.
    pub fn utilization(&self) -> f64 {
        self.window_occupancy as f64 * 100.0 / self.window_cap.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let mut counters = DispatchCounters {
            total_requests: 4,
            ..Default::default()
        };
        counters.record_success(100, Duration::from_millis(200));
        counters.record_success(50, Duration::from_millis(400));

        let stats = counters.snapshot(10, 40, 0.9);
        assert_eq!(stats.total_tokens_used, 150);
        assert!((stats.average_response_ms - 300.0).abs() < 1e-9);
        assert!((stats.success_rate() - 50.0).abs() < 1e-9);
        assert!((stats.utilization() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot() {
        let stats = DispatchCounters::default().snapshot(0, 40, 1.0);
        assert_eq!(stats.average_response_ms, 0.0);
        assert_eq!(stats.success_rate(), 0.0);
    }
}
