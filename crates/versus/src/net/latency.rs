use std::collections::VecDeque;

use parking_lot::RwLock;

pub const DEFAULT_LATENCY_WINDOW: usize = 10;
pub const DEFAULT_LAG_THRESHOLD_MS: u64 = 200;

/// Rolling window over the most recent round-trip samples, in milliseconds.
#[derive(Debug)]
pub struct LatencyMonitor {
    samples: RwLock<VecDeque<u64>>,
    window: usize,
    lag_threshold_ms: u64,
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW, DEFAULT_LAG_THRESHOLD_MS)
    }
}

impl LatencyMonitor {
    pub fn new(window: usize, lag_threshold_ms: u64) -> Self {
        let window = window.max(1);
        Self {
            samples: RwLock::new(VecDeque::with_capacity(window)),
            window,
            lag_threshold_ms,
        }
    }

    pub fn record_latency(&self, rtt_ms: u64) {
        let mut samples = self.samples.write();
        while samples.len() >= self.window {
            samples.pop_front();
        }
        samples.push_back(rtt_ms);
    }

    pub fn average_latency(&self) -> u64 {
        let samples = self.samples.read();
        if samples.is_empty() {
            return 0;
        }
        samples.iter().sum::<u64>() / samples.len() as u64
    }

    pub fn min_latency(&self) -> u64 {
        self.samples.read().iter().copied().min().unwrap_or(0)
    }

    pub fn max_latency(&self) -> u64 {
        self.samples.read().iter().copied().max().unwrap_or(0)
    }

    pub fn last_latency(&self) -> u64 {
        self.samples.read().back().copied().unwrap_or(0)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_lagging(&self) -> bool {
        self.average_latency() > self.lag_threshold_ms
    }

    pub fn lag_threshold_ms(&self) -> u64 {
        self.lag_threshold_ms
    }

    pub fn reset(&self) {
        self.samples.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_reports_zero() {
        let monitor = LatencyMonitor::default();
        assert_eq!(monitor.average_latency(), 0);
        assert_eq!(monitor.min_latency(), 0);
        assert_eq!(monitor.max_latency(), 0);
        assert_eq!(monitor.last_latency(), 0);
        assert!(!monitor.is_lagging());
    }

    #[test]
    fn test_window_keeps_most_recent_ten() {
        let monitor = LatencyMonitor::default();
        for rtt in 1..=15 {
            monitor.record_latency(rtt * 10);
        }

        assert_eq!(monitor.sample_count(), 10);
        assert_eq!(monitor.min_latency(), 60);
        assert_eq!(monitor.max_latency(), 150);
        assert_eq!(monitor.last_latency(), 150);
        assert_eq!(monitor.average_latency(), 105);
    }

    #[test]
    fn test_lagging_uses_average() {
        let monitor = LatencyMonitor::default();
        monitor.record_latency(500);
        assert!(monitor.is_lagging());

        for _ in 0..9 {
            monitor.record_latency(20);
        }
        // (500 + 9 * 20) / 10 = 68
        assert!(!monitor.is_lagging());

        monitor.reset();
        monitor.record_latency(200);
        assert!(!monitor.is_lagging());
        monitor.record_latency(202);
        assert!(monitor.is_lagging());
    }
}
