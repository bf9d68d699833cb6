use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::protocol::{DEFAULT_PORT, MAX_FRAME_SIZE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub lag_threshold_ms: u64,
    pub queue_capacity: usize,
    pub latency_window: usize,
    pub ready_debounce: Duration,
    pub stats_interval: Duration,
    pub max_frame_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(5),
            lag_threshold_ms: 200,
            queue_capacity: 100,
            latency_window: 10,
            ready_debounce: Duration::from_secs(3),
            stats_interval: Duration::from_secs(10),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl NetConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_lag_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.lag_threshold_ms = threshold_ms;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_ready_debounce(mut self, debounce: Duration) -> Self {
        self.ready_debounce = debounce;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.port, 12345);
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(5));
        assert_eq!(config.lag_threshold_ms, 200);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.latency_window, 10);
        assert_eq!(config.ready_debounce, Duration::from_secs(3));
    }

    #[test]
    fn test_builder_overrides() {
        let config = NetConfig::default()
            .with_port(4000)
            .with_heartbeat(Duration::from_millis(50), Duration::from_millis(300))
            .with_queue_capacity(4);

        assert_eq!(config.port, 4000);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(50));
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(300));
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.lag_threshold_ms, 200);
    }
}
