use std::time::Duration;

use versus::{GameMode, NetConfig};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub net: NetConfig,
    pub mode: GameMode,
    pub auto_ready: bool,
    pub auto_start: bool,
    pub step_interval: Duration,
    pub pieces: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            mode: GameMode::Normal,
            auto_ready: false,
            auto_start: false,
            step_interval: Duration::from_millis(150),
            pieces: 24,
        }
    }
}
