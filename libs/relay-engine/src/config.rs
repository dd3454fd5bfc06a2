use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

fn default_backlog_capacity() -> usize {
    500
}

fn default_long_poll_hold_timeout_ms() -> u64 {
    25_000
}

fn default_stream_keep_alive_ms() -> u64 {
    15_000
}

fn default_subscriber_queue_depth() -> usize {
    100
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

/// Delivery tuning, the `[delivery]` table of the server config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliveryConfig {
    /// Events retained per topic.
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,

    /// How long a long poll is held open without data.
    #[serde(default = "default_long_poll_hold_timeout_ms")]
    pub long_poll_hold_timeout_ms: u64,

    /// Interval of keep-alive frames on an idle stream.
    #[serde(default = "default_stream_keep_alive_ms")]
    pub stream_keep_alive_ms: u64,

    /// Bound of each stream subscriber's outbound queue.
    #[serde(default = "default_subscriber_queue_depth")]
    pub subscriber_queue_depth: usize,

    /// Period of the idle-subscription sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            backlog_capacity: default_backlog_capacity(),
            long_poll_hold_timeout_ms: default_long_poll_hold_timeout_ms(),
            stream_keep_alive_ms: default_stream_keep_alive_ms(),
            subscriber_queue_depth: default_subscriber_queue_depth(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn hold_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_hold_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.stream_keep_alive_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Every option must be positive.
    pub fn validate(&self) -> Result<(), EngineError> {
        let checks: [(&str, bool); 5] = [
            ("backlog_capacity", self.backlog_capacity > 0),
            ("long_poll_hold_timeout_ms", self.long_poll_hold_timeout_ms > 0),
            ("stream_keep_alive_ms", self.stream_keep_alive_ms > 0),
            ("subscriber_queue_depth", self.subscriber_queue_depth > 0),
            ("sweep_interval_ms", self.sweep_interval_ms > 0),
        ];
        for (key, ok) in checks {
            if !ok {
                return Err(EngineError::Config(format!("delivery.{key} must be positive")));
            }
        }
        Ok(())
    }
}
