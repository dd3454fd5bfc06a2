use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;

use relay_api::{Change, EventSource, Payload, SourceError};

fn default_interval_ms() -> u64 {
    3_000
}

fn default_message() -> String {
    "New data!".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct TickerConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_message")]
    pub message: String,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            message: default_message(),
        }
    }
}

/// Emits a fixed text message every `interval_ms`, the first one after
/// one full interval.
pub struct TickerSource {
    name: String,
    interval: Duration,
    message: String,
    next_tick: Option<Instant>,
}

impl TickerSource {
    pub fn new(name: impl Into<String>, config: TickerConfig) -> Result<Self, SourceError> {
        if config.interval_ms == 0 {
            return Err(SourceError::config("ticker interval_ms must be positive"));
        }
        Ok(Self {
            name: name.into(),
            interval: Duration::from_millis(config.interval_ms),
            message: config.message,
            next_tick: None,
        })
    }

    /// Build from a JSON config object; `{}` means defaults.
    pub fn from_json(name: impl Into<String>, config_json: &str) -> Result<Self, SourceError> {
        let config: TickerConfig = if config_json == "{}" {
            TickerConfig::default()
        } else {
            serde_json::from_str(config_json).map_err(|e| SourceError::config(format!("ticker config: {e}")))?
        };
        Self::new(name, config)
    }
}

impl EventSource for TickerSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self) -> Pin<Box<dyn Future<Output = Result<Change, SourceError>> + Send + '_>> {
        Box::pin(async move {
            let at = self.next_tick.unwrap_or_else(|| Instant::now() + self.interval);
            tokio::time::sleep_until(at).await;
            self.next_tick = Some(at + self.interval);
            tracing::trace!(source = %self.name, "tick");
            Ok(Change::new(Payload::text(self.message.clone())))
        })
    }
}
