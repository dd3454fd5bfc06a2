use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use relay_engine::DeliveryConfig;

use crate::error::ServerError;

pub const DEFAULT_CONFIG_PATH: &str = "relay.toml";

#[derive(Parser)]
#[command(name = "relay-server", about = "Сервис доставки обновлений в реальном времени")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить сервер
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, env = "RELAY_CONFIG")]
    pub config: String,

    #[arg(long, env = "RELAY_API_PORT")]
    pub api_port: Option<u16>,

    #[arg(long, env = "RELAY_BACKLOG_CAPACITY")]
    pub backlog_capacity: Option<usize>,

    #[arg(long, env = "RELAY_LONG_POLL_HOLD_TIMEOUT_MS")]
    pub long_poll_hold_timeout_ms: Option<u64>,

    #[arg(long, env = "RELAY_STREAM_KEEP_ALIVE_MS")]
    pub stream_keep_alive_ms: Option<u64>,

    #[arg(long, env = "RELAY_SUBSCRIBER_QUEUE_DEPTH")]
    pub subscriber_queue_depth: Option<usize>,

    #[arg(long, env = "RELAY_SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: Option<u64>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_api_port() -> u16 {
    9300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            delivery: DeliveryConfig::default(),
            sources: Vec::new(),
        }
    }
}

/// Запись `[[sources]]`: адаптер вида `kind`, пишущий в `topic`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub topic: String,
    /// `http_poll` или `ticker`.
    pub kind: String,
    /// Конфиг адаптера, передаётся ему как JSON.
    #[serde(default)]
    pub config: Option<toml::Value>,
}

impl SourceConfig {
    /// Конфиг адаптера в виде JSON, `{}` если не задан.
    pub fn config_json(&self) -> Result<String, ServerError> {
        match &self.config {
            Some(v) => serde_json::to_string(v).map_err(|e| ServerError::Config {
                context: "source",
                detail: format!("'{}': {e}", self.name),
            }),
            None => Ok("{}".to_string()),
        }
    }
}

impl ServerConfig {
    pub fn parse(content: &str) -> Result<Self, ServerError> {
        toml::from_str(content).map_err(|e| ServerError::Config { context: "parse", detail: e.to_string() })
    }

    /// Прочитать `path`. Отсутствие файла допустимо только для пути по умолчанию.
    pub fn load(path: &str) -> Result<Self, ServerError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|e| match e {
                ServerError::Config { context, detail } => {
                    ServerError::Config { context, detail: format!("'{path}': {detail}") }
                }
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && path == DEFAULT_CONFIG_PATH => {
                tracing::warn!(config = %path, "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ServerError::Config { context: "read", detail: format!("'{path}': {e}") }),
        }
    }

    /// Наложить значения из CLI/env поверх файла и провалидировать.
    pub fn effective(mut self, args: &ServeArgs) -> Result<Self, ServerError> {
        if let Some(port) = args.api_port {
            self.api_port = port;
        }
        let delivery = &mut self.delivery;
        if let Some(v) = args.backlog_capacity {
            delivery.backlog_capacity = v;
        }
        if let Some(v) = args.long_poll_hold_timeout_ms {
            delivery.long_poll_hold_timeout_ms = v;
        }
        if let Some(v) = args.stream_keep_alive_ms {
            delivery.stream_keep_alive_ms = v;
        }
        if let Some(v) = args.subscriber_queue_depth {
            delivery.subscriber_queue_depth = v;
        }
        if let Some(v) = args.sweep_interval_ms {
            delivery.sweep_interval_ms = v;
        }

        if self.api_port == 0 {
            return Err(ServerError::Config { context: "validate", detail: "api_port must be positive".into() });
        }
        self.delivery.validate()?;
        for source in &self.sources {
            if source.topic.is_empty() {
                return Err(ServerError::Config {
                    context: "validate",
                    detail: format!("source '{}' has an empty topic", source.name),
                });
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
api_port = 8080

[delivery]
backlog_capacity = 50
long_poll_hold_timeout_ms = 1000

[[sources]]
name = "posts"
topic = "posts"
kind = "http_poll"
config = { url = "http://localhost:3000/posts", interval_ms = 5000 }

[[sources]]
name = "ticker"
topic = "news"
kind = "ticker"
"#;

    #[test]
    fn parses_file_with_defaults() {
        let config = ServerConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.delivery.backlog_capacity, 50);
        assert_eq!(config.delivery.long_poll_hold_timeout_ms, 1000);
        assert_eq!(config.delivery.stream_keep_alive_ms, 15_000);
        assert_eq!(config.sources.len(), 2);

        let json: serde_json::Value = serde_json::from_str(&config.sources[0].config_json().unwrap()).unwrap();
        assert_eq!(json["url"], "http://localhost:3000/posts");
        assert_eq!(config.sources[1].config_json().unwrap(), "{}");
    }

    #[test]
    fn overrides_take_precedence() {
        let args = ServeArgs {
            api_port: Some(9999),
            backlog_capacity: Some(7),
            sweep_interval_ms: Some(250),
            ..Default::default()
        };
        let config = ServerConfig::parse(SAMPLE).unwrap().effective(&args).unwrap();
        assert_eq!(config.api_port, 9999);
        assert_eq!(config.delivery.backlog_capacity, 7);
        assert_eq!(config.delivery.sweep_interval_ms, 250);
        assert_eq!(config.delivery.long_poll_hold_timeout_ms, 1000);
    }

    #[test]
    fn non_positive_values_are_rejected() {
        let args = ServeArgs { subscriber_queue_depth: Some(0), ..Default::default() };
        let err = ServerConfig::default().effective(&args).unwrap_err();
        assert!(err.to_string().contains("subscriber_queue_depth"));

        let args = ServeArgs { api_port: Some(0), ..Default::default() };
        assert!(ServerConfig::default().effective(&args).is_err());
    }

    #[test]
    fn sample_config_is_valid() {
        let config = ServerConfig::parse(include_str!("../relay.toml")).unwrap();
        let config = config.effective(&ServeArgs::default()).unwrap();
        assert_eq!(config.delivery, DeliveryConfig::default());
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn missing_file_only_allowed_at_default_path() {
        let err = ServerConfig::load("/nonexistent/relay.toml").unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "read", .. }));

        let err = ServerConfig::parse("api_port = \"x\"").unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "parse", .. }));
    }
}
