use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use relay_api::{Backoff, Change, DataFormat, EventSource, Payload, SourceError};

// ═══════════════════════════════════════════════════════════════
//  HttpPollConfig
// ═══════════════════════════════════════════════════════════════

fn default_interval_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_expect_json() -> bool {
    true
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct HttpPollConfig {
    pub url: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Reject bodies that are not JSON.
    #[serde(default = "default_expect_json")]
    pub expect_json: bool,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl HttpPollConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            expect_json: default_expect_json(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Dedup
// ═══════════════════════════════════════════════════════════════

/// Remembers the SHA-256 of the last emitted body.
#[derive(Debug, Default)]
pub struct Dedup {
    last: Option<String>,
}

impl Dedup {
    /// True when `body` differs from the previous one (and records it).
    pub fn is_new(&mut self, body: &[u8]) -> bool {
        let digest = format!("{:x}", Sha256::digest(body));
        if self.last.as_deref() == Some(digest.as_str()) {
            return false;
        }
        self.last = Some(digest);
        true
    }
}

/// Error for a non-success status: 5xx and 429 are retried, the rest
/// means the upstream contract is broken.
pub fn classify_status(status: reqwest::StatusCode) -> Option<SourceError> {
    if status.is_success() {
        None
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Some(SourceError::io(format!("upstream answered {status}")))
    } else {
        Some(SourceError::config(format!("upstream answered {status}")))
    }
}

// ═══════════════════════════════════════════════════════════════
//  HttpPollSource
// ═══════════════════════════════════════════════════════════════

/// Polls a URL on a fixed interval and emits the body when it changes.
pub struct HttpPollSource {
    name: String,
    config: HttpPollConfig,
    client: reqwest::Client,
    dedup: Dedup,
    backoff: Backoff,
    next_fetch: Option<Instant>,
}

impl HttpPollSource {
    pub fn new(name: impl Into<String>, config: HttpPollConfig) -> Result<Self, SourceError> {
        let name = name.into();
        reqwest::Url::parse(&config.url)
            .map_err(|e| SourceError::config(format!("url '{}': {e}", config.url)))?;
        if config.interval_ms == 0 || config.timeout_ms == 0 || config.backoff_base_ms == 0 {
            return Err(SourceError::config("interval_ms, timeout_ms and backoff_base_ms must be positive"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SourceError::config(format!("http client: {e}")))?;
        let backoff = Backoff::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms.max(config.backoff_base_ms)),
        );
        Ok(Self {
            name,
            config,
            client,
            dedup: Dedup::default(),
            backoff,
            next_fetch: None,
        })
    }

    /// Build from a JSON config object; `{}` is rejected since `url` is required.
    pub fn from_json(name: impl Into<String>, config_json: &str) -> Result<Self, SourceError> {
        let config: HttpPollConfig = serde_json::from_str(config_json)
            .map_err(|e| SourceError::config(format!("http_poll config: {e}")))?;
        Self::new(name, config)
    }

    async fn fetch(&self) -> Result<Vec<u8>, SourceError> {
        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| SourceError::io(e.to_string()))?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::io(e.to_string()))?;
        Ok(body.to_vec())
    }

    fn to_payload(&self, body: Vec<u8>) -> Result<Payload, SourceError> {
        if self.config.expect_json {
            serde_json::from_slice::<serde_json::Value>(&body)
                .map_err(|e| SourceError::format(format!("body is not JSON: {e}")))?;
            Ok(Payload::new(body, DataFormat::Json))
        } else {
            Ok(Payload::detect(body))
        }
    }

    async fn next_change(&mut self) -> Result<Change, SourceError> {
        loop {
            if let Some(at) = self.next_fetch {
                tokio::time::sleep_until(at).await;
            }
            tracing::info!(source = %self.name, url = %self.config.url, "fetching");
            let result = self.fetch().await;
            match result {
                Ok(body) => {
                    self.backoff.reset();
                    self.next_fetch = Some(Instant::now() + Duration::from_millis(self.config.interval_ms));
                    if !self.dedup.is_new(&body) {
                        tracing::debug!(source = %self.name, "body unchanged");
                        continue;
                    }
                    tracing::info!(source = %self.name, bytes = body.len(), "fetched");
                    let payload = self
                        .to_payload(body)
                        .map_err(|e| e.with_context(format!("source '{}'", self.name)))?;
                    return Ok(Change::new(payload));
                }
                Err(e) if e.is_transient() => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        source = %self.name,
                        error = %e,
                        attempt = self.backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "request failed"
                    );
                    self.next_fetch = Some(Instant::now() + delay);
                }
                Err(e) => {
                    tracing::error!(source = %self.name, error = %e, "request failed");
                    return Err(e.with_context(format!("source '{}'", self.name)));
                }
            }
        }
    }
}

impl EventSource for HttpPollSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self) -> Pin<Box<dyn Future<Output = Result<Change, SourceError>> + Send + '_>> {
        Box::pin(self.next_change())
    }
}

#[cfg(test)]
mod tests {
    use relay_api::ErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Answers each connection with the next `(status, body)`, repeating
    /// the last one forever.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut i = 0;
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let (status, body) = responses[i.min(responses.len() - 1)];
                i += 1;
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/posts")
    }

    fn fast(url: String) -> HttpPollConfig {
        HttpPollConfig {
            interval_ms: 10,
            timeout_ms: 2_000,
            backoff_base_ms: 5,
            backoff_cap_ms: 20,
            ..HttpPollConfig::new(url)
        }
    }

    #[test]
    fn config_defaults() {
        let source = HttpPollSource::from_json("posts", r#"{"url":"http://localhost/posts"}"#).unwrap();
        assert_eq!(source.config.interval_ms, 5_000);
        assert_eq!(source.config.timeout_ms, 10_000);
        assert!(source.config.expect_json);

        let err = HttpPollSource::from_json("posts", "{}").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = HttpPollSource::new("posts", HttpPollConfig::new("not a url")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn dedup_skips_identical_bodies() {
        let mut dedup = Dedup::default();
        assert!(dedup.is_new(b"[1]"));
        assert!(!dedup.is_new(b"[1]"));
        assert!(dedup.is_new(b"[1,2]"));
        assert!(dedup.is_new(b"[1]"));
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(reqwest::StatusCode::OK).is_none());
        assert!(classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE).unwrap().is_transient());
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS).unwrap().is_transient());
        let err = classify_status(reqwest::StatusCode::NOT_FOUND).unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn unchanged_body_emits_nothing() {
        let url = serve(vec![(200, "[1]"), (200, "[1]"), (200, "[1]"), (200, "[1,2]")]).await;
        let mut source = HttpPollSource::new("posts", fast(url)).unwrap();

        let first = source.produce().await.unwrap();
        assert_eq!(first.payload.as_bytes(), b"[1]");
        assert_eq!(first.payload.format(), DataFormat::Json);

        let second = source.produce().await.unwrap();
        assert_eq!(second.payload.as_bytes(), b"[1,2]");
    }

    #[tokio::test]
    async fn transient_status_is_retried() {
        let url = serve(vec![(503, ""), (429, ""), (200, "{\"ok\":true}")]).await;
        let mut source = HttpPollSource::new("posts", fast(url)).unwrap();
        let change = source.produce().await.unwrap();
        assert_eq!(change.payload.as_bytes(), b"{\"ok\":true}");
        assert_eq!(source.backoff.attempt(), 0);
    }

    #[tokio::test]
    async fn permanent_failures_are_fatal() {
        let url = serve(vec![(404, "")]).await;
        let mut source = HttpPollSource::new("posts", fast(url)).unwrap();
        let err = source.produce().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().starts_with("source 'posts'"));

        let url = serve(vec![(200, "<html>")]).await;
        let mut source = HttpPollSource::new("posts", fast(url)).unwrap();
        assert_eq!(source.produce().await.unwrap_err().kind(), ErrorKind::Format);
    }

    #[tokio::test]
    async fn text_bodies_when_json_not_expected() {
        let url = serve(vec![(200, "New data!")]).await;
        let config = HttpPollConfig { expect_json: false, ..fast(url) };
        let mut source = HttpPollSource::new("posts", config).unwrap();
        let change = source.produce().await.unwrap();
        assert_eq!(change.payload.format(), DataFormat::Text);
    }
}
