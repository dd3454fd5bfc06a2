use std::time::Duration;

use relay_api::{Envelope, SubscriptionId};

use crate::error::WatchError;

/// Thin HTTP client for the relay delivery routes.
pub struct RelayClient {
    http: reqwest::Client,
    base: reqwest::Url,
}

impl RelayClient {
    pub fn new(server: &str) -> Result<Self, WatchError> {
        let base = reqwest::Url::parse(server)
            .map_err(|e| WatchError::Url { url: server.to_string(), detail: e.to_string() })?;
        // No overall timeout: long polls and streams are held open.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, base })
    }

    fn url(
        &self,
        topic: &str,
        route: &str,
        subscription: Option<SubscriptionId>,
        cursor: Option<u64>,
    ) -> Result<reqwest::Url, WatchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| WatchError::Url { url: self.base.to_string(), detail: "cannot be a base".into() })?
            .pop_if_empty()
            .extend(["api", "topics", topic, route]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(id) = subscription {
                query.append_pair("subscription", &id.to_string());
            }
            if let Some(cursor) = cursor {
                query.append_pair("cursor", &cursor.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    pub async fn poll(&self, topic: &str, cursor: Option<u64>) -> Result<Envelope, WatchError> {
        let url = self.url(topic, "poll", None, cursor)?;
        let response = check(self.http.get(url).send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn long_poll(
        &self,
        topic: &str,
        subscription: Option<SubscriptionId>,
        cursor: Option<u64>,
    ) -> Result<Envelope, WatchError> {
        let url = self.url(topic, "long-poll", subscription, cursor)?;
        let response = check(self.http.get(url).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Open the SSE stream; the caller reads the body.
    pub async fn stream(
        &self,
        topic: &str,
        subscription: Option<SubscriptionId>,
        cursor: Option<u64>,
    ) -> Result<reqwest::Response, WatchError> {
        let url = self.url(topic, "stream", subscription, cursor)?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        check(response).await
    }
}

/// Turn a non-success answer into `WatchError::Status`, taking the
/// message from the `{"error": ...}` body when there is one.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, WatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(WatchError::Status { status: status.as_u16(), message })
}
