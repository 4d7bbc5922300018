//! Single-attempt client for the upstream chat endpoint.

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use http::header;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::user_agent::random_user_agent;

/// Upstream body, starting with the first non-empty chunk.
pub type UpstreamStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Posts one payload upstream per relay operation. No retries.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `payload` and return the validated body stream.
    ///
    /// The timeout bounds connect, response headers and the first body chunk;
    /// once bytes flow the stream itself is unbounded.
    pub async fn send(&self, payload: &serde_json::Value) -> Result<UpstreamStream> {
        let user_agent = random_user_agent();
        debug!(url = %self.url, user_agent, "sending upstream request");

        let rb = self
            .http
            .post(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header(header::USER_AGENT, user_agent)
            .json(payload);

        match tokio::time::timeout(self.timeout, open(rb)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(url = %self.url, timeout_secs = self.timeout.as_secs(), "upstream timed out");
                Err(RelayError::Transport(format!(
                    "upstream did not respond within {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

async fn open(rb: reqwest::RequestBuilder) -> Result<UpstreamStream> {
    let resp = rb.send().await.map_err(|e| {
        warn!(error = %e, "upstream request failed");
        RelayError::from(e)
    })?;

    let status = resp.status();
    if status != http::StatusCode::OK {
        let body = resp.text().await.unwrap_or_default();
        warn!(%status, body = %body, "upstream rejected request");
        return Err(RelayError::Upstream { status, body });
    }

    let mut body = Box::pin(resp.bytes_stream());
    loop {
        match body.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(first)) => {
                let head = stream::iter([Ok(first)]);
                return Ok(Box::pin(head.chain(body)));
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                warn!("upstream returned an empty body");
                return Err(RelayError::EmptyResponse);
            }
        }
    }
}
