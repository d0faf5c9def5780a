//! Push-relay HTTP client
//!
//! POSTs one JSON message per call. Status classification is left to the
//! delivery client; this layer only reports what the relay answered or why
//! the request never completed.

use crate::domain::notification::PushMessage;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Longest relay response body kept for logs
const MAX_BODY_LOG: usize = 512;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay request timed out")]
    Timeout,
    #[error("relay request failed: {0}")]
    Transport(String),
    #[error("failed to encode push message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Network-level failures may succeed on retry; encoding never will
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Timeout | RelayError::Transport(_))
    }
}

/// What the relay answered
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    /// Truncated body, kept for diagnostics
    pub body: String,
}

/// Outbound seam to the push-relay service
#[async_trait]
pub trait PushRelay: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<RelayResponse, RelayError>;
}

/// reqwest-backed relay client
pub struct HttpPushRelay {
    url: String,
    client: reqwest::Client,
}

impl HttpPushRelay {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url: url.to_string(), client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushRelay for HttpPushRelay {
    async fn send(&self, message: &PushMessage) -> Result<RelayResponse, RelayError> {
        let body = serde_json::to_vec(message)?;

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .header("Accept-Encoding", "gzip, deflate")
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RelayError::Timeout
                } else {
                    RelayError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        // Body is best effort; the status alone decides the outcome
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_BODY_LOG {
            let mut end = MAX_BODY_LOG;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }

        debug!(url = %self.url, status = %status, "relay_response");
        Ok(RelayResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RelayError::Timeout.is_transient());
        assert!(RelayError::Transport("connection refused".to_string()).is_transient());

        let encode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!RelayError::Encode(encode).is_transient());
    }

    #[test]
    fn test_client_builds() {
        let relay = HttpPushRelay::new("http://127.0.0.1:9/send", Duration::from_secs(1)).unwrap();
        assert_eq!(relay.url(), "http://127.0.0.1:9/send");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Port 9 (discard) is essentially never listening on loopback
        let relay =
            HttpPushRelay::new("http://127.0.0.1:9/send", Duration::from_millis(500)).unwrap();
        let message = crate::domain::MessageTemplate::default().render(
            "tok",
            "A",
            crate::domain::EventKind::Enter,
        );

        let err = relay.send(&message).await.unwrap_err();
        assert!(err.is_transient());
    }
}
