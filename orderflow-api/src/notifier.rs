//! HTTP message sink.
//!
//! Publishes raw payloads to a running service's `POST /messages`, which
//! puts them on that service's inbound queue.

use std::time::Duration;

use async_trait::async_trait;
use orderflow_core::TransportError;
use orderflow_ingest::MessageSink;

#[derive(Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    /// `base_url` is the service root, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Publish {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint: messages_endpoint(base_url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn messages_endpoint(base_url: &str) -> String {
    format!("{}/messages", base_url.trim_end_matches('/'))
}

#[async_trait]
impl MessageSink for HttpSink {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| TransportError::Publish {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Publish {
                reason: format!("{} returned {}: {}", self.endpoint, status, body),
            });
        }
        Ok(())
    }
}
