//! HTTP sink - POSTs every payload to a fixed address.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::queue::{QueueSink, Transport, TransportError};
use super::SinkError;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// HTTP sink.
pub type HttpSink = QueueSink<HttpTransport>;

/// Delivers each payload as the body of one POST request.
pub struct HttpTransport {
    client: reqwest::Client,
    address: String,
}

impl HttpTransport {
    /// Create a transport posting to `address`.
    pub fn new(address: &str) -> Result<Self, SinkError> {
        if address.trim().is_empty() {
            return Err(SinkError::Config(
                "missing SINK_HTTP_ADDRESS (example: http://miau.com:8080/biau)".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            client,
            address: address.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, payload: &[u8]) -> Result<(), TransportError> {
        debug!(address = %self.address, bytes = payload.len(), "Publishing payload");

        let response = self
            .client
            .post(&self.address)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        Ok(())
    }
}
