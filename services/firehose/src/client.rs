//! Orchestrator API client for the firehose.
//!
//! The allocation list is a blocking query: the server holds the request
//! until its index moves past `index` or `wait` elapses, then answers with
//! the full list and the current index in the `X-Nomad-Index` header.

use std::time::Duration;

use async_trait::async_trait;
use firehose_events::Allocation;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::NomadConfig;

/// Header carrying the index of a blocking query response.
const INDEX_HEADER: &str = "X-Nomad-Index";

/// Header carrying the ACL token.
const TOKEN_HEADER: &str = "X-Nomad-Token";

/// Slack added to the request timeout on top of the server-side wait.
/// The server adds up to `wait / 16` of jitter to every blocking query.
const WAIT_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

/// Errors from the orchestrator API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("missing or invalid X-Nomad-Index header")]
    MissingIndex,

    #[error("invalid allocation list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A blocking list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    /// Block until the server index exceeds this value.
    pub wait_index: u64,

    /// Upper bound on how long the server may block.
    pub wait_time: Duration,

    /// Allow any server, not only the leader, to answer.
    pub allow_stale: bool,
}

/// Result of a list query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResponse {
    /// Allocations in the order the server listed them.
    pub items: Vec<Allocation>,

    /// Server index at the time of the response.
    pub last_index: u64,
}

/// The allocation list endpoint of the orchestrator.
#[async_trait]
pub trait AllocationsApi: Send + Sync + 'static {
    /// List all allocations, blocking according to `query`.
    async fn list(&self, query: &ListQuery) -> Result<ListResponse, ClientError>;
}

/// Nomad HTTP API client.
pub struct NomadClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    region: Option<String>,
}

impl NomadClient {
    /// Create a new Nomad client.
    pub fn new(config: &NomadConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            region: config.region.clone(),
        })
    }
}

#[async_trait]
impl AllocationsApi for NomadClient {
    async fn list(&self, query: &ListQuery) -> Result<ListResponse, ClientError> {
        let url = format!("{}/v1/allocations", self.base_url);

        let mut params = vec![
            ("index", query.wait_index.to_string()),
            ("wait", format!("{}s", query.wait_time.as_secs())),
        ];
        if query.allow_stale {
            params.push(("stale", String::new()));
        }
        if let Some(region) = &self.region {
            params.push(("region", region.clone()));
        }

        debug!(url = %url, wait_index = query.wait_index, "Listing allocations");

        let mut request = self
            .client
            .get(&url)
            .query(&params)
            .timeout(query.wait_time + WAIT_TIMEOUT_SLACK);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to list allocations");
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let last_index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or(ClientError::MissingIndex)?;

        let body = response.bytes().await?;
        let items: Vec<Allocation> = serde_json::from_slice(&body)?;

        debug!(
            last_index,
            allocation_count = items.len(),
            "Listed allocations"
        );

        Ok(ListResponse { items, last_index })
    }
}
