//! Jolokia HTTP 클라이언트
//!
//! Thin async client for the two agent operations the scraper needs:
//! a `version` request and bulk attribute reads.

use std::time::Duration;

use reqwest::{header, Client, ClientBuilder, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument};

use super::parser::{parse_bulk_response, parse_version_response, AgentInfo, JolokiaResponse};

/// One bulk-read entry: an object name (or pattern) and the attributes to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadRequest {
    #[serde(rename = "type")]
    request_type: &'static str,
    /// MBean ObjectName or pattern
    pub mbean: String,
    /// Attributes to read; empty means all
    #[serde(rename = "attribute", skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
    config: ReadConfig,
}

/// Per-request processing options
///
/// With `ignoreErrors` the agent answers a missing attribute with an error
/// placeholder value instead of failing the whole entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct ReadConfig {
    #[serde(rename = "ignoreErrors")]
    ignore_errors: bool,
}

impl ReadRequest {
    /// Create a read request
    pub fn new(mbean: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            request_type: "read",
            mbean: mbean.into(),
            attributes,
            config: ReadConfig {
                ignore_errors: true,
            },
        }
    }
}

/// Low-level client failures, mapped to connection or read errors by callers
#[derive(Debug)]
pub enum ClientError {
    /// Request failed on the wire
    Request(reqwest::Error),
    /// Request exceeded the client timeout
    Timeout,
    /// Non-success HTTP status
    Status(u16),
    /// `401` with the server's challenge, if any
    Unauthorized { challenge: Option<String> },
    /// Body could not be decoded
    Body(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// Jolokia HTTP 클라이언트
#[derive(Clone)]
pub struct JolokiaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    auth: Option<(String, String)>,
}

impl JolokiaClient {
    /// Default client settings: call timeout and a small idle pool
    pub fn builder(timeout: Duration) -> ClientBuilder {
        ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
    }

    /// Wrap an already configured HTTP client
    pub fn from_client(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            auth: None,
        }
    }

    /// Basic Auth 설정
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some((username.to_string(), password.to_string()));
        self
    }

    /// Base URL of the agent
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Configured call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the agent for its version
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn version(&self) -> Result<AgentInfo, ClientError> {
        let mut req = self.client.get(format!("{}/version", self.base_url));
        if let Some((username, password)) = &self.auth {
            req = req.basic_auth(username, Some(password));
        }

        let body = Self::body(req.send().await?).await?;
        parse_version_response(&body).map_err(ClientError::Body)
    }

    /// Bulk Read - 여러 MBean 일괄 조회
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn read_bulk(
        &self,
        requests: &[ReadRequest],
    ) -> Result<Vec<JolokiaResponse>, ClientError> {
        if requests.is_empty() {
            return Ok(vec![]);
        }

        debug!("Sending Jolokia bulk read request for {} mbeans", requests.len());

        let mut req = self.client.post(&self.base_url).json(requests);
        if let Some((username, password)) = &self.auth {
            req = req.basic_auth(username, Some(password));
        }

        let body = Self::body(req.send().await?).await?;
        parse_bulk_response(&body).map_err(|e| ClientError::Body(e.to_string()))
    }

    async fn body(response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(ClientError::Unauthorized { challenge });
        }
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}
