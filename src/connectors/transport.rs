//! HTTP transport shared by all connectors
//!
//! Status mapping:
//! - 429, 5xx, timeouts, connection errors -> `Transient`
//! - 401, 403, other 4xx -> `Fatal`

use super::ConnectorError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl FeedRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl ToString) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Fetch the response body as text
    async fn fetch(&self, request: &FeedRequest) -> Result<String, ConnectorError>;
}

/// reqwest-backed transport (rustls)
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("regwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::Fatal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Classify an HTTP status into the connector error taxonomy
pub fn classify_status(status: u16, context: &str) -> Result<(), ConnectorError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(ConnectorError::Transient(format!("{}: rate limited (429)", context))),
        500..=599 => Err(ConnectorError::Transient(format!("{}: server error ({})", context, status))),
        401 | 403 => Err(ConnectorError::Fatal(format!(
            "{}: credentials rejected ({})",
            context, status
        ))),
        _ => Err(ConnectorError::Fatal(format!("{}: unexpected status {}", context, status))),
    }
}

#[async_trait]
impl FeedTransport for ReqwestTransport {
    async fn fetch(&self, request: &FeedRequest) -> Result<String, ConnectorError> {
        let url = reqwest::Url::parse_with_params(&request.url, &request.query)
            .map_err(|e| ConnectorError::Fatal(format!("invalid URL {}: {}", request.url, e)))?;
        let host = url.host_str().unwrap_or("source").to_string();

        let mut builder = self.client.get(url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                ConnectorError::Transient(format!("{}: {}", host, e))
            } else {
                ConnectorError::Fatal(format!("{}: {}", host, e))
            }
        })?;

        classify_status(response.status().as_u16(), &host)?;

        response
            .text()
            .await
            .map_err(|e| ConnectorError::Transient(format!("{}: failed to read body: {}", host, e)))
    }
}

/// Transport that replays scripted responses in order
///
/// Once the script is exhausted the last response repeats. Requests are
/// recorded for assertions.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<String, ConnectorError>>>,
    last: Mutex<Option<Result<String, ConnectorError>>>,
    requests: Mutex<Vec<FeedRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<String, ConnectorError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests.lock().map(|r| (*r).clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn fetch(&self, request: &FeedRequest) -> Result<String, ConnectorError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let next = self
            .responses
            .lock()
            .map_err(|_| ConnectorError::Fatal("scripted transport poisoned".to_string()))?
            .pop_front();

        let mut last = self
            .last
            .lock()
            .map_err(|_| ConnectorError::Fatal("scripted transport poisoned".to_string()))?;

        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => (*last)
                .clone()
                .unwrap_or_else(|| Err(ConnectorError::Transient("no scripted response".to_string()))),
        }
    }
}
