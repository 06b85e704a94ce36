//! HTTP client for the Python backend.

use crate::domain::config::BridgeConfig;
use jc_telemetry::metrics::BRIDGE_REQUESTS;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Longest backend error body kept for logs.
const MAX_ERROR_BODY: usize = 512;

/// Errors that can occur when calling the backend.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Backend timed out")]
    Timeout,
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Backend operations reachable through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Chat,
    LoadModel,
    TogglePlugin,
    StartTraining,
    AddCommand,
    DeleteCommand,
    Health,
}

impl Endpoint {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Chat => "chat",
            Endpoint::LoadModel => "load_model",
            Endpoint::TogglePlugin => "toggle_plugin",
            Endpoint::StartTraining => "start_training",
            Endpoint::AddCommand => "add_command",
            Endpoint::DeleteCommand => "delete_command",
            Endpoint::Health => "health",
        }
    }

    fn method(&self) -> Method {
        match self {
            Endpoint::DeleteCommand => Method::DELETE,
            Endpoint::Health => Method::GET,
            _ => Method::POST,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Endpoint::Chat => "/api/chat",
            Endpoint::LoadModel => "/api/models/load",
            Endpoint::TogglePlugin => "/api/plugins/toggle",
            Endpoint::StartTraining => "/api/training/start",
            Endpoint::AddCommand | Endpoint::DeleteCommand => "/api/commands",
            Endpoint::Health => "/health",
        }
    }
}

/// Backend API client.
#[derive(Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: Url,
}

impl BridgeClient {
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(BridgeError::Http)?;

        let base_url = Url::parse(&config.backend_url)
            .map_err(|e| BridgeError::InvalidUrl(format!("{}: {e}", config.backend_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::InvalidUrl(config.backend_url.clone()));
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Backend URL for `endpoint`, with `segment` appended as one
    /// percent-encoded path segment.
    fn endpoint_url(&self, endpoint: Endpoint, segment: Option<&str>) -> Result<Url, BridgeError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| BridgeError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty()
                .extend(endpoint.path().split('/').filter(|s| !s.is_empty()));
            if let Some(segment) = segment {
                path.push(segment);
            }
        }
        Ok(url)
    }

    pub async fn send_chat(&self, request: &Value) -> Result<Value, BridgeError> {
        self.call(Endpoint::Chat, None, Some(request)).await
    }

    pub async fn load_model(&self, request: &Value) -> Result<Value, BridgeError> {
        self.call(Endpoint::LoadModel, None, Some(request)).await
    }

    pub async fn toggle_plugin(&self, request: &Value) -> Result<Value, BridgeError> {
        self.call(Endpoint::TogglePlugin, None, Some(request)).await
    }

    pub async fn start_training(&self, request: &Value) -> Result<Value, BridgeError> {
        self.call(Endpoint::StartTraining, None, Some(request)).await
    }

    pub async fn add_command(&self, request: &Value) -> Result<Value, BridgeError> {
        self.call(Endpoint::AddCommand, None, Some(request)).await
    }

    pub async fn delete_command(&self, name: &str) -> Result<Value, BridgeError> {
        self.call(Endpoint::DeleteCommand, Some(name), None).await
    }

    /// Backend liveness probe.
    pub async fn health(&self) -> Result<Value, BridgeError> {
        self.call(Endpoint::Health, None, None).await
    }

    async fn call(
        &self,
        endpoint: Endpoint,
        segment: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value, BridgeError> {
        let result = self.send(endpoint, segment, body).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        BRIDGE_REQUESTS
            .with_label_values(&[endpoint.as_str(), outcome])
            .inc();
        result
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        segment: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value, BridgeError> {
        let url = self.endpoint_url(endpoint, segment)?;
        debug!(endpoint = endpoint.as_str(), url = %url, "Forwarding to backend");

        let mut request = self.client.request(endpoint.method(), url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            return Err(BridgeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| BridgeError::Parse(e.to_string()))
    }

    fn classify(&self, e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Timeout
        } else if e.is_connect() {
            BridgeError::Connection(format!("Cannot connect to {}", self.base_url()))
        } else {
            BridgeError::Http(e)
        }
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
