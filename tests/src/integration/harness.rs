//! Test harness: a runtime on ephemeral ports plus client helpers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use jc_auth::AuthConfig;
use jc_gateway::GatewayConfig;
use jc_runtime::{Mode, Runtime};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const API_KEY: &str = "e2e-primary-key-000001";
pub const SECOND_KEY: &str = "e2e-second-key-0000002";
pub const ADMIN_KEY: &str = "e2e-admin-credential";
pub const JWT_SECRET: &str = "e2e-jwt-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Knobs for [`TestNode::start_with`].
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    /// Metrics producer period; `None` disables the producer.
    pub metrics_interval: Option<Duration>,
    /// Load keys from this file instead of the inline list.
    pub key_file: Option<PathBuf>,
}

/// A running runtime in `all` mode bound to 127.0.0.1:0.
pub struct TestNode {
    pub runtime: Runtime,
    pub gateway: SocketAddr,
    pub auth: SocketAddr,
    pub http: reqwest::Client,
}

impl TestNode {
    pub async fn start() -> Self {
        Self::start_with(NodeOptions::default()).await
    }

    pub async fn start_with(options: NodeOptions) -> Self {
        let mut gateway = GatewayConfig::default();
        gateway.listen_addr = "127.0.0.1:0".parse().expect("addr");
        gateway.bridge.backend_url = "http://127.0.0.1:9".to_string();
        match options.metrics_interval {
            Some(interval) => gateway.producer.interval = interval,
            None => gateway.producer.enabled = false,
        }

        let mut auth = AuthConfig::default();
        auth.listen_addr = "127.0.0.1:0".parse().expect("addr");
        auth.jwt_secret = JWT_SECRET.to_string();
        auth.admin_key = Some(ADMIN_KEY.to_string());
        match options.key_file {
            Some(path) => auth.keys.file = path,
            None => auth.keys.inline = Some(format!("{API_KEY},{SECOND_KEY}")),
        }

        let mut runtime = Runtime::new(Mode::All, gateway, auth).expect("runtime config");
        let addrs = runtime.start().await.expect("runtime start");

        Self {
            runtime,
            gateway: addrs.gateway.expect("gateway addr"),
            auth: addrs.auth.expect("auth addr"),
            http: reqwest::Client::new(),
        }
    }

    pub fn ws_url(&self, query: &str) -> String {
        if query.is_empty() {
            format!("ws://{}/ws", self.gateway)
        } else {
            format!("ws://{}/ws?{}", self.gateway, query)
        }
    }

    /// Open `/ws` with `X-API-Key` and wait until the hub has registered it.
    pub async fn connect(&self, key: &str, query: &str) -> WsStream {
        let before = self.client_count();
        let ws = self.try_connect(key, query).await.expect("ws connect");
        self.wait_for_clients(before + 1).await;
        ws
    }

    /// Open `/ws` with `X-API-Key` without waiting for registration.
    pub async fn try_connect(&self, key: &str, query: &str) -> Result<WsStream, tungstenite::Error> {
        let mut request = self.ws_url(query).into_client_request()?;
        request
            .headers_mut()
            .insert("X-API-Key", HeaderValue::from_str(key).expect("header"));
        let (ws, _response) = connect_async(request).await?;
        Ok(ws)
    }

    pub fn client_count(&self) -> usize {
        self.runtime.hub().map(|hub| hub.client_count()).unwrap_or(0)
    }

    pub async fn wait_for_clients(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.client_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("hub never reached expected client count");
    }

    /// `POST /api/events` on the gateway.
    pub async fn publish(&self, key: &str, body: Value) -> reqwest::Response {
        self.http
            .post(format!("http://{}/api/events", self.gateway))
            .header("X-API-Key", key)
            .json(&body)
            .send()
            .await
            .expect("publish request")
    }

    /// `POST /api/auth/token` on the auth service.
    pub async fn issue_token(&self, key: &str) -> String {
        let body: Value = self
            .http
            .post(format!("http://{}/api/auth/token", self.auth))
            .json(&serde_json::json!({ "api_key": key }))
            .send()
            .await
            .expect("token request")
            .json()
            .await
            .expect("token body");
        body["token"].as_str().expect("token").to_string()
    }

    pub async fn stop(self) {
        self.runtime.shutdown().await.expect("shutdown");
    }
}

/// Next text frame as JSON, skipping control frames.
pub async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(_) => {
                return serde_json::from_str(msg.to_text().expect("text")).expect("json frame")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Wait for the server to end the connection. Returns true on a close frame.
pub async fn expect_closed(ws: &mut WsStream) -> bool {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(_))) => return true,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected frame before close: {other:?}"),
            Some(Err(_)) | None => return false,
        }
    }
}
