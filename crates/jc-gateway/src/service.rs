//! Gateway HTTP service: WebSocket upgrades, event publishing, health,
//! Prometheus export and the backend bridge routes.

use crate::bridge::{Bridge, BridgeClient};
use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::ws::ws_handler;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use jc_auth::middleware::create_cors_layer;
use jc_auth::{apply_http_stack, AuthContext, AuthenticatedKey};
use jc_hub::{Event, EventHub, EventKind};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Prometheus text exposition content type.
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// State shared by every gateway handler.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub hub: EventHub,
    pub bridge: Bridge,
}

/// The gateway HTTP service.
pub struct GatewayService {
    state: GatewayState,
    auth: AuthContext,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, hub: EventHub, auth: AuthContext) -> Result<Self, GatewayError> {
        let client = BridgeClient::new(&config.bridge)?;
        let bridge = Bridge::new(client, hub.clone());
        Ok(Self {
            state: GatewayState {
                config: Arc::new(config),
                hub,
                bridge,
            },
            auth,
        })
    }

    pub fn hub(&self) -> &EventHub {
        &self.state.hub
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }

    /// Build the router with the full middleware stack.
    pub fn router(&self) -> Router {
        // Layers added later run first: key or token check, then rate limit.
        let authed = Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/events", post(publish_event))
            .route("/api/chat", post(chat))
            .route("/api/models/load", post(load_model))
            .route("/api/plugins/toggle", post(toggle_plugin))
            .route("/api/training/start", post(start_training))
            .route("/api/commands", post(add_command))
            .route("/api/commands/:name", delete(delete_command))
            .route_layer(self.auth.rate_limit_layer())
            .route_layer(self.auth.gateway_auth_layer());

        let router = Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .merge(authed)
            .with_state(self.state.clone());

        let config = &self.state.config;
        apply_http_stack(router, &config.http, create_cors_layer(&config.cors))
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let router = self.router();
        info!(
            addr = %addr,
            backend = %self.state.bridge.client().base_url(),
            "Gateway listening"
        );
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidEvent(format!("Invalid request body: {e}")))
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn health(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "clients": state.hub.client_count(),
    }))
}

async fn metrics() -> Response {
    match jc_telemetry::encode_metrics() {
        Ok(text) => ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], text).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Body of `POST /api/events`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PublishRequest {
    #[serde(rename = "type")]
    kind: String,
    data: Value,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl PublishRequest {
    fn into_event(self) -> Result<Event, GatewayError> {
        let kind: EventKind = self.kind.parse()?;
        let event = Event::from_value(kind, self.data)?;
        Ok(match self.timestamp {
            Some(ts) => event.with_timestamp(ts),
            None => event,
        })
    }
}

async fn publish_event(
    State(state): State<GatewayState>,
    Extension(auth): Extension<AuthenticatedKey>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let event = parse_body::<PublishRequest>(&body)?.into_event()?;
    let kind = event.kind();
    let queued = state.hub.broadcast(event);
    debug!(event_type = %kind, key = %auth.masked(), queued, "Event published");

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))).into_response())
}

async fn chat(State(state): State<GatewayState>, body: Bytes) -> Result<Json<Value>, GatewayError> {
    let request = parse_body(&body)?;
    Ok(Json(state.bridge.send_chat(request).await?))
}

async fn load_model(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let request = parse_body(&body)?;
    Ok(Json(state.bridge.load_model(request).await?))
}

async fn toggle_plugin(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let request = parse_body(&body)?;
    Ok(Json(state.bridge.toggle_plugin(request).await?))
}

async fn start_training(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let request = parse_body(&body)?;
    Ok(Json(state.bridge.start_training(request).await?))
}

async fn add_command(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let request = parse_body(&body)?;
    Ok(Json(state.bridge.add_command(request).await?))
}

async fn delete_command(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    Ok(Json(state.bridge.delete_command(&name).await?))
}
