//! WebSocket upgrade endpoint.

pub mod connection;

pub use connection::{Connection, PumpExit};

use crate::service::GatewayState;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    Extension,
};
use jc_auth::AuthenticatedKey;
use jc_hub::Client;
use serde::Deserialize;
use tracing::debug;

/// Optional query parameters on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Caller-chosen connection ID. A fresh UUID when absent.
    pub client_id: Option<String>,
}

/// Scope a caller-chosen ID to the authenticating key so a reconnect only
/// ever replaces a connection opened with the same key.
pub fn scoped_client_id(auth: &AuthenticatedKey, id: &str) -> String {
    format!("{}/{}", auth.masked(), id.trim())
}

/// `GET /ws`: upgrade an authenticated request into a hub subscription.
pub async fn ws_handler(
    State(state): State<GatewayState>,
    Extension(auth): Extension<AuthenticatedKey>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let capacity = state.hub.mailbox_capacity();
    let (client, mailbox) = match query.client_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => Client::with_capacity(scoped_client_id(&auth, &id), capacity),
        None => Client::generate(capacity),
    };
    debug!(client_id = %client.id(), key = %auth.masked(), method = ?auth.method, "Upgrading WebSocket");

    let ws_config = state.config.websocket.clone();
    let hub = state.hub.clone();
    upgrade
        .max_message_size(ws_config.max_message_size)
        .on_upgrade(move |socket| Connection::new(hub, client, mailbox, ws_config).run(socket))
}
