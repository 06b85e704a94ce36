//! Gateway error types.

use crate::bridge::BridgeError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jc_auth::ConfigError;
use jc_hub::HubError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Gateway errors, converted to JSON responses at the HTTP boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Publish body failed to parse or validate
    #[error("{0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidEvent(_) | GatewayError::Hub(_) => StatusCode::BAD_REQUEST,
            GatewayError::Bridge(BridgeError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Bridge(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Config(_) | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            GatewayError::InvalidEvent(_) | GatewayError::Hub(_) => self.to_string(),
            GatewayError::Bridge(e) => {
                warn!(error = %e, "Backend call failed");
                "Backend request failed".to_string()
            }
            GatewayError::Config(_) | GatewayError::Io(_) => {
                error!(error = %self, "Gateway request failed");
                "Internal server error".to_string()
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
