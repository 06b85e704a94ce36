//! Auth error types and their HTTP mapping.
//!
//! Every rejection in the auth chain becomes a JSON body of the form
//! `{"error": "<message>"}`. Internal details are logged, never returned.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Minimum accepted length for a newly created API key.
pub const MIN_KEY_LENGTH: usize = 16;

/// Errors raised by the API key registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyRegistryError {
    #[error("API key must be at least {min} characters, got {len}")]
    KeyTooShort { min: usize, len: usize },

    #[error("API key already exists")]
    DuplicateKey,

    #[error("invalid quota: {0}")]
    InvalidQuota(String),

    #[error("API key not found")]
    NotFound,

    #[error("no API keys configured")]
    NoKeys,

    #[error("failed to parse API keys: {0}")]
    Parse(String),

    #[error("key store I/O error: {0}")]
    Io(String),
}

/// Errors surfaced by the auth middleware chain and auth service handlers.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No `X-API-Key` header (and no session token in gateway mode)
    #[error("API key required")]
    MissingApiKey,

    /// Key unknown or disabled
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Session token failed verification or names an unusable key
    #[error("Invalid token")]
    InvalidToken,

    /// Admin credential missing, wrong, or not configured
    #[error("Admin access required")]
    AdminRequired,

    /// Per-key token bucket exhausted
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Quota in requests per minute
        limit: u32,
        /// Whole seconds until a token is available (at least 1)
        retry_after_secs: u64,
    },

    /// Malformed request body
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Registry(#[from] KeyRegistryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingApiKey | AuthError::InvalidApiKey | AuthError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::AdminRequired => StatusCode::FORBIDDEN,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Registry(e) => match e {
                KeyRegistryError::KeyTooShort { .. }
                | KeyRegistryError::InvalidQuota(_)
                | KeyRegistryError::Parse(_) => StatusCode::BAD_REQUEST,
                KeyRegistryError::DuplicateKey => StatusCode::CONFLICT,
                KeyRegistryError::NotFound => StatusCode::NOT_FOUND,
                KeyRegistryError::NoKeys | KeyRegistryError::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingApiKey => "missing_key",
            AuthError::InvalidApiKey => "invalid_key",
            AuthError::InvalidToken => "invalid_token",
            AuthError::AdminRequired => "admin_required",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::BadRequest(_) => "bad_request",
            AuthError::Registry(_) => "registry",
            AuthError::Internal(_) => "internal",
        }
    }

    fn public_message(&self) -> String {
        match self {
            AuthError::Registry(KeyRegistryError::Io(_) | KeyRegistryError::NoKeys)
            | AuthError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Auth request failed");
        }

        let mut response = (status, Json(json!({ "error": self.public_message() }))).into_response();

        if let AuthError::RateLimited {
            limit,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs.max(1)));
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        }

        response
    }
}
