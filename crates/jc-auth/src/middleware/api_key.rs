//! API key verification middleware.
//!
//! Reads `X-API-Key` and resolves it against the registry. In gateway mode a
//! session token (query `token` or `Authorization: Bearer`) is accepted when
//! the header is absent; the key embedded in the token must still resolve to
//! an enabled registry key so its quota applies.

use crate::domain::error::AuthError;
use crate::domain::keys::{mask_key, ApiKeyInfo, ApiKeyRegistry};
use crate::domain::token::TokenService;
use axum::{
    body::Body,
    extract::Query,
    http::Request,
    response::{IntoResponse, Response},
};
use jc_telemetry::metrics::AUTH_REJECTIONS;
use serde::Deserialize;
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// How the caller proved possession of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    SessionToken,
}

/// Attached to request extensions once the key is verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedKey {
    pub key: String,
    pub rate_limit: u32,
    pub burst: u32,
    pub method: AuthMethod,
}

impl AuthenticatedKey {
    fn new(info: &ApiKeyInfo, method: AuthMethod) -> Self {
        Self {
            key: info.key.clone(),
            rate_limit: info.rate_limit,
            burst: info.burst,
            method,
        }
    }

    pub fn masked(&self) -> String {
        mask_key(&self.key)
    }
}

/// API key verification layer
#[derive(Clone)]
pub struct ApiKeyLayer {
    registry: Arc<ApiKeyRegistry>,
    tokens: Option<Arc<TokenService>>,
}

impl ApiKeyLayer {
    /// Accept `X-API-Key` only.
    pub fn new(registry: Arc<ApiKeyRegistry>) -> Self {
        Self {
            registry,
            tokens: None,
        }
    }

    /// Also accept session tokens when the key header is absent.
    #[must_use]
    pub fn with_session_tokens(mut self, tokens: Arc<TokenService>) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

impl<S> Layer<S> for ApiKeyLayer {
    type Service = ApiKeyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyService {
            inner,
            registry: Arc::clone(&self.registry),
            tokens: self.tokens.clone(),
        }
    }
}

/// API key verification service
#[derive(Clone)]
pub struct ApiKeyService<S> {
    inner: S,
    registry: Arc<ApiKeyRegistry>,
    tokens: Option<Arc<TokenService>>,
}

impl<S> Service<Request<Body>> for ApiKeyService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let registry = Arc::clone(&self.registry);
        let tokens = self.tokens.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match authenticate(&req, &registry, tokens.as_deref()) {
                Ok(auth) => {
                    debug!(key = %auth.masked(), method = ?auth.method, "API key verified");

                    let touched = Arc::clone(&registry);
                    let key = auth.key.clone();
                    tokio::task::spawn_blocking(move || touched.touch(&key));

                    req.extensions_mut().insert(auth);
                    inner.call(req).await
                }
                Err(e) => {
                    AUTH_REJECTIONS.with_label_values(&[e.reason()]).inc();
                    warn!(path = %req.uri().path(), reason = e.reason(), "Request rejected");
                    Ok(e.into_response())
                }
            }
        })
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Resolve the caller's key from headers, or from a session token when allowed.
pub fn authenticate<B>(
    req: &Request<B>,
    registry: &ApiKeyRegistry,
    tokens: Option<&TokenService>,
) -> Result<AuthenticatedKey, AuthError> {
    if let Some(value) = req.headers().get(API_KEY_HEADER) {
        let key = value.to_str().map_err(|_| AuthError::InvalidApiKey)?;
        let info = registry
            .lookup_enabled(key.trim())
            .ok_or(AuthError::InvalidApiKey)?;
        return Ok(AuthenticatedKey::new(&info, AuthMethod::ApiKey));
    }

    let Some(tokens) = tokens else {
        return Err(AuthError::MissingApiKey);
    };
    let Some(token) = session_token(req) else {
        return Err(AuthError::MissingApiKey);
    };

    let claims = tokens.verify(&token)?;
    let info = registry
        .lookup_enabled(&claims.api_key)
        .ok_or(AuthError::InvalidToken)?;
    Ok(AuthenticatedKey::new(&info, AuthMethod::SessionToken))
}

/// Session token from `?token=` or `Authorization: Bearer`.
fn session_token<B>(req: &Request<B>) -> Option<String> {
    if let Ok(Query(query)) = Query::<TokenQuery>::try_from_uri(req.uri()) {
        if let Some(token) = query.token.filter(|t| !t.is_empty()) {
            return Some(token);
        }
    }

    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
