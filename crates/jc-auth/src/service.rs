//! Auth service: token issue/verify, key management and a protected probe route.
//!
//! [`AuthContext`] bundles the registry, limiter and token service so the
//! gateway can share the exact same state when both run in one process.

use crate::domain::config::{AuthConfig, HttpLimits, KeyStoreConfig, RateLimitConfig};
use crate::domain::error::{AuthError, KeyRegistryError};
use crate::domain::keys::{flush_task, mask_key, ApiKeyRegistry, MaskedKeyInfo, Quota};
use crate::domain::token::TokenService;
use crate::middleware::{
    cleanup_task, create_cors_layer, AdminLayer, ApiKeyLayer, AuthenticatedKey, RateLimitLayer,
    RateLimitState, TracingLayer,
};
use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

/// Auth state shared by the auth service and the gateway.
#[derive(Clone)]
pub struct AuthContext {
    pub registry: Arc<ApiKeyRegistry>,
    pub limiter: Arc<RateLimitState>,
    pub tokens: Arc<TokenService>,
    admin_key: Option<Arc<str>>,
}

impl AuthContext {
    pub fn new(registry: Arc<ApiKeyRegistry>, tokens: Arc<TokenService>, admin_key: Option<&str>) -> Self {
        Self {
            registry,
            limiter: Arc::new(RateLimitState::new()),
            tokens,
            admin_key: admin_key.map(Arc::from),
        }
    }

    /// Load keys and build the token service from configuration.
    pub fn from_config(config: &AuthConfig) -> Result<Self, KeyRegistryError> {
        let registry = ApiKeyRegistry::load(&config.keys, Quota::from(&config.rate_limit))?;
        let tokens = TokenService::new(&config.jwt_secret, config.token_ttl);
        Ok(Self::new(
            Arc::new(registry),
            Arc::new(tokens),
            config.admin_key.as_deref(),
        ))
    }

    /// `X-API-Key` verification.
    pub fn api_key_layer(&self) -> ApiKeyLayer {
        ApiKeyLayer::new(Arc::clone(&self.registry))
    }

    /// `X-API-Key` or session token verification, for the gateway.
    pub fn gateway_auth_layer(&self) -> ApiKeyLayer {
        self.api_key_layer()
            .with_session_tokens(Arc::clone(&self.tokens))
    }

    pub fn rate_limit_layer(&self) -> RateLimitLayer {
        RateLimitLayer::new(Arc::clone(&self.limiter))
    }

    pub fn admin_layer(&self) -> AdminLayer {
        AdminLayer::new(self.admin_key.as_deref())
    }

    /// Start limiter eviction and registry flush tickers.
    pub fn spawn_maintenance(
        &self,
        rate_limit: &RateLimitConfig,
        keys: &KeyStoreConfig,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(cleanup_task(
                Arc::clone(&self.limiter),
                rate_limit.cleanup_interval,
                rate_limit.max_idle,
            )),
            tokio::spawn(flush_task(Arc::clone(&self.registry), keys.flush_interval)),
        ]
    }
}

/// The auth HTTP service.
pub struct AuthService {
    config: AuthConfig,
    ctx: AuthContext,
}

impl AuthService {
    pub fn new(config: AuthConfig, ctx: AuthContext) -> Self {
        Self { config, ctx }
    }

    pub fn context(&self) -> &AuthContext {
        &self.ctx
    }

    /// Build the router with the full middleware stack.
    pub fn router(&self) -> Router {
        let state = self.ctx.clone();

        let admin = Router::new()
            .route("/api/auth/keys", get(list_keys))
            .route("/api/auth/keys/create", post(create_key))
            .route("/api/auth/keys/disable", post(disable_key))
            .route("/api/auth/keys/enable", post(enable_key))
            .route_layer(self.ctx.admin_layer());

        // Layers added later run first: key check, then rate limit.
        let protected = Router::new()
            .route("/api/protected/test", get(protected_test))
            .route_layer(self.ctx.rate_limit_layer())
            .route_layer(self.ctx.api_key_layer());

        let router = Router::new()
            .route("/health", get(health))
            .route("/api/auth/token", post(issue_token))
            .route("/api/auth/verify", post(verify_token))
            .merge(admin)
            .merge(protected)
            .with_state(state);

        apply_http_stack(router, &self.config.http, create_cors_layer(&self.config.cors))
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let router = self.router();
        info!(addr = %addr, keys = self.ctx.registry.len(), "Auth service listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

/// Outer HTTP stack: body limit, timeout, CORS, tracing (outermost last).
pub fn apply_http_stack(router: Router, limits: &HttpLimits, cors: tower_http::cors::CorsLayer) -> Router {
    router
        .layer(RequestBodyLimitLayer::new(limits.max_body_bytes))
        .layer(TimeoutLayer::new(limits.request_timeout))
        .layer(cors)
        .layer(TracingLayer::new())
}

/// Parse a JSON body, mapping every failure to a 400.
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, AuthError> {
    serde_json::from_slice(body).map_err(|e| AuthError::BadRequest(format!("Invalid request body: {e}")))
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Deserialize)]
struct TokenRequest {
    api_key: String,
}

async fn issue_token(State(ctx): State<AuthContext>, body: Bytes) -> Result<Response, AuthError> {
    let request: TokenRequest = parse_json(&body)?;
    let info = ctx
        .registry
        .lookup_enabled(request.api_key.trim())
        .ok_or(AuthError::InvalidApiKey)?;

    let issued = ctx.tokens.issue(&info.key)?;
    info!(key = %mask_key(&info.key), "Session token issued");
    Ok(Json(issued).into_response())
}

#[derive(Deserialize)]
struct VerifyRequest {
    token: String,
}

async fn verify_token(State(ctx): State<AuthContext>, body: Bytes) -> Result<Response, AuthError> {
    let request: VerifyRequest = parse_json(&body)?;
    let claims = ctx.tokens.verify(&request.token)?;
    Ok(Json(json!({ "valid": true, "api_key": claims.api_key })).into_response())
}

#[derive(Deserialize)]
struct CreateKeyRequest {
    key: String,
    rate_limit: Option<u32>,
    burst: Option<u32>,
}

async fn create_key(State(ctx): State<AuthContext>, body: Bytes) -> Result<Response, AuthError> {
    let request: CreateKeyRequest = parse_json(&body)?;

    // Creation may write the key file.
    let registry = Arc::clone(&ctx.registry);
    let info = tokio::task::spawn_blocking(move || {
        registry.create(&request.key, request.rate_limit, request.burst)
    })
    .await
    .map_err(|e| AuthError::Internal(e.to_string()))??;

    Ok(Json(json!({
        "success": true,
        "message": "API key created",
        "key": info.key,
    }))
    .into_response())
}

#[derive(Deserialize)]
struct KeyStateRequest {
    key: String,
}

async fn disable_key(State(ctx): State<AuthContext>, body: Bytes) -> Result<Response, AuthError> {
    set_key_state(ctx, &body, false).await
}

async fn enable_key(State(ctx): State<AuthContext>, body: Bytes) -> Result<Response, AuthError> {
    set_key_state(ctx, &body, true).await
}

async fn set_key_state(ctx: AuthContext, body: &Bytes, enabled: bool) -> Result<Response, AuthError> {
    let request: KeyStateRequest = parse_json(body)?;
    let masked = mask_key(&request.key);

    let registry = Arc::clone(&ctx.registry);
    tokio::task::spawn_blocking(move || registry.set_enabled(&request.key, enabled))
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))??;

    Ok(Json(json!({
        "success": true,
        "key": masked,
        "enabled": enabled,
    }))
    .into_response())
}

async fn list_keys(State(ctx): State<AuthContext>) -> Json<Vec<MaskedKeyInfo>> {
    Json(ctx.registry.list().iter().map(MaskedKeyInfo::from).collect())
}

async fn protected_test(Extension(auth): Extension<AuthenticatedKey>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "Access granted",
        "api_key": auth.masked(),
        "rate_limit": auth.rate_limit,
    }))
}
