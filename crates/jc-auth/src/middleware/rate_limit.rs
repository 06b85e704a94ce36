//! Per-API-key rate limiting using token buckets.
//!
//! Each key gets one bucket refilled at `rate_limit / 60` tokens per second
//! with capacity `burst`. Buckets are created lazily and evicted after a
//! period of inactivity by [`cleanup_task`].

use crate::domain::error::AuthError;
use crate::middleware::api_key::AuthenticatedKey;
use axum::{
    body::Body,
    http::{HeaderValue, Request},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use jc_telemetry::metrics::{AUTH_REJECTIONS, RATE_LIMITED};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::{Layer, Service};
use tracing::{debug, warn};

type KeyLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;

/// Token bucket entry for one API key
struct TokenBucket {
    limiter: KeyLimiter,
    rate_limit: u32,
    burst: u32,
    last_access: Instant,
}

impl TokenBucket {
    fn new(rate_limit: u32, burst: u32) -> Self {
        let per_minute = NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN);
        let burst_size = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst_size);

        Self {
            limiter: RateLimiter::direct(quota).with_middleware::<StateInformationMiddleware>(),
            rate_limit,
            burst,
            last_access: Instant::now(),
        }
    }

    fn check(&mut self) -> Result<RateLimitStatus, RateLimitExceeded> {
        self.last_access = Instant::now();
        match self.limiter.check() {
            Ok(snapshot) => Ok(RateLimitStatus {
                limit: self.rate_limit,
                remaining: snapshot.remaining_burst_capacity(),
            }),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(RateLimitExceeded {
                    limit: self.rate_limit,
                    retry_after: wait,
                })
            }
        }
    }
}

/// Outcome of an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Quota in requests per minute
    pub limit: u32,
    /// Tokens left in the bucket
    pub remaining: u32,
}

/// Outcome of a throttled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Retry delay rounded up to whole seconds, never below one.
    pub fn retry_after_secs(&self) -> u64 {
        let millis = self.retry_after.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }
}

impl From<RateLimitExceeded> for AuthError {
    fn from(e: RateLimitExceeded) -> Self {
        AuthError::RateLimited {
            limit: e.limit,
            retry_after_secs: e.retry_after_secs(),
        }
    }
}

/// Rate limiter state shared across requests
#[derive(Default)]
pub struct RateLimitState {
    /// Per-key token buckets
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token from the key's bucket, creating it on first use.
    ///
    /// A bucket whose quota no longer matches the key's is rebuilt.
    pub fn check(&self, key: &str, rate_limit: u32, burst: u32) -> Result<RateLimitStatus, RateLimitExceeded> {
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| {
            debug!(rate_limit, burst, "Creating rate limit bucket");
            TokenBucket::new(rate_limit, burst)
        });

        if bucket.rate_limit != rate_limit || bucket.burst != burst {
            debug!(rate_limit, burst, "Quota changed, rebuilding rate limit bucket");
            *bucket = TokenBucket::new(rate_limit, burst);
        }

        bucket.check()
    }

    /// Drop buckets idle for longer than `max_age`.
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_access) <= max_age);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "Evicted idle rate limit buckets");
        }
    }

    /// Get number of tracked keys
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Rate limit layer. Must run after [`ApiKeyLayer`](crate::middleware::ApiKeyLayer),
/// which supplies the key and its quota.
#[derive(Clone)]
pub struct RateLimitLayer {
    state: Arc<RateLimitState>,
}

impl RateLimitLayer {
    pub fn new(state: Arc<RateLimitState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<RateLimitState> {
        Arc::clone(&self.state)
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

/// Rate limit service
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: Arc<RateLimitState>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = Arc::clone(&self.state);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(auth) = req.extensions().get::<AuthenticatedKey>().cloned() else {
                AUTH_REJECTIONS.with_label_values(&["missing_key"]).inc();
                return Ok(AuthError::MissingApiKey.into_response());
            };

            match state.check(&auth.key, auth.rate_limit, auth.burst) {
                Ok(status) => {
                    let mut response = inner.call(req).await?;
                    let headers = response.headers_mut();
                    headers.insert("X-RateLimit-Limit", HeaderValue::from(status.limit));
                    headers.insert("X-RateLimit-Remaining", HeaderValue::from(status.remaining));
                    Ok(response)
                }
                Err(exceeded) => {
                    RATE_LIMITED.inc();
                    warn!(
                        key = %auth.masked(),
                        retry_after_ms = exceeded.retry_after.as_millis() as u64,
                        "Rate limit exceeded"
                    );
                    Ok(AuthError::from(exceeded).into_response())
                }
            }
        })
    }
}

/// Background task to clean up idle rate limit buckets
pub async fn cleanup_task(state: Arc<RateLimitState>, interval: Duration, max_age: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        state.cleanup(max_age);
    }
}
