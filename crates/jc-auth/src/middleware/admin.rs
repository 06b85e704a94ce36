//! Admin gating for key management routes.
//!
//! Accepts `X-Admin-Key` or `Authorization: Bearer` equal to the configured
//! admin secret. With no secret configured every request is refused.

use crate::domain::error::AuthError;
use axum::{
    body::Body,
    http::{header, Request},
    response::{IntoResponse, Response},
};
use jc_telemetry::metrics::AUTH_REJECTIONS;
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::warn;

/// Header carrying the admin credential.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Admin gating layer
#[derive(Clone)]
pub struct AdminLayer {
    admin_key: Option<Arc<str>>,
}

impl AdminLayer {
    pub fn new(admin_key: Option<&str>) -> Self {
        Self {
            admin_key: admin_key.map(Arc::from),
        }
    }
}

impl<S> Layer<S> for AdminLayer {
    type Service = AdminService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdminService {
            inner,
            admin_key: self.admin_key.clone(),
        }
    }
}

/// Admin gating service
#[derive(Clone)]
pub struct AdminService<S> {
    inner: S,
    admin_key: Option<Arc<str>>,
}

impl<S> Service<Request<Body>> for AdminService<S>
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
        let admin_key = self.admin_key.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if is_admin(&req, admin_key.as_deref()) {
                return inner.call(req).await;
            }

            AUTH_REJECTIONS.with_label_values(&["admin_required"]).inc();
            warn!(path = %req.uri().path(), "Admin access denied");
            Ok(AuthError::AdminRequired.into_response())
        })
    }
}

/// Check the admin credential from request headers
pub fn is_admin<B>(req: &Request<B>, admin_key: Option<&str>) -> bool {
    let Some(expected) = admin_key else {
        return false;
    };

    let presented = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    presented.is_some_and(|candidate| constant_time_compare(candidate.trim(), expected))
}

/// Constant-time string comparison to prevent timing attacks
///
/// Both inputs are padded to the longer length with different fill bytes,
/// so neither content nor length leaks through timing.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = std::cmp::max(a.len(), b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];

    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}
