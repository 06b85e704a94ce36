//! # JC Auth - API Key Authentication and Rate Limiting
//!
//! Guards the JarvisCore HTTP surfaces with API keys, per-key token buckets,
//! HS256 session tokens and an admin credential for key management.
//!
//! ## Request Lifecycle
//!
//! ```text
//! Unauthenticated ──X-API-Key──► KeyVerified ──bucket──► RateLimitChecked ──► Admitted
//!        │                            │                         │
//!        └── 401 API key required     └── 401 Invalid API key   └── 429 Rate limit exceeded
//! ```
//!
//! ## Routes
//!
//! | Route | Auth |
//! |-------|------|
//! | `GET /health` | none |
//! | `POST /api/auth/token` | key in body |
//! | `POST /api/auth/verify` | token in body |
//! | `POST /api/auth/keys/create` | admin |
//! | `POST /api/auth/keys/disable`, `/enable` | admin |
//! | `GET /api/auth/keys` | admin |
//! | `GET /api/protected/test` | API key + rate limit |

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod domain;
pub mod middleware;
pub mod service;

pub use domain::{
    mask_key, ApiKeyInfo, ApiKeyRegistry, AuthConfig, AuthError, ConfigError, CorsConfig,
    HttpLimits, KeyRegistryError, KeyStoreConfig, MaskedKeyInfo, Quota, RateLimitConfig,
    SessionClaims, TokenService,
};
pub use middleware::{AuthMethod, AuthenticatedKey, RateLimitState};
pub use service::{apply_http_stack, parse_json, AuthContext, AuthService};
