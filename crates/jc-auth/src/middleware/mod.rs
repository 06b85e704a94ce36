//! Auth middleware chain.
//!
//! Per request: `ApiKey → RateLimit → Handler`, with `Admin` gating key
//! management routes instead. CORS and tracing wrap everything, so preflights
//! never reach auth.

pub mod admin;
pub mod api_key;
pub mod cors;
pub mod rate_limit;
pub mod tracing;

pub use admin::{constant_time_compare, is_admin, AdminLayer};
pub use api_key::{authenticate, ApiKeyLayer, AuthMethod, AuthenticatedKey};
pub use cors::create_cors_layer;
pub use rate_limit::{cleanup_task, RateLimitLayer, RateLimitState, RateLimitStatus};
pub use self::tracing::TracingLayer;
