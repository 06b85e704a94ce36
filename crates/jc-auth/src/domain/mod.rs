//! Domain layer: configuration, errors, the key registry and session tokens.

pub mod config;
pub mod error;
pub mod keys;
pub mod token;

pub use config::{AuthConfig, ConfigError, CorsConfig, HttpLimits, KeyStoreConfig, RateLimitConfig};
pub use error::{AuthError, KeyRegistryError, MIN_KEY_LENGTH};
pub use keys::{mask_key, ApiKeyInfo, ApiKeyRegistry, MaskedKeyInfo, Quota};
pub use token::{IssuedToken, SessionClaims, TokenService};
