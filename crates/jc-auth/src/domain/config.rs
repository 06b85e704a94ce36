//! Auth service configuration with validation.
//!
//! Defaults are suitable for a single local assistant install; every field
//! can be overridden from `JC_*` environment variables.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Environment variable names shared by the services.
pub mod env {
    pub const AUTH_ADDR: &str = "JC_AUTH_ADDR";
    pub const JWT_SECRET: &str = "JC_JWT_SECRET";
    pub const ADMIN_KEY: &str = "JC_ADMIN_KEY";
    pub const CORS_ORIGINS: &str = "JC_CORS_ORIGINS";
    pub const API_KEYS: &str = "JC_API_KEYS";
    pub const API_KEYS_FILE: &str = "JC_API_KEYS_FILE";
}

/// Default auth service port.
pub const DEFAULT_AUTH_PORT: u16 = 8766;

/// Main auth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Listen address for the auth HTTP service
    pub listen_addr: SocketAddr,
    /// HS256 signing secret for session tokens (required)
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    /// Session token lifetime
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
    /// Admin credential for key management (None disables admin routes)
    #[serde(skip_serializing)]
    pub admin_key: Option<String>,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Per-key rate limiting
    pub rate_limit: RateLimitConfig,
    /// API key source and persistence
    pub keys: KeyStoreConfig,
    /// HTTP limits
    pub http: HttpLimits,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_AUTH_PORT)),
            jwt_secret: String::new(),
            token_ttl: Duration::from_secs(86_400),
            admin_key: None,
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            keys: KeyStoreConfig::default(),
            http: HttpLimits::default(),
        }
    }
}

impl AuthConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(env::AUTH_ADDR) {
            config.listen_addr = parse_addr(env::AUTH_ADDR, &addr)?;
        }
        if let Some(secret) = lookup(env::JWT_SECRET) {
            config.jwt_secret = secret;
        }
        config.admin_key = lookup(env::ADMIN_KEY).filter(|k| !k.trim().is_empty());
        if let Some(origins) = lookup(env::CORS_ORIGINS) {
            config.cors = CorsConfig::from_origin_list(&origins);
        }
        config.keys.inline = lookup(env::API_KEYS).filter(|k| !k.trim().is_empty());
        if let Some(path) = lookup(env::API_KEYS_FILE) {
            config.keys.file = PathBuf::from(path);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.token_ttl.is_zero() {
            return Err(ConfigError::Invalid("token_ttl cannot be 0".into()));
        }
        self.rate_limit.validate()?;
        self.keys.validate()?;
        self.http.validate()?;
        Ok(())
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
    /// Preflight cache lifetime
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            max_age: Duration::from_secs(3600),
        }
    }
}

impl CorsConfig {
    /// Parse a comma-separated origin list. Empty input means `*`.
    pub fn from_origin_list(list: &str) -> Self {
        let origins: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            allowed_origins: if origins.is_empty() {
                vec!["*".to_string()]
            } else {
                origins
            },
            ..Self::default()
        }
    }

    pub fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

/// Per-key rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per minute for keys supplied without a quota
    pub default_rate_limit: u32,
    /// Bucket capacity for keys supplied without a quota
    pub default_burst: u32,
    /// How often idle limiters are swept
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Limiters idle longer than this are evicted
    #[serde(with = "humantime_serde")]
    pub max_idle: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rate_limit: 60,
            default_burst: 10,
            cleanup_interval: Duration::from_secs(60),
            max_idle: Duration::from_secs(3600),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_rate_limit == 0 || self.default_burst == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "default rate limit and burst must be positive".into(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidRateLimit(
                "cleanup_interval cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// API key source and persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Inline key list (JSON array or comma-separated); takes priority over the file
    #[serde(skip_serializing)]
    pub inline: Option<String>,
    /// JSON key file, also the persistence target when keys come from it
    pub file: PathBuf,
    /// Minimum spacing between persisted writes
    #[serde(with = "humantime_serde")]
    pub persist_interval: Duration,
    /// How often the flush ticker checks for pending changes
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            inline: None,
            file: PathBuf::from("api_keys.json"),
            persist_interval: Duration::from_secs(30),
            flush_interval: Duration::from_secs(5),
        }
    }
}

impl KeyStoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "keys.flush_interval cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpLimits {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl HttpLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout cannot be 0".into(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidLimit("max_body_bytes cannot be 0".into()));
        }
        Ok(())
    }
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Session-token secret not provided
    #[error("JC_JWT_SECRET must be set")]
    MissingSecret,
    /// Unparseable listen address
    #[error("invalid address in {var}: {value}")]
    InvalidAddress { var: String, value: String },
    /// Unparseable duration
    #[error("invalid duration in {var}: {value}")]
    InvalidDuration { var: String, value: String },
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parse a `host:port` socket address from an environment value.
pub fn parse_addr(var: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress {
            var: var.to_string(),
            value: value.to_string(),
        })
}

/// Parse a human-readable duration (`2s`, `500ms`, `1m 30s`) from an
/// environment value.
pub fn parse_env_duration(var: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|_| ConfigError::InvalidDuration {
        var: var.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_default_config_requires_secret() {
        assert_eq!(AuthConfig::default().validate(), Err(ConfigError::MissingSecret));
        assert_eq!(
            AuthConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingSecret
        );
    }

    #[test]
    fn test_env_overlay() {
        let config = AuthConfig::from_lookup(lookup(&[
            (env::JWT_SECRET, "s3cret"),
            (env::AUTH_ADDR, "0.0.0.0:9000"),
            (env::ADMIN_KEY, "admin-key"),
            (env::CORS_ORIGINS, "http://localhost:3000, https://app.example"),
            (env::API_KEYS, "key-one,key-two"),
            (env::API_KEYS_FILE, "/tmp/keys.json"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.admin_key.as_deref(), Some("admin-key"));
        assert_eq!(
            config.cors.allowed_origins,
            vec!["http://localhost:3000", "https://app.example"]
        );
        assert!(!config.cors.allows_any());
        assert_eq!(config.keys.inline.as_deref(), Some("key-one,key-two"));
        assert_eq!(config.keys.file, PathBuf::from("/tmp/keys.json"));
    }

    #[test]
    fn test_blank_admin_key_is_unset() {
        let config =
            AuthConfig::from_lookup(lookup(&[(env::JWT_SECRET, "x"), (env::ADMIN_KEY, "  ")]))
                .unwrap();
        assert!(config.admin_key.is_none());
    }

    #[test]
    fn test_bad_address_rejected() {
        let err = AuthConfig::from_lookup(lookup(&[
            (env::JWT_SECRET, "x"),
            (env::AUTH_ADDR, "localhost"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
    }

    #[test]
    fn test_zero_quota_rejected() {
        let mut config = AuthConfig {
            jwt_secret: "x".into(),
            ..AuthConfig::default()
        };
        config.rate_limit.default_burst = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRateLimit(_))
        ));
    }

    #[test]
    fn test_cors_wildcard_default() {
        assert!(CorsConfig::default().allows_any());
        assert!(CorsConfig::from_origin_list("").allows_any());
        assert!(CorsConfig::from_origin_list("*").allows_any());
    }

    #[test]
    fn test_parse_env_duration() {
        assert_eq!(parse_env_duration("X", "2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_env_duration("X", " 500ms ").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_env_duration("X", "1m 30s").unwrap(), Duration::from_secs(90));
        assert!(matches!(
            parse_env_duration("X", "fast"),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_overflowing_duration_is_an_error() {
        let err = parse_env_duration("JC_METRICS_INTERVAL", "400000000000000000m").unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidDuration {
                var: "JC_METRICS_INTERVAL".into(),
                value: "400000000000000000m".into(),
            }
        );
    }

    #[test]
    fn test_durations_deserialize_from_human_strings() {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "jwt_secret": "x",
            "token_ttl": "12h",
            "rate_limit": { "cleanup_interval": "90s" },
            "keys": { "persist_interval": "1m" },
        }))
        .unwrap();

        assert_eq!(config.token_ttl, Duration::from_secs(12 * 3600));
        assert_eq!(config.rate_limit.cleanup_interval, Duration::from_secs(90));
        assert_eq!(config.keys.persist_interval, Duration::from_secs(60));
        assert_eq!(config.http.request_timeout, Duration::from_secs(30));
    }
}
