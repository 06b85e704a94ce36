//! Gateway configuration with validation.

use jc_auth::domain::config::{parse_addr, parse_env_duration};
use jc_auth::{ConfigError, CorsConfig, HttpLimits};
use jc_hub::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Environment variable names read by the gateway.
pub mod env {
    pub const GATEWAY_ADDR: &str = "JC_GATEWAY_ADDR";
    pub const BACKEND_URL: &str = "JC_BACKEND_URL";
    pub const METRICS_INTERVAL: &str = "JC_METRICS_INTERVAL";
    pub use jc_auth::domain::config::env::CORS_ORIGINS;
}

/// Default gateway port.
pub const DEFAULT_GATEWAY_PORT: u16 = 8765;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address for `/ws`, `/api/events`, `/health` and `/metrics`
    pub listen_addr: SocketAddr,
    /// WebSocket configuration
    pub websocket: WebSocketConfig,
    /// Event hub sizing
    pub hub: HubConfig,
    /// System metrics producer
    pub producer: ProducerConfig,
    /// Python backend bridge
    pub bridge: BridgeConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// HTTP limits
    pub http: HttpLimits,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_GATEWAY_PORT)),
            websocket: WebSocketConfig::default(),
            hub: HubConfig::default(),
            producer: ProducerConfig::default(),
            bridge: BridgeConfig::default(),
            cors: CorsConfig::default(),
            http: HttpLimits::default(),
        }
    }
}

impl GatewayConfig {
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

        if let Some(addr) = lookup(env::GATEWAY_ADDR) {
            config.listen_addr = parse_addr(env::GATEWAY_ADDR, &addr)?;
        }
        if let Some(url) = lookup(env::BACKEND_URL) {
            config.bridge.backend_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(interval) = lookup(env::METRICS_INTERVAL) {
            config.producer.interval = parse_env_duration(env::METRICS_INTERVAL, &interval)?;
        }
        if let Some(origins) = lookup(env::CORS_ORIGINS) {
            config.cors = CorsConfig::from_origin_list(&origins);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.websocket.max_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "websocket.max_message_size cannot be 0".into(),
            ));
        }
        if self.websocket.ping_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "websocket.ping_interval cannot be 0".into(),
            ));
        }
        if self.hub.dispatch_capacity == 0 || self.hub.mailbox_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "hub capacities cannot be 0".into(),
            ));
        }
        if self.producer.enabled && self.producer.interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "metrics interval cannot be 0".into(),
            ));
        }
        if !self.bridge.backend_url.starts_with("http://")
            && !self.bridge.backend_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "backend URL must be http(s): {}",
                self.bridge.backend_url
            )));
        }
        self.http.validate()
    }
}

/// WebSocket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
    /// Keep-alive ping interval
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// System metrics producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub enabled: bool,
    /// Sampling period
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(2),
        }
    }
}

/// Backend bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the Python backend
    pub backend_url: String,
    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:5000".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(2),
        }
    }
}
