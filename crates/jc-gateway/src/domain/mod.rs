//! Gateway configuration and errors.

pub mod config;
pub mod error;

pub use config::{BridgeConfig, GatewayConfig, ProducerConfig, WebSocketConfig};
pub use error::GatewayError;
