//! # JC Gateway - Real-Time Event Gateway
//!
//! Fans assistant events out to WebSocket clients and forwards application
//! commands to the Python backend.
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/events ──┐                       ┌──► mailbox ──► writer pump ──► /ws client
//!  bridge success ────┼──► EventHub dispatch ─┼──► mailbox ──► writer pump ──► /ws client
//!  metrics producer ──┘                       └──► mailbox ──► writer pump ──► /ws client
//! ```
//!
//! ## Routes
//!
//! | Route | Auth |
//! |-------|------|
//! | `GET /health` | none |
//! | `GET /metrics` | none |
//! | `GET /ws` | API key or session token |
//! | `POST /api/events` | API key or session token |
//! | `POST /api/chat`, `/api/models/load`, `/api/plugins/toggle`, `/api/training/start`, `/api/commands` | API key or session token |
//! | `DELETE /api/commands/:name` | API key or session token |

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bridge;
pub mod domain;
pub mod producer;
pub mod service;
pub mod ws;

pub use bridge::{Bridge, BridgeClient, BridgeError};
pub use domain::{BridgeConfig, GatewayConfig, GatewayError, ProducerConfig, WebSocketConfig};
pub use producer::{Sampler, SystemMetricsProducer, SystemSnapshot, SysinfoSampler};
pub use service::{GatewayService, GatewayState};
