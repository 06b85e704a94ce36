//! # Jarvis Event Hub
//!
//! In-memory fan-out of assistant events to live WebSocket clients.
//!
//! ```text
//! ┌──────────────┐   broadcast()   ┌──────────────┐   mailbox   ┌──────────────┐
//! │  Producers   │ ──────────────► │   EventHub   │ ──────────► │   Client A   │
//! │ (bridge,     │                 │  dispatcher  │ ──────────► │   Client B   │
//! │  metrics,    │                 │  (registry   │ ──────────► │   Client C   │
//! │  /api/events)│                 │    owner)    │             └──────────────┘
//! └──────────────┘                 └──────────────┘
//! ```
//!
//! ## Delivery Guarantees
//!
//! - **Best-effort, at-most-once:** no persistence, no replay, no acks.
//! - **Per-client FIFO:** each mailbox sees events in broadcast order.
//! - **Isolation:** a slow client only loses its own events.
//! - **Non-blocking publish:** `broadcast()` never waits on consumers.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod error;
pub mod events;
pub mod hub;

pub use client::{Client, ClientHandle, ClientId, Mailbox, DEFAULT_MAILBOX_CAPACITY};
pub use error::HubError;
pub use events::{Event, EventKind, Payload};
pub use hub::{EventHub, HubConfig, HubStats};

/// Commands buffered ahead of the dispatcher before broadcasts are dropped.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1024;
