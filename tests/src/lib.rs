//! # JarvisCore Test Suite
//!
//! End-to-end tests that start the real runtime on ephemeral ports and talk
//! to it over TCP.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs         # Runtime startup, WebSocket and HTTP helpers
//!     ├── websocket_e2e.rs   # Connect, publish, receive, disconnect
//!     └── runtime_e2e.rs     # Shared auth state, shutdown and persistence
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p jc-tests
//! cargo test -p jc-tests integration::websocket_e2e::
//! ```

pub mod integration;
