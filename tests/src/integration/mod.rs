//! Cross-crate flows over real sockets.

pub mod harness;

mod runtime_e2e;
mod websocket_e2e;
