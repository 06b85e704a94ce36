//! Per-connection WebSocket pumps.
//!
//! Each upgraded socket runs two tasks:
//! - the writer drains the hub mailbox onto the wire and sends keep-alive pings
//! - the reader consumes inbound frames until the peer closes
//!
//! Whichever pump finishes first aborts the other; the connection then
//! unregisters from the hub with its own [`ClientHandle`].

use crate::domain::config::WebSocketConfig;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use jc_hub::{Client, ClientHandle, EventHub, Mailbox};
use jc_telemetry::metrics::WS_CONNECTIONS;
use std::borrow::Cow;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Why a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Hub closed the mailbox (shutdown or replaced registration)
    MailboxClosed,
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Socket send or receive failed
    TransportError,
}

/// One authenticated WebSocket connection bound to a hub client.
pub struct Connection {
    hub: EventHub,
    client: Client,
    mailbox: Mailbox,
    config: WebSocketConfig,
}

impl Connection {
    pub fn new(hub: EventHub, client: Client, mailbox: Mailbox, config: WebSocketConfig) -> Self {
        Self {
            hub,
            client,
            mailbox,
            config,
        }
    }

    /// Register with the hub, run both pumps, then unregister.
    pub async fn run(self, socket: WebSocket) {
        let Connection {
            hub,
            client,
            mailbox,
            config,
        } = self;

        let handle = client.handle().clone();
        hub.register(client).await;
        WS_CONNECTIONS.inc();
        info!(client_id = %handle.id(), session = handle.session(), "WebSocket client connected");

        let (sink, stream) = socket.split();
        let mut writer = tokio::spawn(write_pump(sink, mailbox, config.ping_interval, handle.clone()));
        let mut reader = tokio::spawn(read_pump(stream, handle.clone()));

        let exit = tokio::select! {
            res = &mut writer => {
                reader.abort();
                res.unwrap_or(PumpExit::TransportError)
            }
            res = &mut reader => {
                writer.abort();
                res.unwrap_or(PumpExit::TransportError)
            }
        };

        hub.unregister(&handle).await;
        info!(client_id = %handle.id(), exit = ?exit, "WebSocket client disconnected");
    }
}

/// Drain the mailbox onto the socket, pinging on a fixed interval.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: Mailbox,
    ping_interval: Duration,
    handle: ClientHandle,
) -> PumpExit {
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately.
    ping.tick().await;

    loop {
        tokio::select! {
            event = mailbox.recv() => {
                let Some(event) = event else {
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: Cow::Borrowed("server closing"),
                    }));
                    let _ = sink.send(close).await;
                    return PumpExit::MailboxClosed;
                };

                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(client_id = %handle.id(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    warn!(client_id = %handle.id(), error = %e, "WebSocket write failed");
                    return PumpExit::TransportError;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    warn!(client_id = %handle.id(), error = %e, "WebSocket ping failed");
                    return PumpExit::TransportError;
                }
            }
        }
    }
}

/// Consume inbound frames. Clients have nothing to say on this channel.
async fn read_pump(mut stream: SplitStream<WebSocket>, handle: ClientHandle) -> PumpExit {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(frame)) => {
                debug!(client_id = %handle.id(), frame = ?frame, "Peer sent close");
                return PumpExit::PeerClosed;
            }
            Ok(Message::Pong(_)) | Ok(Message::Ping(_)) => {}
            Ok(Message::Text(text)) => {
                debug!(client_id = %handle.id(), len = text.len(), "Ignoring client text frame");
            }
            Ok(Message::Binary(data)) => {
                debug!(client_id = %handle.id(), len = data.len(), "Ignoring client binary frame");
            }
            Err(e) => {
                warn!(client_id = %handle.id(), error = %e, "WebSocket read failed");
                return PumpExit::TransportError;
            }
        }
    }
    PumpExit::PeerClosed
}
