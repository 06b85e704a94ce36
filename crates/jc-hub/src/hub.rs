//! # Event Hub
//!
//! A single dispatch task owns the client registry. Registration,
//! unregistration and broadcasts all travel through one FIFO command queue,
//! so a client registered after a broadcast never sees that broadcast.
//!
//! ```text
//!  broadcast() ──try_send──┐
//!  register()  ──send──────┼──► [dispatch queue] ──► Dispatcher ──try_send──► Mailbox (per client)
//!  unregister() ──send─────┘                           owns registry
//! ```
//!
//! Backpressure is best-effort at-most-once: a full dispatch queue drops the
//! event for everyone, a full mailbox drops it for that client only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use jc_telemetry::metrics::{HUB_CLIENTS, HUB_DELIVERIES, HUB_EVENTS_DROPPED, HUB_EVENTS_PUBLISHED};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{Client, ClientHandle, ClientId, Delivery, DEFAULT_MAILBOX_CAPACITY};
use crate::events::Event;
use crate::DEFAULT_DISPATCH_CAPACITY;

/// Hub sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Commands (mostly broadcasts) buffered ahead of the dispatch task
    pub dispatch_capacity: usize,
    /// Default per-client mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

enum Command {
    Register {
        client: Client,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        handle: ClientHandle,
        ack: oneshot::Sender<()>,
    },
    Broadcast(Arc<Event>),
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

#[derive(Default)]
struct HubCounters {
    published: AtomicU64,
    dispatch_dropped: AtomicU64,
    mailbox_dropped: AtomicU64,
    delivered: AtomicU64,
    replaced: AtomicU64,
}

struct HubShared {
    clients: AtomicUsize,
    counters: HubCounters,
}

/// Point-in-time copy of the hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Currently registered clients
    pub clients: usize,
    /// Broadcasts accepted onto the dispatch queue
    pub published: u64,
    /// Broadcasts rejected because the dispatch queue was full or closed
    pub dispatch_dropped: u64,
    /// Per-client drops because a mailbox was full or closed
    pub mailbox_dropped: u64,
    /// Per-client successful enqueues
    pub delivered: u64,
    /// Registrations that displaced a live client with the same ID
    pub replaced: u64,
}

/// Cloneable handle to the hub.
#[derive(Clone)]
pub struct EventHub {
    tx: mpsc::Sender<Command>,
    shared: Arc<HubShared>,
    mailbox_capacity: usize,
}

impl EventHub {
    /// Start the dispatch task on the current tokio runtime.
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.dispatch_capacity.max(1));
        let shared = Arc::new(HubShared {
            clients: AtomicUsize::new(0),
            counters: HubCounters::default(),
        });

        let dispatcher = Dispatcher {
            rx,
            registry: HashMap::new(),
            shared: Arc::clone(&shared),
        };
        let task = tokio::spawn(dispatcher.run());

        info!(
            dispatch_capacity = config.dispatch_capacity,
            mailbox_capacity = config.mailbox_capacity,
            "Event hub started"
        );

        (
            Self {
                tx,
                shared,
                mailbox_capacity: config.mailbox_capacity,
            },
            task,
        )
    }

    /// Mailbox capacity for clients created by this hub's owner.
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }

    /// Add a client to the registry.
    ///
    /// Returns once the registration has been applied. If a live client with
    /// the same ID exists it is replaced and its mailbox closed. If the hub has
    /// shut down the client is dropped, which closes its mailbox.
    pub async fn register(&self, client: Client) {
        let id = client.id().to_string();
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Register { client, ack }).await.is_err() {
            warn!(client_id = %id, "Hub is shut down, registration ignored");
            return;
        }
        let _ = done.await;
    }

    /// Remove a client. Unknown or already-removed clients are a no-op.
    pub async fn unregister(&self, handle: &ClientHandle) {
        let (ack, done) = oneshot::channel();
        let cmd = Command::Unregister {
            handle: handle.clone(),
            ack,
        };
        if self.tx.send(cmd).await.is_err() {
            debug!(client_id = %handle.id(), "Hub is shut down, nothing to unregister");
            return;
        }
        let _ = done.await;
    }

    /// Queue an event for every registered client without waiting.
    ///
    /// Returns `false` when the event was dropped because the dispatch queue
    /// was full or the hub has shut down. Drops are counted and logged, never
    /// raised as errors.
    pub fn broadcast(&self, event: Event) -> bool {
        let kind = event.kind();
        match self.tx.try_send(Command::Broadcast(Arc::new(event))) {
            Ok(()) => {
                self.shared.counters.published.fetch_add(1, Ordering::Relaxed);
                HUB_EVENTS_PUBLISHED.with_label_values(&[kind.as_str()]).inc();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.shared
                    .counters
                    .dispatch_dropped
                    .fetch_add(1, Ordering::Relaxed);
                HUB_EVENTS_DROPPED
                    .with_label_values(&["dispatch_queue_full"])
                    .inc();
                warn!(event_type = %kind, "Dispatch queue full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.shared
                    .counters
                    .dispatch_dropped
                    .fetch_add(1, Ordering::Relaxed);
                HUB_EVENTS_DROPPED.with_label_values(&["hub_closed"]).inc();
                debug!(event_type = %kind, "Hub is shut down, event dropped");
                false
            }
        }
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.shared.clients.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> HubStats {
        let c = &self.shared.counters;
        HubStats {
            clients: self.client_count(),
            published: c.published.load(Ordering::Relaxed),
            dispatch_dropped: c.dispatch_dropped.load(Ordering::Relaxed),
            mailbox_dropped: c.mailbox_dropped.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            replaced: c.replaced.load(Ordering::Relaxed),
        }
    }

    /// Close every mailbox and stop the dispatch task.
    ///
    /// Commands queued before the shutdown are still processed.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown { ack }).await.is_ok() {
            let _ = done.await;
        }
    }
}

struct Dispatcher {
    rx: mpsc::Receiver<Command>,
    registry: HashMap<ClientId, Client>,
    shared: Arc<HubShared>,
}

impl Dispatcher {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Register { client, ack } => {
                    self.register(client);
                    let _ = ack.send(());
                }
                Command::Unregister { handle, ack } => {
                    self.unregister(&handle);
                    let _ = ack.send(());
                }
                Command::Broadcast(event) => self.dispatch(&event),
                Command::Shutdown { ack } => {
                    self.close_all();
                    let _ = ack.send(());
                    info!("Event hub shut down");
                    return;
                }
            }
        }

        // Every handle dropped.
        self.close_all();
        debug!("Event hub dispatch loop exited");
    }

    fn register(&mut self, client: Client) {
        let id = client.id().to_string();
        let session = client.handle().session();
        if let Some(previous) = self.registry.insert(id.clone(), client) {
            // Dropping the previous entry closes its mailbox.
            self.shared.counters.replaced.fetch_add(1, Ordering::Relaxed);
            warn!(
                client_id = %id,
                old_session = previous.handle().session(),
                new_session = session,
                "Duplicate client ID, previous connection displaced"
            );
        } else {
            debug!(client_id = %id, session, "Client registered");
        }
        self.publish_count();
    }

    fn unregister(&mut self, handle: &ClientHandle) {
        let matches = self
            .registry
            .get(handle.id())
            .is_some_and(|c| c.handle() == handle);
        if matches {
            self.registry.remove(handle.id());
            debug!(client_id = %handle.id(), "Client unregistered");
            self.publish_count();
        }
    }

    fn dispatch(&mut self, event: &Arc<Event>) {
        let counters = &self.shared.counters;
        let mut closed: Vec<ClientId> = Vec::new();

        for (id, client) in &self.registry {
            match client.try_deliver(event) {
                Delivery::Delivered => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    HUB_DELIVERIES.inc();
                }
                Delivery::Full => {
                    counters.mailbox_dropped.fetch_add(1, Ordering::Relaxed);
                    HUB_EVENTS_DROPPED.with_label_values(&["mailbox_full"]).inc();
                    debug!(client_id = %id, event_type = %event.kind(), "Mailbox full, event dropped for client");
                }
                Delivery::Closed => {
                    counters.mailbox_dropped.fetch_add(1, Ordering::Relaxed);
                    HUB_EVENTS_DROPPED.with_label_values(&["mailbox_closed"]).inc();
                    closed.push(id.clone());
                }
            }
        }

        if !closed.is_empty() {
            for id in &closed {
                self.registry.remove(id);
                debug!(client_id = %id, "Pruned client with closed mailbox");
            }
            self.publish_count();
        }
    }

    fn close_all(&mut self) {
        let count = self.registry.len();
        self.registry.clear();
        self.publish_count();
        if count > 0 {
            info!(clients = count, "Closed all client mailboxes");
        }
    }

    fn publish_count(&self) {
        let count = self.registry.len();
        let previous = self.shared.clients.swap(count, Ordering::Release);
        HUB_CLIENTS.add(count as i64 - previous as i64);
    }
}
