//! # Hub Clients
//!
//! A [`Client`] is the hub-side half of a connection: its ID plus the sending
//! end of a bounded mailbox. The [`Mailbox`] is the receiving end, held by the
//! connection's writer pump. Dropping the `Client` (which only the hub does)
//! closes the mailbox.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::events::Event;

/// Default number of events buffered per client.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Connection identifier, caller-supplied or generated.
pub type ClientId = String;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Identifies one registration of a client.
///
/// Two registrations under the same ID carry different sessions, so a stale
/// connection cannot unregister the connection that replaced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientHandle {
    id: ClientId,
    session: u64,
}

impl ClientHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session(&self) -> u64 {
        self.session
    }
}

/// Outcome of a single non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    Full,
    Closed,
}

/// Hub-side client entry.
#[derive(Debug)]
pub struct Client {
    handle: ClientHandle,
    tx: mpsc::Sender<Arc<Event>>,
}

impl Client {
    /// Create a client with the default mailbox capacity.
    pub fn new(id: impl Into<ClientId>) -> (Self, Mailbox) {
        Self::with_capacity(id, DEFAULT_MAILBOX_CAPACITY)
    }

    /// Create a client with a random UUID as its ID.
    pub fn generate(capacity: usize) -> (Self, Mailbox) {
        Self::with_capacity(uuid::Uuid::new_v4().to_string(), capacity)
    }

    /// Create a client whose mailbox holds at most `capacity` events.
    ///
    /// A capacity of zero is raised to one.
    pub fn with_capacity(id: impl Into<ClientId>, capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = ClientHandle {
            id: id.into(),
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
        };
        (Self { handle, tx }, Mailbox { rx })
    }

    pub fn id(&self) -> &str {
        &self.handle.id
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    pub(crate) fn try_deliver(&self, event: &Arc<Event>) -> Delivery {
        match self.tx.try_send(Arc::clone(event)) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Receiving end of a client's outbound queue. FIFO.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Arc<Event>>,
}

impl Mailbox {
    /// Wait for the next event. `None` once the hub has dropped the client
    /// and every buffered event has been drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True once the hub side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}
