//! Connection handles.
//!
//! A handle is the only way the core talks to a live connection. The
//! transport side owns the receiving half of the channel and turns
//! [`Outgoing`] items into frames on the socket.

use murmur_protocol::OutboundEvent;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// Work item for a connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Deliver an event to the client.
    Event(OutboundEvent),
    /// Send a liveness ping.
    Ping,
    /// Terminate the connection.
    Close,
}

/// Failure to hand an item to a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The connection's writer has gone away.
    #[error("Connection {0} closed")]
    ConnectionClosed(ConnectionId),
}

/// Cloneable, comparable handle to a live connection.
///
/// Two handles are equal when they refer to the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
    alive: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: ConnectionId::generate(),
            tx,
            alive: Arc::new(AtomicBool::new(true)),
        };
        (handle, rx)
    }

    /// Get the connection's identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the writer side is still accepting items.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue an event for the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's writer has been dropped.
    pub fn send(&self, event: OutboundEvent) -> Result<(), SendError> {
        self.push(Outgoing::Event(event))
    }

    /// Queue a liveness ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's writer has been dropped.
    pub fn ping(&self) -> Result<(), SendError> {
        self.push(Outgoing::Ping)
    }

    /// Ask the writer to terminate the connection.
    pub fn close(&self) {
        // A dropped writer is already closed.
        let _ = self.push(Outgoing::Close);
    }

    /// Record a liveness acknowledgment.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Clear the alive flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Current alive flag.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn push(&self, item: Outgoing) -> Result<(), SendError> {
        self.tx
            .send(item)
            .map_err(|_| SendError::ConnectionClosed(self.id))
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}
