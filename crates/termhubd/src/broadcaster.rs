//! Fan-out of daemon events to every open connection.
//!
//! Each connection registers an outbound queue; a per-connection writer
//! task drains it to the socket. Events are serialized once and the same
//! line is shared by every queue. Delivery is unconditional: connections
//! receive events for every session, whichever sessions their clients are
//! bound to.
//!
//! Queues are bounded. A connection whose writer falls
//! [`OUTBOUND_QUEUE_CAPACITY`] lines behind is dropped rather than left to
//! grow without limit; its writer then drains what was queued and closes
//! the socket.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, trace, warn};

use termhub_protocol::{encode_line, BroadcastEvent, Response};

/// Daemon-assigned identity of one socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lines a connection may have queued before it is dropped as too slow.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 4096;

/// Sender side of a connection's outbound queue. Each item is one complete
/// wire line, newline included.
pub type Outbound = mpsc::Sender<Arc<str>>;

/// Sender that does not keep the queue open on its own.
pub type WeakOutbound = mpsc::WeakSender<Arc<str>>;

/// Creates an outbound queue of [`OUTBOUND_QUEUE_CAPACITY`] lines.
pub fn outbound_queue() -> (Outbound, mpsc::Receiver<Arc<str>>) {
    mpsc::channel(OUTBOUND_QUEUE_CAPACITY)
}

/// Enqueues `line` without waiting. Returns false if the connection should
/// be dropped.
fn enqueue(id: ConnectionId, outbound: &Outbound, line: Arc<str>) -> bool {
    match outbound.try_send(line) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(
                connection = %id,
                capacity = outbound.max_capacity(),
                "Outbound queue full, dropping connection"
            );
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Registered connections and their outbound queues.
#[derive(Debug, Default)]
pub struct Broadcaster {
    connections: BTreeMap<ConnectionId, Outbound>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. A second registration replaces the first.
    pub fn register(&mut self, id: ConnectionId, outbound: Outbound) {
        self.connections.insert(id, outbound);
        debug!(connection = %id, total = self.connections.len(), "Connection registered");
    }

    /// Removes a connection. Returns false if it was not registered.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            debug!(connection = %id, total = self.connections.len(), "Connection unregistered");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Sends `event` to every connection and returns how many accepted it.
    ///
    /// Connections whose queue has closed or overflowed are pruned.
    pub fn broadcast(&mut self, event: &BroadcastEvent) -> usize {
        let line = match encode_line(event) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut failed = Vec::new();
        for (id, outbound) in &self.connections {
            if !enqueue(*id, outbound, Arc::clone(&line)) {
                failed.push(*id);
            }
        }

        for id in &failed {
            self.connections.remove(id);
            debug!(connection = %id, "Removed connection");
        }

        let delivered = self.connections.len();
        trace!(session = %event.session(), delivered, "Event broadcast");
        delivered
    }

    /// Sends a pre-encoded line to one connection.
    pub fn send_to(&mut self, id: ConnectionId, line: Arc<str>) -> bool {
        let Some(outbound) = self.connections.get(&id) else {
            return false;
        };
        if enqueue(id, outbound, line) {
            return true;
        }
        self.connections.remove(&id);
        debug!(connection = %id, "Removed connection");
        false
    }

    /// Sends a response to one connection.
    pub fn respond(&mut self, id: ConnectionId, response: &Response) -> bool {
        match encode_line(response) {
            Ok(line) => self.send_to(id, line),
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                false
            }
        }
    }
}
