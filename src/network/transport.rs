//! Transport Collaborator
//!
//! The replication layer only needs four things from the wire: open
//! connections, a way to send to one, a way to send to all, and a stream of
//! open/message/close events. Discovery and signalling are the transport's
//! business.
//!
//! Sends are fire-and-forget. A full outbound queue drops the frame; the
//! next snapshot replaces whatever was lost.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::network::protocol::{NetworkMessage, ProtocolError};

/// Per-connection outbound queue depth.
pub const OUTBOUND_BUFFER: usize = 64;

/// Opaque handle for one open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Inbound activity, delivered to the host in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer connected.
    Opened(ConnectionId),
    /// A peer sent a frame.
    Message(ConnectionId, NetworkMessage),
    /// A peer went away; stop broadcasting to it.
    Closed(ConnectionId),
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No such open connection.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The other side has gone away.
    #[error("Connection closed")]
    Disconnected,

    /// Frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the host needs from a transport.
pub trait Transport: Send + Sync {
    /// Queue a message for one connection.
    fn send(&self, connection: ConnectionId, message: &NetworkMessage) -> Result<(), TransportError>;

    /// Queue a message for every open connection. Returns how many took it.
    fn broadcast(&self, message: &NetworkMessage) -> usize;

    /// Currently open connections.
    fn connections(&self) -> Vec<ConnectionId>;
}

// =============================================================================
// CONNECTION REGISTRY
// =============================================================================

/// Outbound queues keyed by connection. Shared by every transport here.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    next_id: AtomicU64,
    outbound: Mutex<BTreeMap<ConnectionId, mpsc::Sender<NetworkMessage>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, mpsc::Sender<NetworkMessage>>> {
        // A panicked holder cannot leave the map half-written
        self.outbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn open(&self, sender: mpsc::Sender<NetworkMessage>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock().insert(id, sender);
        id
    }

    pub(crate) fn close(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub(crate) fn send(&self, id: ConnectionId, message: &NetworkMessage) -> Result<(), TransportError> {
        let sender = self.lock().get(&id).cloned().ok_or(TransportError::UnknownConnection(id))?;
        match sender.try_send(message.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping {}", id, message.kind());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close(id);
                Err(TransportError::Disconnected)
            }
        }
    }

    pub(crate) fn broadcast(&self, message: &NetworkMessage) -> usize {
        let targets: Vec<ConnectionId> = self.lock().keys().copied().collect();
        targets
            .into_iter()
            .filter(|id| match self.send(*id, message) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Broadcast to {} failed: {}", id, e);
                    false
                }
            })
            .count()
    }

    pub(crate) fn connections(&self) -> Vec<ConnectionId> {
        self.lock().keys().copied().collect()
    }
}

// =============================================================================
// IN-MEMORY HUB
// =============================================================================

/// In-process transport. The host end implements [`Transport`]; each
/// [`MemoryPeer`] is the far end of one connection.
#[derive(Debug)]
pub struct MemoryHub {
    registry: Registry,
    events: mpsc::Sender<TransportEvent>,
}

impl MemoryHub {
    /// New hub plus the event stream the host should drain.
    pub fn new(buffer: usize) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (events, event_rx) = mpsc::channel(buffer.max(1));
        (Arc::new(Self { registry: Registry::default(), events }), event_rx)
    }

    /// Open a connection to the host.
    pub async fn connect(self: &Arc<Self>) -> Result<MemoryPeer, TransportError> {
        let (tx, inbox) = mpsc::channel(OUTBOUND_BUFFER);
        let id = self.registry.open(tx);
        if self.events.send(TransportEvent::Opened(id)).await.is_err() {
            self.registry.close(id);
            return Err(TransportError::Disconnected);
        }
        Ok(MemoryPeer { id, hub: Arc::clone(self), inbox })
    }
}

impl Transport for MemoryHub {
    fn send(&self, connection: ConnectionId, message: &NetworkMessage) -> Result<(), TransportError> {
        self.registry.send(connection, message)
    }

    fn broadcast(&self, message: &NetworkMessage) -> usize {
        self.registry.broadcast(message)
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.registry.connections()
    }
}

/// The peer side of an in-memory connection. Dropping it closes the
/// connection.
#[derive(Debug)]
pub struct MemoryPeer {
    id: ConnectionId,
    hub: Arc<MemoryHub>,
    inbox: mpsc::Receiver<NetworkMessage>,
}

impl MemoryPeer {
    /// This connection's id as the host sees it.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send a frame to the host.
    pub async fn send(&self, message: NetworkMessage) -> Result<(), TransportError> {
        self.hub
            .events
            .send(TransportEvent::Message(self.id, message))
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    /// Wait for the next frame from the host.
    pub async fn recv(&mut self) -> Option<NetworkMessage> {
        self.inbox.recv().await
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<NetworkMessage> {
        self.inbox.try_recv().ok()
    }
}

impl Drop for MemoryPeer {
    fn drop(&mut self) {
        if self.hub.registry.close(self.id) {
            let _ = self.hub.events.try_send(TransportEvent::Closed(self.id));
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
