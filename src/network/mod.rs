//! Network Layer
//!
//! Snapshot replication between the host and its peers.
//! This layer is **impure** (sockets, clocks) - all game rules run through `game/`.
//!
//! ## Module Structure
//!
//! - `protocol`: Wire messages and snapshot digests
//! - `transport`: The transport trait and an in-memory hub
//! - `websocket`: tokio-tungstenite transport and peer client
//! - `host`: The authoritative session loop
//! - `replica`: The read-only peer mirror

pub mod protocol;
pub mod transport;
pub mod websocket;
pub mod host;
pub mod replica;

pub use protocol::{snapshot_digest, snapshot_tag, NetworkMessage, ProtocolError};
pub use transport::{ConnectionId, MemoryHub, MemoryPeer, Transport, TransportError, TransportEvent};
pub use websocket::{connect_to_host, HostLink, WebSocketTransport};
pub use host::{run_websocket_host, HostConfig, HostError, HostSession};
pub use replica::Replica;
