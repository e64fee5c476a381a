//! Protocol Messages
//!
//! Wire format between peers. Every frame is a JSON object
//! `{"type": ..., "payload": ...}` carried in a WebSocket text message.
//! Field names are camelCase and room ids are `"x,y"` strings.

use serde::{Serialize, Deserialize};

use crate::core::hash::{short_hex, StateHash};
use crate::game::action::Action;
use crate::game::state::{GameState, Player};

/// Every message a peer or the host can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkMessage {
    /// Peer -> host: take a seat (or refresh the profile of an existing one).
    JoinRequest(Player),

    /// Peer -> host: please apply this.
    Action(Action),

    /// Host -> peers: the whole authoritative state.
    SyncState(GameState),
}

impl NetworkMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Message type tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkMessage::JoinRequest(_) => "JOIN_REQUEST",
            NetworkMessage::Action(_) => "ACTION",
            NetworkMessage::SyncState(_) => "SYNC_STATE",
        }
    }
}

/// Malformed or unencodable frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON could not be produced or parsed.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// SHA-256 of a snapshot's canonical JSON encoding.
pub fn snapshot_digest(state: &GameState) -> Result<StateHash, ProtocolError> {
    Ok(state.digest()?)
}

/// Short printable digest for log lines (`"--------"` if encoding fails).
pub fn snapshot_tag(state: &GameState) -> String {
    snapshot_digest(state)
        .map(|digest| short_hex(&digest))
        .unwrap_or_else(|_| "--------".to_string())
}

// =============================================================================
// TESTS
// =============================================================================
