//! Peer-Side Replica
//!
//! A non-host peer never runs the engine. It keeps the last snapshot the
//! host sent and reads cooldowns off it against its own clock. A snapshot
//! always replaces the previous one wholesale, so a missed broadcast is
//! healed by the next.

use tracing::debug;

use crate::core::hash::{short_hex, StateHash};
use crate::game::config::GameConfig;
use crate::game::state::{GameState, Player, PlayerId, RoomId};
use crate::network::protocol::{snapshot_digest, NetworkMessage};

/// Read-only mirror of the host's state.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    snapshot: Option<GameState>,
    digest: Option<StateHash>,
    config: GameConfig,
}

impl Replica {
    /// Empty replica. `config` must match the host's tuning for cooldowns to
    /// read correctly.
    pub fn new(config: GameConfig) -> Self {
        Self { snapshot: None, digest: None, config }
    }

    /// Latest snapshot, if any has arrived.
    pub fn state(&self) -> Option<&GameState> {
        self.snapshot.as_ref()
    }

    /// Feed one inbound frame. Returns true if it was a snapshot.
    pub fn apply_message(&mut self, message: NetworkMessage) -> bool {
        match message {
            NetworkMessage::SyncState(state) => {
                self.apply_snapshot(state);
                true
            }
            other => {
                debug!("Replica ignoring {}", other.kind());
                false
            }
        }
    }

    /// Overwrite with a host snapshot.
    pub fn apply_snapshot(&mut self, state: GameState) {
        let digest = snapshot_digest(&state).ok();
        if let (Some(new), Some(old)) = (&digest, &self.digest) {
            if new == old {
                debug!("Duplicate snapshot {}", short_hex(new));
            }
        }
        self.digest = digest;
        self.snapshot = Some(state);
    }

    fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.snapshot.as_ref()?.player(id)
    }

    // =========================================================================
    // DERIVED VIEWS
    // =========================================================================

    /// Time left in transit (ms). Zero when not moving.
    pub fn move_remaining_ms(&self, id: &PlayerId, now: u64) -> u64 {
        self.player(id)
            .filter(|p| p.is_moving)
            .map(|p| p.move_unlock_time.saturating_sub(now))
            .unwrap_or(0)
    }

    /// Time until REROLL is accepted (ms).
    pub fn reroll_cooldown_ms(&self, id: &PlayerId, now: u64) -> u64 {
        self.player(id)
            .map(|p| (p.last_reroll_time + self.config.reroll_cooldown_ms).saturating_sub(now))
            .unwrap_or(0)
    }

    /// Whether a room's requirements are currently doubled.
    pub fn is_supercharged(&self, room_id: RoomId, now: u64) -> bool {
        self.supercharge_remaining_ms(room_id, now) > 0
    }

    /// Time until a room's supercharge wears off (ms).
    pub fn supercharge_remaining_ms(&self, room_id: RoomId, now: u64) -> u64 {
        self.snapshot
            .as_ref()
            .and_then(|s| s.room(room_id))
            .map(|r| r.super_charge_unlock_time.saturating_sub(now))
            .unwrap_or(0)
    }

    /// Time until the DM may supercharge again (ms).
    pub fn supercharge_cooldown_ms(&self, now: u64) -> u64 {
        match &self.snapshot {
            Some(state) if state.last_super_charge_time != 0 => {
                // The host wants strictly more than the cooldown to have passed
                (state.last_super_charge_time + self.config.supercharge_cooldown_ms + 1).saturating_sub(now)
            }
            _ => 0,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
