//! Game Events
//!
//! Notable things that happened during a transition. The engine collects
//! them alongside the new state; the host logs them. They are never
//! replicated: peers only ever see full snapshots.

use serde::{Serialize, Deserialize};

use crate::game::state::{GameStatus, PlayerId, RoomId};

/// Something worth telling the operator about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// Phase transition.
    StatusChanged {
        /// Old phase.
        from: GameStatus,
        /// New phase.
        to: GameStatus,
    },

    /// A player took a seat.
    PlayerJoined {
        /// Who.
        player_id: PlayerId,
        /// Joined after the lobby closed.
        late: bool,
    },

    /// An obstacle fell.
    ObstacleDefeated {
        /// Where.
        room_id: RoomId,
        /// Which instance.
        obstacle_id: String,
        /// Card name.
        name: String,
    },

    /// A regenerating obstacle came back.
    ObstacleReset {
        /// Where.
        room_id: RoomId,
        /// Which instance.
        obstacle_id: String,
    },

    /// Loot hit the floor.
    LootDropped {
        /// Where.
        room_id: RoomId,
        /// Item id.
        item_id: String,
    },

    /// The DM placed a card.
    TrapPlaced {
        /// Where.
        room_id: RoomId,
        /// Card name.
        name: String,
    },

    /// The DM supercharged a room.
    RoomSupercharged {
        /// Where.
        room_id: RoomId,
        /// Doubling ends (ms).
        until: u64,
    },

    /// A card entered the DM hand.
    CardDrawn {
        /// Card name.
        name: String,
    },

    /// A hero finished walking.
    MovementCompleted {
        /// Who.
        player_id: PlayerId,
        /// Arrived at.
        room_id: RoomId,
    },

    /// A hero gained levels from EXP faces.
    LevelUp {
        /// Who.
        player_id: PlayerId,
        /// New level.
        level: u32,
    },
}

impl GameEvent {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::StatusChanged { .. } => "status_changed",
            GameEvent::PlayerJoined { .. } => "player_joined",
            GameEvent::ObstacleDefeated { .. } => "obstacle_defeated",
            GameEvent::ObstacleReset { .. } => "obstacle_reset",
            GameEvent::LootDropped { .. } => "loot_dropped",
            GameEvent::TrapPlaced { .. } => "trap_placed",
            GameEvent::RoomSupercharged { .. } => "room_supercharged",
            GameEvent::CardDrawn { .. } => "card_drawn",
            GameEvent::MovementCompleted { .. } => "movement_completed",
            GameEvent::LevelUp { .. } => "level_up",
        }
    }
}
