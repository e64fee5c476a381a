//! Game Logic Module
//!
//! The pure engine. Nothing in here touches a socket or a clock; time and
//! randomness come in through [`StepContext`].
//!
//! ## Module Structure
//!
//! - `state`: Game state, players, rooms, dice
//! - `catalog`: Obstacle cards, items, loot table
//! - `dice`: Die generation and GOLD/EXP auto-consumption
//! - `map`: Maze generation and graph queries
//! - `obstacle`: Obstacle progress resolution
//! - `action`: The host-side reducer
//! - `tick`: The 1 Hz scheduler
//! - `config`: Tuning constants
//! - `events`: Engine events for logging

pub mod state;
pub mod catalog;
pub mod dice;
pub mod map;
pub mod obstacle;
pub mod action;
pub mod tick;
pub mod config;
pub mod events;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use action::{apply, admit, Action, Rejection, StepContext};
pub use config::GameConfig;
pub use events::GameEvent;
pub use state::{
    Die, Direction, GameState, GameStatus, HeroClass, Player, PlayerId, PlayerRole, Room, RoomId, StatType,
};
pub use tick::{tick, TickResult};
