//! # Dice Dungeon Engine
//!
//! Host-authoritative engine for a real-time dice dungeon crawl. One DM
//! seeds a procedurally generated maze with obstacle cards; heroes roll,
//! lock and upgrade dice to fight their way to the exit before the timer
//! runs out.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DICE DUNGEON ENGINE                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  ├── clock.rs    - Wall and manual millisecond clocks        │
//! │  └── hash.rs     - Snapshot digests                          │
//! │                                                              │
//! │  game/           - Rules (pure)                              │
//! │  ├── state.rs    - Game, player, room and die model          │
//! │  ├── catalog.rs  - Obstacle cards, items, loot               │
//! │  ├── dice.rs     - Die generation, GOLD/EXP cash-in          │
//! │  ├── map.rs      - Maze carving, key/door placement          │
//! │  ├── obstacle.rs - Requirement resolution                    │
//! │  ├── action.rs   - Action reducer                            │
//! │  └── tick.rs     - 1 Hz scheduler                            │
//! │                                                              │
//! │  network/        - Replication (impure)                      │
//! │  ├── protocol.rs - JOIN_REQUEST / ACTION / SYNC_STATE        │
//! │  ├── transport.rs- Transport trait, in-memory hub            │
//! │  ├── websocket.rs- WebSocket transport                       │
//! │  ├── host.rs     - Authoritative session                     │
//! │  └── replica.rs  - Peer mirror                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Exactly one process calls [`game::apply`] and [`game::tick`]: the host.
//! Every other peer holds a [`network::Replica`] that is overwritten by each
//! full snapshot the host broadcasts. There are no deltas, so a lost frame
//! is healed by the next one.
//!
//! The rules themselves never read a clock or an OS random source; both are
//! passed in through [`game::StepContext`], so the same inputs always produce
//! the same state.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::clock::{Clock, ManualClock, SystemClock};
pub use core::rng::DeterministicRng;
pub use game::{apply, admit, tick, Action, GameConfig, GameState, GameStatus, Player, PlayerId, StepContext};
pub use network::{HostConfig, HostSession, NetworkMessage, Replica};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scheduler rate (Hz)
pub const TICK_RATE: u32 = 1;
