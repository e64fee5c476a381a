//! Core primitives.
//!
//! Randomness, time and hashing. Nothing in here knows about dice or rooms.

pub mod rng;
pub mod clock;
pub mod hash;

// Re-export core types
pub use rng::DeterministicRng;
pub use clock::{Clock, ManualClock, SystemClock};
pub use hash::{digest_json, StateHash};
