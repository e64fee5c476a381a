//! Game Tuning
//!
//! Durations, costs and counts. None of these are load-bearing contracts;
//! hosts may override any of them before opening a lobby.

use serde::{Serialize, Deserialize};

/// Tunable constants for one hosted game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    /// Length of the PLAYING phase (seconds).
    pub game_duration_secs: u32,
    /// Length of the PREGAME draft before forced promotion (seconds).
    pub pregame_duration_secs: u32,
    /// How long a hero is in transit after MOVE (ms).
    pub movement_delay_ms: u64,
    /// DM resource regeneration period (ms).
    pub resource_tick_interval_ms: u64,
    /// DM card draw period (ms).
    pub card_draw_interval_ms: u64,
    /// Minimum gap between rerolls for one hero (ms).
    pub reroll_cooldown_ms: u64,
    /// Global gap between supercharges (ms).
    pub supercharge_cooldown_ms: u64,
    /// How long a supercharge doubles requirements (ms).
    pub supercharge_duration_ms: u64,
    /// Side length of the square maze.
    pub map_size: u32,
    /// DM resources at lobby reset.
    pub initial_dm_resources: u32,
    /// DM resource cap.
    pub max_dm_resources: u32,
    /// Cards kept in the DM hand.
    pub hand_size: usize,
    /// Cards the DM drafts during PREGAME.
    pub dm_deck_size: usize,
    /// Dice each hero drafts during PREGAME.
    pub draft_steps: u32,
    /// Options offered per draft pick.
    pub draft_options: usize,
    /// Chance (percent) that a non-start room is seeded with an obstacle.
    pub obstacle_seed_percent: u32,
    /// Exit must be strictly further than this (Manhattan) from Start.
    pub exit_min_distance: u32,
    /// Experience needed per level.
    pub exp_per_level: u32,
    /// Guard on the resource-face auto-consumption loop.
    pub auto_resource_max_iterations: u32,
    /// Age after which recent success markers are dropped (ms).
    pub recent_success_window_ms: u64,
    /// Run the PREGAME draft. When off, START_GAME goes straight to PLAYING.
    pub draft_enabled: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            game_duration_secs: 600,
            pregame_duration_secs: 60,
            movement_delay_ms: 3_000,
            resource_tick_interval_ms: 15_000,
            card_draw_interval_ms: 30_000,
            reroll_cooldown_ms: 2_000,
            supercharge_cooldown_ms: 60_000,
            supercharge_duration_ms: 20_000,
            map_size: 8,
            initial_dm_resources: 8,
            max_dm_resources: 10,
            hand_size: 3,
            dm_deck_size: 10,
            draft_steps: 2,
            draft_options: 3,
            obstacle_seed_percent: 30,
            exit_min_distance: 8,
            exp_per_level: 5,
            auto_resource_max_iterations: 10,
            recent_success_window_ms: 2_000,
            draft_enabled: true,
        }
    }
}

impl GameConfig {
    /// Maze side length, never below 2 so Start and Exit can differ.
    pub fn effective_map_size(&self) -> u32 {
        self.map_size.max(2)
    }
}
