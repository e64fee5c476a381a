//! Host Simulation Tick
//!
//! Runs once per second on the host only. Counts the phase timer down and
//! drives everything that happens without a player acting: DM income, card
//! draws, regenerating obstacles and the end of transit.
//!
//! Like [`apply`](crate::game::action::apply) this is pure: time comes in
//! through the step context and the old state is never touched.

use std::sync::Arc;

use crate::game::action::{draw_into_hand, enter_playing, resolve_room, set_status, StepContext};
use crate::game::events::GameEvent;
use crate::game::state::{GameState, GameStatus, PlayerId, RoomId};

/// Result of a tick.
#[derive(Debug)]
pub struct TickResult {
    /// Next state.
    pub state: GameState,
    /// Events generated this tick.
    pub events: Vec<GameEvent>,
    /// The game is over (either side won).
    pub game_ended: bool,
}

/// Advance the world by one second.
///
/// Lobby and terminal states come back unchanged.
pub fn tick(state: &GameState, ctx: &mut StepContext<'_>) -> TickResult {
    let mut next = state.clone();

    match state.status {
        GameStatus::Pregame => tick_pregame(&mut next, ctx),
        GameStatus::Playing => tick_playing(&mut next, ctx),
        GameStatus::Lobby | GameStatus::VictoryHero | GameStatus::VictoryDm => {}
    }

    TickResult {
        game_ended: next.status.is_terminal(),
        events: ctx.take_events(),
        state: next,
    }
}

fn tick_pregame(state: &mut GameState, ctx: &mut StepContext<'_>) {
    state.timer = state.timer.saturating_sub(1);
    if state.timer == 0 || state.all_players_ready() {
        enter_playing(state, ctx);
    }
}

fn tick_playing(state: &mut GameState, ctx: &mut StepContext<'_>) {
    state.timer = state.timer.saturating_sub(1);
    if state.timer == 0 {
        set_status(state, GameStatus::VictoryDm, ctx);
        return;
    }

    replenish_resources(state, ctx);
    draw_card(state, ctx);
    regenerate_obstacles(state, ctx);
    prune_recent_successes(state, ctx);
    finish_movement(state, ctx);
}

// =============================================================================
// DM ECONOMY
// =============================================================================

fn replenish_resources(state: &mut GameState, ctx: &mut StepContext<'_>) {
    if ctx.now.saturating_sub(state.last_resource_tick) <= ctx.config.resource_tick_interval_ms {
        return;
    }
    state.dm_resources = (state.dm_resources + 1).min(ctx.config.max_dm_resources);
    state.last_resource_tick = ctx.now;
}

fn draw_card(state: &mut GameState, ctx: &mut StepContext<'_>) {
    if ctx.now.saturating_sub(state.last_card_draw_tick) <= ctx.config.card_draw_interval_ms {
        return;
    }
    draw_into_hand(state, ctx);
    state.last_card_draw_tick = ctx.now;
}

// =============================================================================
// ROOMS
// =============================================================================

/// Reset defeated `resetsOnLeave` obstacles in empty rooms, then re-resolve
/// every room holding such an obstacle.
fn regenerate_obstacles(state: &mut GameState, ctx: &mut StepContext<'_>) {
    let regenerating: Vec<RoomId> = state
        .map
        .values()
        .filter(|room| room.active_obstacles.iter().any(|o| o.card.special_rules.resets_on_leave))
        .map(|room| room.id)
        .collect();

    for room_id in regenerating {
        if !state.room_is_occupied(room_id) {
            let needs_reset = state
                .room(room_id)
                .is_some_and(|r| r.active_obstacles.iter().any(|o| o.card.special_rules.resets_on_leave && o.is_defeated));
            if needs_reset {
                if let Some(room) = state.room_mut(room_id) {
                    for obstacle in room.active_obstacles.iter_mut() {
                        if obstacle.card.special_rules.resets_on_leave && obstacle.is_defeated {
                            obstacle.is_defeated = false;
                            obstacle.current_successes.clear();
                            obstacle.permanent_successes.clear();
                            ctx.events.push(GameEvent::ObstacleReset { room_id, obstacle_id: obstacle.id.clone() });
                        }
                    }
                }
            }
        }
        resolve_room(state, room_id, ctx);
    }
}

fn prune_recent_successes(state: &mut GameState, ctx: &mut StepContext<'_>) {
    let now = ctx.now;
    let window = ctx.config.recent_success_window_ms;
    let is_stale = |t: &u64| now.saturating_sub(*t) > window;

    for room in state.map.values_mut() {
        if room.recent_successes.iter().any(is_stale) {
            Arc::make_mut(room).recent_successes.retain(|t| !is_stale(t));
        }
    }
}

// =============================================================================
// PLAYERS
// =============================================================================

fn finish_movement(state: &mut GameState, ctx: &mut StepContext<'_>) {
    let arrived: Vec<PlayerId> = state
        .players
        .values()
        .filter(|p| p.is_moving && p.move_unlock_time <= ctx.now)
        .map(|p| p.id.clone())
        .collect();

    for id in arrived {
        if let Some(player) = state.player_mut(&id) {
            player.is_moving = false;
            if let Some(room_id) = player.current_room_id {
                ctx.events.push(GameEvent::MovementCompleted { player_id: id.clone(), room_id });
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
