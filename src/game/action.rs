//! Action Processing
//!
//! The host-side reducer: `(GameState, Action) -> GameState`. Every branch
//! checks its preconditions first; a failed check leaves the state exactly
//! as it was. There is no error channel back to the acting peer, the host
//! only records why for its own logs.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::game::catalog::{self, ItemEffect, STARTER_ITEM_ID};
use crate::game::config::GameConfig;
use crate::game::dice;
use crate::game::events::GameEvent;
use crate::game::map::generate_map;
use crate::game::obstacle::{die_power, recalculate};
use crate::game::state::{
    CardTier, Direction, GameState, GameStatus, HeroClass, ObstacleCard, Player, PlayerId,
    PlayerRole, RoomId, RoomObstacle,
};

// =============================================================================
// ACTIONS
// =============================================================================

/// Everything a player can ask the host to do.
///
/// Fields name the acting player and the target of the action.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Action {
    /// Host opens the dungeon.
    StartGame { player_id: PlayerId },
    /// Hero takes one offered die.
    DraftDie { player_id: PlayerId, die_id: String },
    /// DM takes one offered card.
    DraftCard { player_id: PlayerId, card_id: String },
    /// Done drafting.
    PlayerReady { player_id: PlayerId },
    /// Walk to an adjacent connected room.
    Move { player_id: PlayerId, direction: Direction },
    /// Commit a die to an obstacle (or strike an accumulating one).
    UseDie { player_id: PlayerId, die_id: String, obstacle_id: String },
    /// Take a die back.
    UnlockDie { player_id: PlayerId, die_id: String },
    /// Reroll every free die.
    Reroll { player_id: PlayerId },
    /// Spend an upgrade point on one face.
    UpgradeDie { player_id: PlayerId, die_id: String, face_index: usize },
    /// Floor to inventory.
    PickupItem { player_id: PlayerId, item_id: String },
    /// Inventory to floor.
    DropItem { player_id: PlayerId, item_id: String },
    /// Spend gold on an item.
    BuyItem { player_id: PlayerId, item_id: String },
    /// Consume an item's effect.
    UseItem { player_id: PlayerId, item_id: String },
    /// Open a key-gated obstacle.
    UnlockObstacle { player_id: PlayerId, obstacle_id: String },
    /// DM places a card from hand.
    DmPlaceTrap { player_id: PlayerId, card_id: String, room_id: RoomId },
    /// DM doubles a room's requirements for a while.
    SuperChargeRoom { player_id: PlayerId, room_id: RoomId },
    /// Hero leaves through the Exit.
    EscapeDungeon { player_id: PlayerId },
    /// Profile edit; omitted fields are kept.
    UpdatePlayer {
        player_id: PlayerId,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        role: Option<PlayerRole>,
        #[serde(default)]
        hero_class: Option<HeroClass>,
    },
    /// Back to the lobby.
    ResetLobby,
}

impl Action {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::StartGame { .. } => "START_GAME",
            Action::DraftDie { .. } => "DRAFT_DIE",
            Action::DraftCard { .. } => "DRAFT_CARD",
            Action::PlayerReady { .. } => "PLAYER_READY",
            Action::Move { .. } => "MOVE",
            Action::UseDie { .. } => "USE_DIE",
            Action::UnlockDie { .. } => "UNLOCK_DIE",
            Action::Reroll { .. } => "REROLL",
            Action::UpgradeDie { .. } => "UPGRADE_DIE",
            Action::PickupItem { .. } => "PICKUP_ITEM",
            Action::DropItem { .. } => "DROP_ITEM",
            Action::BuyItem { .. } => "BUY_ITEM",
            Action::UseItem { .. } => "USE_ITEM",
            Action::UnlockObstacle { .. } => "UNLOCK_OBSTACLE",
            Action::DmPlaceTrap { .. } => "DM_PLACE_TRAP",
            Action::SuperChargeRoom { .. } => "SUPER_CHARGE_ROOM",
            Action::EscapeDungeon { .. } => "ESCAPE_DUNGEON",
            Action::UpdatePlayer { .. } => "UPDATE_PLAYER",
            Action::ResetLobby => "RESET_LOBBY",
        }
    }

    /// Acting player, if the action names one.
    pub fn actor(&self) -> Option<&PlayerId> {
        match self {
            Action::StartGame { player_id }
            | Action::DraftDie { player_id, .. }
            | Action::DraftCard { player_id, .. }
            | Action::PlayerReady { player_id }
            | Action::Move { player_id, .. }
            | Action::UseDie { player_id, .. }
            | Action::UnlockDie { player_id, .. }
            | Action::Reroll { player_id }
            | Action::UpgradeDie { player_id, .. }
            | Action::PickupItem { player_id, .. }
            | Action::DropItem { player_id, .. }
            | Action::BuyItem { player_id, .. }
            | Action::UseItem { player_id, .. }
            | Action::UnlockObstacle { player_id, .. }
            | Action::DmPlaceTrap { player_id, .. }
            | Action::SuperChargeRoom { player_id, .. }
            | Action::EscapeDungeon { player_id }
            | Action::UpdatePlayer { player_id, .. } => Some(player_id),
            Action::ResetLobby => None,
        }
    }
}

// =============================================================================
// STEP CONTEXT
// =============================================================================

/// Why an action was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rejection(pub &'static str);

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

type Outcome = Result<(), Rejection>;

#[inline]
fn ensure(condition: bool, reason: &'static str) -> Outcome {
    if condition {
        Ok(())
    } else {
        Err(Rejection(reason))
    }
}

/// Everything a transition needs besides the state itself.
///
/// `now` is read once by the caller; the engine never looks at a clock.
pub struct StepContext<'a> {
    /// Current time (ms).
    pub now: u64,
    /// Session randomness.
    pub rng: &'a mut DeterministicRng,
    /// Tuning.
    pub config: &'a GameConfig,
    /// Events raised so far.
    pub events: Vec<GameEvent>,
    /// Set when the last action was dropped.
    pub rejection: Option<Rejection>,
}

impl<'a> StepContext<'a> {
    /// Fresh context for one step.
    pub fn new(now: u64, rng: &'a mut DeterministicRng, config: &'a GameConfig) -> Self {
        Self { now, rng, config, events: Vec::new(), rejection: None }
    }

    /// Drain collected events.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Apply one action. Returns the new state, or an unchanged copy when a
/// precondition fails (the reason lands in `ctx.rejection`).
pub fn apply(state: &GameState, action: &Action, ctx: &mut StepContext<'_>) -> GameState {
    transition(state, ctx, |next, ctx| dispatch(next, action, ctx))
}

/// Seat a player from a JOIN_REQUEST.
///
/// A known id only merges profile fields. Outside the lobby a new hero
/// spawns at Start with an undrafted pool and the starter item. An empty
/// host seat goes to the first arrival.
pub fn admit(state: &GameState, player: &Player, ctx: &mut StepContext<'_>) -> GameState {
    transition(state, ctx, |next, ctx| admit_player(next, player, ctx))
}

fn transition<F>(state: &GameState, ctx: &mut StepContext<'_>, step: F) -> GameState
where
    F: FnOnce(&mut GameState, &mut StepContext<'_>) -> Outcome,
{
    let mark = ctx.events.len();
    let mut next = state.clone();
    match step(&mut next, ctx) {
        Ok(()) => {
            ctx.rejection = None;
            next
        }
        Err(rejection) => {
            ctx.events.truncate(mark);
            ctx.rejection = Some(rejection);
            state.clone()
        }
    }
}

fn dispatch(state: &mut GameState, action: &Action, ctx: &mut StepContext<'_>) -> Outcome {
    match action {
        Action::StartGame { player_id } => start_game(state, player_id, ctx),
        Action::DraftDie { player_id, die_id } => draft_die(state, player_id, die_id, ctx),
        Action::DraftCard { player_id, card_id } => draft_card(state, player_id, card_id, ctx),
        Action::PlayerReady { player_id } => player_ready(state, player_id),
        Action::Move { player_id, direction } => move_player(state, player_id, *direction, ctx),
        Action::UseDie { player_id, die_id, obstacle_id } => use_die(state, player_id, die_id, obstacle_id, ctx),
        Action::UnlockDie { player_id, die_id } => unlock_die(state, player_id, die_id, ctx),
        Action::Reroll { player_id } => reroll(state, player_id, ctx),
        Action::UpgradeDie { player_id, die_id, face_index } => upgrade_die(state, player_id, die_id, *face_index),
        Action::PickupItem { player_id, item_id } => pickup_item(state, player_id, item_id, ctx),
        Action::DropItem { player_id, item_id } => drop_item(state, player_id, item_id, ctx),
        Action::BuyItem { player_id, item_id } => buy_item(state, player_id, item_id, ctx),
        Action::UseItem { player_id, item_id } => use_item(state, player_id, item_id, ctx),
        Action::UnlockObstacle { player_id, obstacle_id } => unlock_obstacle(state, player_id, obstacle_id, ctx),
        Action::DmPlaceTrap { player_id, card_id, room_id } => place_trap(state, player_id, card_id, *room_id, ctx),
        Action::SuperChargeRoom { player_id, room_id } => super_charge(state, player_id, *room_id, ctx),
        Action::EscapeDungeon { player_id } => escape(state, player_id, ctx),
        Action::UpdatePlayer { player_id, name, role, hero_class } => {
            update_player(state, player_id, name.as_deref(), *role, *hero_class)
        }
        Action::ResetLobby => {
            reset_lobby(state, ctx);
            Ok(())
        }
    }
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

fn actor<'s>(state: &'s GameState, id: &PlayerId) -> Result<&'s Player, Rejection> {
    state.player(id).ok_or(Rejection("unknown player"))
}

fn actor_mut<'s>(state: &'s mut GameState, id: &PlayerId) -> Result<&'s mut Player, Rejection> {
    state.player_mut(id).ok_or(Rejection("unknown player"))
}

/// Actor must be a hero and the game must be running.
fn hero_in_play<'s>(state: &'s GameState, id: &PlayerId) -> Result<&'s Player, Rejection> {
    ensure(state.status == GameStatus::Playing, "game not running")?;
    let player = actor(state, id)?;
    ensure(player.is_hero(), "not a hero")?;
    Ok(player)
}

fn dm_in_play<'s>(state: &'s GameState, id: &PlayerId) -> Result<&'s Player, Rejection> {
    ensure(state.status == GameStatus::Playing, "game not running")?;
    let player = actor(state, id)?;
    ensure(player.is_dm(), "not the DM")?;
    Ok(player)
}

fn located(player: &Player) -> Result<RoomId, Rejection> {
    player.current_room_id.ok_or(Rejection("player has no room"))
}

pub(crate) fn set_status(state: &mut GameState, to: GameStatus, ctx: &mut StepContext<'_>) {
    if state.status != to {
        ctx.events.push(GameEvent::StatusChanged { from: state.status, to });
        state.status = to;
    }
}

/// Run the obstacle resolver on one room.
pub(crate) fn resolve_room(state: &mut GameState, room_id: RoomId, ctx: &mut StepContext<'_>) {
    let GameState { map, players, .. } = state;
    if let Some(room) = map.get_mut(&room_id) {
        let events = recalculate(Arc::make_mut(room), players, ctx.now, ctx.rng);
        ctx.events.extend(events);
    }
}

/// Cash in GOLD/EXP faces for one player.
pub(crate) fn cash_in(state: &mut GameState, player_id: &PlayerId, ctx: &mut StepContext<'_>) {
    let Some(player) = state.player_mut(player_id) else { return };
    let gain = dice::resolve_auto_resources(player, ctx.rng, ctx.config);
    if gain.levels > 0 {
        ctx.events.push(GameEvent::LevelUp { player_id: player_id.clone(), level: player.level });
    }
}

/// Next card for the DM: drafted deck in a cycle, else a random draw.
fn next_card(state: &mut GameState, ctx: &mut StepContext<'_>) -> Option<ObstacleCard> {
    let id = state.mint_id("card");
    if state.dm_deck.is_empty() {
        return catalog::draw_card(state.timer, ctx.rng, id);
    }
    let index = state.dm_deck_pointer % state.dm_deck.len();
    state.dm_deck_pointer += 1;
    let mut card = state.dm_deck[index].clone();
    card.id = id;
    Some(card)
}

/// Draw one card into the hand unless it is already full.
pub(crate) fn draw_into_hand(state: &mut GameState, ctx: &mut StepContext<'_>) -> bool {
    if state.dm_hand.len() >= ctx.config.hand_size {
        return false;
    }
    match next_card(state, ctx) {
        Some(card) => {
            ctx.events.push(GameEvent::CardDrawn { name: card.name.clone() });
            state.dm_hand.push(card);
            true
        }
        None => false,
    }
}

/// Top the hand up to `hand_size`. Bounded by the hand size itself.
pub(crate) fn refill_hand(state: &mut GameState, ctx: &mut StepContext<'_>) {
    for _ in 0..ctx.config.hand_size {
        if !draw_into_hand(state, ctx) {
            break;
        }
    }
}

/// PREGAME/LOBBY -> PLAYING.
pub(crate) fn enter_playing(state: &mut GameState, ctx: &mut StepContext<'_>) {
    set_status(state, GameStatus::Playing, ctx);
    state.timer = ctx.config.game_duration_secs;
    state.last_resource_tick = ctx.now;
    state.last_card_draw_tick = ctx.now;
    state.dm_deck_pointer = 0;
    state.dm_draft_options.clear();
    refill_hand(state, ctx);

    let heroes: Vec<PlayerId> = state.players.values().filter(|p| p.is_hero()).map(|p| p.id.clone()).collect();
    for id in heroes {
        if let Some(player) = state.player_mut(&id) {
            player.draft_die_options.clear();
        }
        cash_in(state, &id, ctx);
    }
}

fn dm_draft_tier(deck_len: usize) -> CardTier {
    if deck_len >= 7 {
        CardTier::Advanced
    } else if deck_len >= 4 {
        CardTier::Neutral
    } else {
        CardTier::Basic
    }
}

fn dm_offer(state: &mut GameState, ctx: &mut StepContext<'_>) -> Vec<ObstacleCard> {
    let tier = dm_draft_tier(state.dm_deck.len());
    let mut offer = Vec::with_capacity(ctx.config.draft_options);
    for _ in 0..ctx.config.draft_options {
        let id = state.mint_id("draft-card");
        if let Some(card) = catalog::draw_card_of_tier(tier, ctx.rng, id) {
            offer.push(card);
        }
    }
    offer
}

/// Give a hero a die for carrying `item_id` (extra-die items only).
fn grant_item_die(state: &mut GameState, player_id: &PlayerId, item_id: &str, ctx: &mut StepContext<'_>) {
    let id = state.mint_id("die-tool");
    let mut die = dice::draft_die(id, 0, ctx.rng);
    die.granted_by = Some(item_id.to_string());
    if let Some(player) = state.player_mut(player_id) {
        player.dice_pool.push(die);
    }
    cash_in(state, player_id, ctx);
}

// =============================================================================
// LOBBY AND DRAFT
// =============================================================================

fn start_game(state: &mut GameState, player_id: &PlayerId, ctx: &mut StepContext<'_>) -> Outcome {
    ensure(state.status == GameStatus::Lobby, "game already started")?;
    ensure(state.host_id.as_ref() == Some(player_id), "only the host can start")?;

    let generated = generate_map(ctx.config, ctx.rng);
    let start = generated.start;
    state.map = generated.rooms.into_iter().map(|(id, room)| (id, Arc::new(room))).collect();

    state.dm_hand.clear();
    state.dm_deck.clear();
    state.dm_deck_pointer = 0;
    state.dm_resources = ctx.config.initial_dm_resources;
    state.last_super_charge_time = 0;

    let ids: Vec<PlayerId> = state.players.keys().cloned().collect();
    for id in &ids {
        let Some(player) = state.players.get_mut(id).map(Arc::make_mut) else { continue };
        player.reset_transient();
        if !player.is_hero() {
            player.is_ready = !ctx.config.draft_enabled;
            continue;
        }
        player.enter_room(start);
        player.inventory.push(STARTER_ITEM_ID.to_string());
        if ctx.config.draft_enabled {
            player.dice_pool = dice::starter_dice(id.as_str(), ctx.rng);
            if ctx.config.draft_steps == 0 {
                player.is_ready = true;
            } else {
                player.draft_die_options = dice::draft_offer(id.as_str(), 0, ctx.config, ctx.rng);
            }
        } else {
            player.dice_pool = dice::undrafted_pool(id.as_str(), ctx.config, ctx.rng);
            player.is_ready = true;
        }
    }

    if ctx.config.draft_enabled {
        set_status(state, GameStatus::Pregame, ctx);
        state.timer = ctx.config.pregame_duration_secs;
        state.dm_draft_options = dm_offer(state, ctx);
    } else {
        enter_playing(state, ctx);
    }
    Ok(())
}

fn draft_die(state: &mut GameState, player_id: &PlayerId, die_id: &str, ctx: &mut StepContext<'_>) -> Outcome {
    ensure(state.status == GameStatus::Pregame, "not drafting")?;
    let player = actor(state, player_id)?;
    ensure(player.is_hero(), "not a hero")?;
    ensure(!player.is_ready, "already drafted")?;
    ensure(player.draft_die_options.iter().any(|d| d.id == die_id), "die not on offer")?;

    let step = player.draft_step + 1;
    let next_offer = if step < ctx.config.draft_steps {
        dice::draft_offer(player_id.as_str(), step, ctx.config, ctx.rng)
    } else {
        Vec::new()
    };

    let player = actor_mut(state, player_id)?;
    let position = player.draft_die_options.iter().position(|d| d.id == die_id).ok_or(Rejection("die not on offer"))?;
    let chosen = player.draft_die_options.remove(position);
    player.dice_pool.push(chosen);
    player.draft_step = step;
    player.is_ready = next_offer.is_empty();
    player.draft_die_options = next_offer;
    Ok(())
}

fn draft_card(state: &mut GameState, player_id: &PlayerId, card_id: &str, ctx: &mut StepContext<'_>) -> Outcome {
    ensure(state.status == GameStatus::Pregame, "not drafting")?;
    let player = actor(state, player_id)?;
    ensure(player.is_dm(), "not the DM")?;
    ensure(!player.is_ready, "already drafted")?;
    ensure(state.dm_deck.len() < ctx.config.dm_deck_size, "deck full")?;
    let position = state
        .dm_draft_options
        .iter()
        .position(|c| c.id == card_id)
        .ok_or(Rejection("card not on offer"))?;

    let chosen = state.dm_draft_options.remove(position);
    state.dm_deck.push(chosen);

    if state.dm_deck.len() >= ctx.config.dm_deck_size {
        state.dm_draft_options.clear();
        actor_mut(state, player_id)?.is_ready = true;
    } else {
        state.dm_draft_options = dm_offer(state, ctx);
    }
    Ok(())
}

fn player_ready(state: &mut GameState, player_id: &PlayerId) -> Outcome {
    ensure(!state.status.is_terminal(), "game over")?;
    let player = actor(state, player_id)?;
    ensure(!player.is_ready, "already ready")?;
    actor_mut(state, player_id)?.is_ready = true;
    Ok(())
}

fn update_player(
    state: &mut GameState,
    player_id: &PlayerId,
    name: Option<&str>,
    role: Option<PlayerRole>,
    hero_class: Option<HeroClass>,
) -> Outcome {
    let player = actor_mut(state, player_id)?;
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        player.name = name.to_string();
    }
    if let Some(role) = role {
        player.role = role;
    }
    if hero_class.is_some() {
        player.hero_class = hero_class;
    }
    Ok(())
}

fn reset_lobby(state: &mut GameState, ctx: &mut StepContext<'_>) {
    set_status(state, GameStatus::Lobby, ctx);
    state.timer = ctx.config.game_duration_secs;
    state.dm_resources = ctx.config.initial_dm_resources;
    state.dm_hand.clear();
    state.dm_deck.clear();
    state.dm_deck_pointer = 0;
    state.dm_draft_options.clear();
    state.map.clear();
    state.last_resource_tick = 0;
    state.last_card_draw_tick = 0;
    state.last_super_charge_time = 0;
    for player in state.players.values_mut() {
        Arc::make_mut(player).reset_transient();
    }
}

fn admit_player(state: &mut GameState, incoming: &Player, ctx: &mut StepContext<'_>) -> Outcome {
    ensure(!incoming.id.as_str().is_empty(), "missing player id")?;

    let in_lobby = state.status == GameStatus::Lobby;
    if let Some(existing) = state.player_mut(&incoming.id) {
        if !incoming.name.is_empty() {
            existing.name = incoming.name.clone();
        }
        // Roles are fixed once the map is dealt
        if in_lobby {
            existing.role = incoming.role;
        }
        if incoming.hero_class.is_some() {
            existing.hero_class = incoming.hero_class;
        }
        return Ok(());
    }

    let mut player = Player::new(incoming.id.clone(), incoming.name.clone(), incoming.role);
    player.hero_class = incoming.hero_class;

    let late = state.status != GameStatus::Lobby;
    if late {
        player.is_ready = true;
        if player.is_hero() {
            if let Some(start) = state.start_room_id() {
                player.enter_room(start);
            }
            player.dice_pool = dice::undrafted_pool(incoming.id.as_str(), ctx.config, ctx.rng);
            player.inventory.push(STARTER_ITEM_ID.to_string());
        }
    }

    let id = player.id.clone();
    state.players.insert(id.clone(), Arc::new(player));
    // Headless hosts hand the START button to the first arrival
    if state.host_id.is_none() {
        state.host_id = Some(id.clone());
    }
    ctx.events.push(GameEvent::PlayerJoined { player_id: id.clone(), late });
    if late && state.status == GameStatus::Playing {
        cash_in(state, &id, ctx);
    }
    Ok(())
}

// =============================================================================
// HERO ACTIONS
// =============================================================================

fn move_player(state: &mut GameState, player_id: &PlayerId, direction: Direction, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    ensure(!player.is_moving, "already moving")?;
    let from = located(player)?;
    let previous = player.previous_room_id;
    let target = from.neighbor(direction);

    let room = state.room(from).ok_or(Rejection("room missing"))?;
    ensure(room.connects_to(target) && state.map.contains_key(&target), "no passage")?;
    if previous == Some(target) {
        let blocked = room
            .active_obstacles
            .iter()
            .any(|o| !o.is_defeated && o.card.special_rules.prevents_retreat);
        ensure(!blocked, "retreat blocked")?;
    }

    let player = actor_mut(state, player_id)?;
    player.unlock_all_dice();
    player.previous_room_id = Some(from);
    player.enter_room(target);
    player.is_moving = true;
    player.move_unlock_time = ctx.now + ctx.config.movement_delay_ms;

    resolve_room(state, from, ctx);
    Ok(())
}

fn use_die(
    state: &mut GameState,
    player_id: &PlayerId,
    die_id: &str,
    obstacle_id: &str,
    ctx: &mut StepContext<'_>,
) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    ensure(!player.is_moving, "moving")?;
    let room_id = located(player)?;
    let die = player.dice_pool.iter().find(|d| d.id == die_id).ok_or(Rejection("unknown die"))?;
    ensure(!die.is_locked(), "die already locked")?;
    let face = die.current_value();
    ensure(!face.is_resource(), "resource face")?;

    let obstacle = state
        .room(room_id)
        .and_then(|r| r.obstacle(obstacle_id))
        .ok_or(Rejection("obstacle not here"))?;
    ensure(!obstacle.is_defeated, "obstacle defeated")?;
    ensure(!obstacle.is_key_gated(), "obstacle needs a key")?;

    if obstacle.card.special_rules.accumulates_damage {
        let hit = if obstacle.requires(face) { die_power(die, player, face) } else { 0 };
        if hit > 0 {
            let now = ctx.now;
            let room = state.room_mut(room_id).ok_or(Rejection("room missing"))?;
            if let Some(target) = room.obstacle_mut(obstacle_id) {
                *target.permanent_successes.entry(face).or_insert(0) += hit;
            }
            room.recent_successes.push(now);
        }
        let player = actor_mut(state, player_id)?;
        if let Some(die) = player.die_mut(die_id) {
            die.roll(ctx.rng);
        }
        cash_in(state, player_id, ctx);
    } else {
        let player = actor_mut(state, player_id)?;
        if let Some(die) = player.die_mut(die_id) {
            die.locked_to_obstacle_id = Some(obstacle_id.to_string());
        }
    }

    resolve_room(state, room_id, ctx);
    Ok(())
}

fn unlock_die(state: &mut GameState, player_id: &PlayerId, die_id: &str, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    let room_id = located(player)?;
    let die = player.dice_pool.iter().find(|d| d.id == die_id).ok_or(Rejection("unknown die"))?;
    ensure(die.is_locked(), "die not locked")?;

    if let Some(die) = actor_mut(state, player_id)?.die_mut(die_id) {
        die.locked_to_obstacle_id = None;
    }
    resolve_room(state, room_id, ctx);
    Ok(())
}

fn reroll(state: &mut GameState, player_id: &PlayerId, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    ensure(
        ctx.now.saturating_sub(player.last_reroll_time) >= ctx.config.reroll_cooldown_ms,
        "reroll cooling down",
    )?;

    let player = actor_mut(state, player_id)?;
    for die in player.dice_pool.iter_mut().filter(|d| !d.is_locked()) {
        die.roll(ctx.rng);
    }
    player.last_reroll_time = ctx.now;
    cash_in(state, player_id, ctx);
    Ok(())
}

fn upgrade_die(state: &mut GameState, player_id: &PlayerId, die_id: &str, face_index: usize) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    ensure(player.upgrade_points > 0, "no upgrade points")?;
    ensure(face_index < 6, "no such face")?;
    let die = player.dice_pool.iter().find(|d| d.id == die_id).ok_or(Rejection("unknown die"))?;
    ensure(die.multipliers[face_index] == 1, "face already upgraded")?;
    ensure(!die.faces[face_index].is_resource(), "resource face")?;

    let player = actor_mut(state, player_id)?;
    if let Some(die) = player.die_mut(die_id) {
        die.multipliers[face_index] = 2;
    }
    player.upgrade_points -= 1;
    Ok(())
}

fn pickup_item(state: &mut GameState, player_id: &PlayerId, item_id: &str, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    let room_id = located(player)?;
    let room = state.room(room_id).ok_or(Rejection("room missing"))?;
    let position = room.items.iter().position(|i| i == item_id).ok_or(Rejection("item not here"))?;

    let taken = state.room_mut(room_id).ok_or(Rejection("room missing"))?.items.remove(position);
    actor_mut(state, player_id)?.inventory.push(taken);

    if catalog::item(item_id).is_some_and(|def| def.grants_extra_die) {
        grant_item_die(state, player_id, item_id, ctx);
    }
    // Carried bonuses count toward dice already locked here
    resolve_room(state, room_id, ctx);
    Ok(())
}

fn drop_item(state: &mut GameState, player_id: &PlayerId, item_id: &str, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    let room_id = located(player)?;
    let position = player.inventory.iter().position(|i| i == item_id).ok_or(Rejection("item not carried"))?;

    let player = actor_mut(state, player_id)?;
    let dropped = player.inventory.remove(position);
    if let Some(index) = player.dice_pool.iter().rposition(|d| d.granted_by.as_deref() == Some(item_id)) {
        player.dice_pool.remove(index);
    }
    state.room_mut(room_id).ok_or(Rejection("room missing"))?.items.push(dropped);

    resolve_room(state, room_id, ctx);
    Ok(())
}

fn buy_item(state: &mut GameState, player_id: &PlayerId, item_id: &str, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    let def = catalog::item(item_id).ok_or(Rejection("unknown item"))?;
    let price = def.price.ok_or(Rejection("not for sale"))?;
    ensure(player.gold >= price, "not enough gold")?;
    let room_id = player.current_room_id;

    let player = actor_mut(state, player_id)?;
    player.gold -= price;
    player.inventory.push(item_id.to_string());
    if def.grants_extra_die {
        grant_item_die(state, player_id, item_id, ctx);
    }
    if let Some(room_id) = room_id {
        resolve_room(state, room_id, ctx);
    }
    Ok(())
}

fn use_item(state: &mut GameState, player_id: &PlayerId, item_id: &str, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    let room_id = located(player)?;
    let position = player.inventory.iter().position(|i| i == item_id).ok_or(Rejection("item not carried"))?;
    let effect = catalog::item(item_id).and_then(|def| def.effect).ok_or(Rejection("item has no effect"))?;

    match effect {
        ItemEffect::Teleport => {
            let start = state.start_room_id().ok_or(Rejection("no start room"))?;
            relocate(state, player_id, start);
            resolve_room(state, room_id, ctx);
        }
        ItemEffect::TeleportOthers => {
            let others: Vec<(PlayerId, Option<RoomId>)> = state
                .players
                .values()
                .filter(|p| p.is_hero() && p.id != *player_id)
                .map(|p| (p.id.clone(), p.current_room_id))
                .collect();
            for (other, _) in &others {
                relocate(state, other, room_id);
            }
            let mut left: Vec<RoomId> = others.into_iter().filter_map(|(_, r)| r).filter(|r| *r != room_id).collect();
            left.sort();
            left.dedup();
            for old in left {
                resolve_room(state, old, ctx);
            }
            resolve_room(state, room_id, ctx);
        }
        ItemEffect::GrantUpgrade => {
            actor_mut(state, player_id)?.upgrade_points += 1;
        }
        ItemEffect::NukeObstacle(stat) => {
            let room = state.room_mut(room_id).ok_or(Rejection("room missing"))?;
            let mut nuked = Vec::new();
            for obstacle in room.active_obstacles.iter_mut() {
                if !obstacle.is_defeated && obstacle.requires(stat) {
                    obstacle.is_defeated = true;
                    nuked.push((obstacle.id.clone(), obstacle.card.name.clone()));
                }
            }
            for (obstacle_id, name) in nuked {
                for player in state.players.values_mut() {
                    if player.dice_pool.iter().any(|d| d.is_locked_to(&obstacle_id)) {
                        Arc::make_mut(player).unlock_dice_on(&obstacle_id);
                    }
                }
                ctx.events.push(GameEvent::ObstacleDefeated { room_id, obstacle_id, name });
            }
            resolve_room(state, room_id, ctx);
        }
    }

    let player = actor_mut(state, player_id)?;
    if player.inventory.get(position).map(String::as_str) == Some(item_id) {
        player.inventory.remove(position);
    }
    Ok(())
}

/// Instant move (no transit): drops every lock and cancels walking.
fn relocate(state: &mut GameState, player_id: &PlayerId, to: RoomId) {
    if let Some(player) = state.player_mut(player_id) {
        player.unlock_all_dice();
        player.previous_room_id = None;
        player.is_moving = false;
        player.enter_room(to);
    }
}

fn unlock_obstacle(state: &mut GameState, player_id: &PlayerId, obstacle_id: &str, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    let room_id = located(player)?;
    let obstacle = state
        .room(room_id)
        .and_then(|r| r.obstacle(obstacle_id))
        .ok_or(Rejection("obstacle not here"))?;
    ensure(!obstacle.is_defeated, "obstacle defeated")?;
    let key = obstacle.card.key_requirement.as_deref().ok_or(Rejection("obstacle is not locked"))?;
    ensure(player.inventory.iter().any(|i| i == key), "missing key")?;

    let room = state.room_mut(room_id).ok_or(Rejection("room missing"))?;
    let obstacle = room.obstacle_mut(obstacle_id).ok_or(Rejection("obstacle not here"))?;
    obstacle.is_defeated = true;
    let name = obstacle.card.name.clone();
    for player in state.players.values_mut() {
        if player.dice_pool.iter().any(|d| d.is_locked_to(obstacle_id)) {
            Arc::make_mut(player).unlock_dice_on(obstacle_id);
        }
    }
    ctx.events.push(GameEvent::ObstacleDefeated { room_id, obstacle_id: obstacle_id.to_string(), name });
    Ok(())
}

fn escape(state: &mut GameState, player_id: &PlayerId, ctx: &mut StepContext<'_>) -> Outcome {
    let player = hero_in_play(state, player_id)?;
    ensure(!player.is_moving, "moving")?;
    let room = state.room(located(player)?).ok_or(Rejection("room missing"))?;
    ensure(room.is_exit, "not at the exit")?;
    ensure(!room.has_undefeated_obstacles(), "exit still blocked")?;

    set_status(state, GameStatus::VictoryHero, ctx);
    Ok(())
}

// =============================================================================
// DM ACTIONS
// =============================================================================

fn place_trap(
    state: &mut GameState,
    player_id: &PlayerId,
    card_id: &str,
    room_id: RoomId,
    ctx: &mut StepContext<'_>,
) -> Outcome {
    dm_in_play(state, player_id)?;
    let position = state.dm_hand.iter().position(|c| c.id == card_id).ok_or(Rejection("card not in hand"))?;
    let cost = state.dm_hand[position].cost;
    ensure(state.dm_resources >= cost, "not enough resources")?;
    let room = state.room(room_id).ok_or(Rejection("no such room"))?;
    ensure(room.active_obstacles.is_empty(), "room already trapped")?;
    ensure(!state.room_is_occupied(room_id), "room occupied")?;

    state.dm_resources -= cost;
    let card = state.dm_hand.remove(position);
    let obstacle_id = state.mint_id("obs");
    ctx.events.push(GameEvent::TrapPlaced { room_id, name: card.name.clone() });
    state
        .room_mut(room_id)
        .ok_or(Rejection("no such room"))?
        .active_obstacles
        .push(RoomObstacle::new(obstacle_id, card));

    refill_hand(state, ctx);
    Ok(())
}

fn super_charge(state: &mut GameState, player_id: &PlayerId, room_id: RoomId, ctx: &mut StepContext<'_>) -> Outcome {
    dm_in_play(state, player_id)?;
    ensure(state.map.contains_key(&room_id), "no such room")?;
    let never_used = state.last_super_charge_time == 0;
    ensure(
        never_used || ctx.now.saturating_sub(state.last_super_charge_time) > ctx.config.supercharge_cooldown_ms,
        "supercharge cooling down",
    )?;

    let until = ctx.now + ctx.config.supercharge_duration_ms;
    state.last_super_charge_time = ctx.now;
    state.room_mut(room_id).ok_or(Rejection("no such room"))?.super_charge_unlock_time = until;
    ctx.events.push(GameEvent::RoomSupercharged { room_id, until });
    resolve_room(state, room_id, ctx);
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Die, SpecialRules, StatType};
    use crate::game::testing::{corridor_game, obstacle, DM, HERO, NOW};

    fn run(state: &GameState, action: Action, now: u64) -> (GameState, Option<Rejection>) {
        let config = GameConfig { draft_enabled: false, ..Default::default() };
        let mut rng = DeterministicRng::new(77);
        let mut ctx = StepContext::new(now, &mut rng, &config);
        let next = apply(state, &action, &mut ctx);
        (next, ctx.rejection)
    }

    fn hero(state: &GameState) -> &Player {
        state.player(&PlayerId::new(HERO)).unwrap()
    }

    fn set_die(state: &mut GameState, face: StatType, multiplier: u32) -> String {
        let player = state.player_mut(&PlayerId::new(HERO)).unwrap();
        let mut die = Die::new("fixed", [face; 6]);
        die.multipliers = [multiplier; 6];
        player.dice_pool = vec![die];
        "fixed".to_string()
    }

    #[test]
    fn test_move_without_passage_is_noop() {
        let state = corridor_game();
        // The corridor runs east-west; there is nothing to the north
        let (next, rejection) = run(&state, Action::Move { player_id: PlayerId::new(HERO), direction: Direction::N }, NOW);
        assert_eq!(next, state);
        assert_eq!(rejection, Some(Rejection("no passage")));
    }

    #[test]
    fn test_move_starts_transit() {
        let state = corridor_game();
        let (next, rejection) = run(&state, Action::Move { player_id: PlayerId::new(HERO), direction: Direction::E }, NOW);
        assert!(rejection.is_none());
        let p = hero(&next);
        assert_eq!(p.current_room_id, Some(RoomId::new(1, 0)));
        assert_eq!(p.previous_room_id, Some(RoomId::new(0, 0)));
        assert!(p.is_moving);
        assert_eq!(p.move_unlock_time, NOW + 3_000);
        assert!(p.visited_rooms.contains(&RoomId::new(1, 0)));

        // Can't move again mid-transit
        let (again, rejection) = run(&next, Action::Move { player_id: PlayerId::new(HERO), direction: Direction::E }, NOW + 10);
        assert_eq!(again, next);
        assert_eq!(rejection, Some(Rejection("already moving")));
    }

    #[test]
    fn test_move_unlocks_dice() {
        let mut state = corridor_game();
        state.room_mut(RoomId::new(0, 0)).unwrap().active_obstacles.push(obstacle("o1", &[(StatType::Muscle, 9)], SpecialRules::NONE));
        let die_id = set_die(&mut state, StatType::Muscle, 1);
        let (locked, _) = run(&state, Action::UseDie { player_id: PlayerId::new(HERO), die_id: die_id.clone(), obstacle_id: "o1".into() }, NOW);
        assert!(hero(&locked).dice_pool[0].is_locked());

        let (moved, _) = run(&locked, Action::Move { player_id: PlayerId::new(HERO), direction: Direction::E }, NOW);
        assert!(!hero(&moved).dice_pool[0].is_locked());
        let left = moved.room(RoomId::new(0, 0)).unwrap();
        assert_eq!(left.active_obstacles[0].current_successes.get(&StatType::Muscle), Some(&0));
    }

    #[test]
    fn test_retreat_blocked() {
        let mut state = corridor_game();
        {
            let p = state.player_mut(&PlayerId::new(HERO)).unwrap();
            p.current_room_id = Some(RoomId::new(1, 0));
            p.previous_room_id = Some(RoomId::new(0, 0));
        }
        let rules = SpecialRules { prevents_retreat: true, ..SpecialRules::NONE };
        state.room_mut(RoomId::new(1, 0)).unwrap().active_obstacles.push(obstacle("web", &[(StatType::Smarts, 2)], rules));

        let (back, rejection) = run(&state, Action::Move { player_id: PlayerId::new(HERO), direction: Direction::W }, NOW);
        assert_eq!(back, state);
        assert_eq!(rejection, Some(Rejection("retreat blocked")));

        // Forward is fine
        let (forward, rejection) = run(&state, Action::Move { player_id: PlayerId::new(HERO), direction: Direction::E }, NOW);
        assert!(rejection.is_none());
        assert_eq!(hero(&forward).current_room_id, Some(RoomId::new(2, 0)));
    }

    #[test]
    fn test_use_die_locks_and_defeats() {
        let mut state = corridor_game();
        state.room_mut(RoomId::new(0, 0)).unwrap().active_obstacles.push(obstacle("o1", &[(StatType::Muscle, 4)], SpecialRules::NONE));
        state.player_mut(&PlayerId::new(HERO)).unwrap().hero_class = Some(HeroClass::Fighter);
        let die_id = set_die(&mut state, StatType::Muscle, 2);

        let (next, rejection) = run(&state, Action::UseDie { player_id: PlayerId::new(HERO), die_id, obstacle_id: "o1".into() }, NOW);

        assert!(rejection.is_none());
        let room = next.room(RoomId::new(0, 0)).unwrap();
        assert_eq!(room.active_obstacles[0].current_successes.get(&StatType::Muscle), Some(&4));
        assert!(room.active_obstacles[0].is_defeated);
        assert!(!hero(&next).dice_pool[0].is_locked());
    }

    #[test]
    fn test_use_die_rejects_resource_face() {
        let mut state = corridor_game();
        state.room_mut(RoomId::new(0, 0)).unwrap().active_obstacles.push(obstacle("o1", &[(StatType::Muscle, 4)], SpecialRules::NONE));
        let die_id = set_die(&mut state, StatType::Gold, 1);

        let (next, rejection) = run(&state, Action::UseDie { player_id: PlayerId::new(HERO), die_id, obstacle_id: "o1".into() }, NOW);
        assert_eq!(next, state);
        assert_eq!(rejection, Some(Rejection("resource face")));
    }

    #[test]
    fn test_accumulating_damage() {
        let mut state = corridor_game();
        let rules = SpecialRules { accumulates_damage: true, ..SpecialRules::NONE };
        state.room_mut(RoomId::new(0, 0)).unwrap().active_obstacles.push(obstacle("troll", &[(StatType::Muscle, 3)], rules));
        let die_id = set_die(&mut state, StatType::Muscle, 2);

        let (hit, _) = run(&state, Action::UseDie { player_id: PlayerId::new(HERO), die_id: die_id.clone(), obstacle_id: "troll".into() }, NOW);
        let troll = &hit.room(RoomId::new(0, 0)).unwrap().active_obstacles[0];
        assert_eq!(troll.permanent_successes.get(&StatType::Muscle), Some(&2));
        assert!(!troll.is_defeated);
        assert!(!hero(&hit).dice_pool[0].is_locked());

        let (second, _) = run(&hit, Action::UseDie { player_id: PlayerId::new(HERO), die_id, obstacle_id: "troll".into() }, NOW + 1);
        let troll = &second.room(RoomId::new(0, 0)).unwrap().active_obstacles[0];
        assert_eq!(troll.permanent_successes.get(&StatType::Muscle), Some(&4));
        assert!(troll.is_defeated);
    }

    #[test]
    fn test_unlock_die() {
        let mut state = corridor_game();
        state.room_mut(RoomId::new(0, 0)).unwrap().active_obstacles.push(obstacle("o1", &[(StatType::Muscle, 9)], SpecialRules::NONE));
        let die_id = set_die(&mut state, StatType::Muscle, 1);
        let (locked, _) = run(&state, Action::UseDie { player_id: PlayerId::new(HERO), die_id: die_id.clone(), obstacle_id: "o1".into() }, NOW);

        let (unlocked, rejection) = run(&locked, Action::UnlockDie { player_id: PlayerId::new(HERO), die_id: die_id.clone() }, NOW);
        assert!(rejection.is_none());
        assert!(!hero(&unlocked).dice_pool[0].is_locked());
        let obstacle = &unlocked.room(RoomId::new(0, 0)).unwrap().active_obstacles[0];
        assert_eq!(obstacle.current_successes.get(&StatType::Muscle), Some(&0));

        let (_, rejection) = run(&unlocked, Action::UnlockDie { player_id: PlayerId::new(HERO), die_id }, NOW);
        assert_eq!(rejection, Some(Rejection("die not locked")));
    }

    #[test]
    fn test_reroll_cooldown() {
        let state = corridor_game();
        let (first, rejection) = run(&state, Action::Reroll { player_id: PlayerId::new(HERO) }, NOW);
        assert!(rejection.is_none());
        assert_eq!(hero(&first).last_reroll_time, NOW);

        let (early, rejection) = run(&first, Action::Reroll { player_id: PlayerId::new(HERO) }, NOW + 1_999);
        assert_eq!(early, first);
        assert_eq!(rejection, Some(Rejection("reroll cooling down")));

        let (_, rejection) = run(&first, Action::Reroll { player_id: PlayerId::new(HERO) }, NOW + 2_000);
        assert!(rejection.is_none());
    }

    #[test]
    fn test_reroll_keeps_locked_dice() {
        let mut state = corridor_game();
        state.room_mut(RoomId::new(0, 0)).unwrap().active_obstacles.push(obstacle("o1", &[(StatType::Muscle, 9)], SpecialRules::NONE));
        {
            let p = state.player_mut(&PlayerId::new(HERO)).unwrap();
            let mut die = Die::new("held", StatType::ATTRIBUTES);
            die.current_face = 0;
            die.locked_to_obstacle_id = Some("o1".into());
            p.dice_pool.push(die);
        }
        for offset in 0..20 {
            let (next, _) = run(&state, Action::Reroll { player_id: PlayerId::new(HERO) }, NOW + offset * 5_000);
            let held = hero(&next).dice_pool.iter().find(|d| d.id == "held").unwrap();
            assert_eq!(held.current_face, 0);
            assert!(held.is_locked());
        }
    }

    #[test]
    fn test_upgrade_die() {
        let mut state = corridor_game();
        let die_id = set_die(&mut state, StatType::Agility, 1);

        let (_, rejection) = run(&state, Action::UpgradeDie { player_id: PlayerId::new(HERO), die_id: die_id.clone(), face_index: 2 }, NOW);
        assert_eq!(rejection, Some(Rejection("no upgrade points")));

        state.player_mut(&PlayerId::new(HERO)).unwrap().upgrade_points = 1;
        let (next, rejection) = run(&state, Action::UpgradeDie { player_id: PlayerId::new(HERO), die_id: die_id.clone(), face_index: 2 }, NOW);
        assert!(rejection.is_none());
        assert_eq!(hero(&next).dice_pool[0].multipliers[2], 2);
        assert_eq!(hero(&next).upgrade_points, 0);

        let mut again = next.clone();
        again.player_mut(&PlayerId::new(HERO)).unwrap().upgrade_points = 1;
        let (_, rejection) = run(&again, Action::UpgradeDie { player_id: PlayerId::new(HERO), die_id, face_index: 2 }, NOW);
        assert_eq!(rejection, Some(Rejection("face already upgraded")));
    }

    #[test]
    fn test_pickup_and_drop_tools() {
        let mut state = corridor_game();
        state.room_mut(RoomId::new(0, 0)).unwrap().items.push("ITEM_TOOLS".into());
        let before = hero(&state).dice_pool.len();

        let (picked, rejection) = run(&state, Action::PickupItem { player_id: PlayerId::new(HERO), item_id: "ITEM_TOOLS".into() }, NOW);
        assert!(rejection.is_none());
        assert!(hero(&picked).inventory.contains(&"ITEM_TOOLS".to_string()));
        assert_eq!(hero(&picked).dice_pool.len(), before + 1);
        assert!(picked.room(RoomId::new(0, 0)).unwrap().items.is_empty());

        let (dropped, rejection) = run(&picked, Action::DropItem { player_id: PlayerId::new(HERO), item_id: "ITEM_TOOLS".into() }, NOW);
        assert!(rejection.is_none());
        assert_eq!(hero(&dropped).dice_pool.len(), before);
        assert_eq!(dropped.room(RoomId::new(0, 0)).unwrap().items, vec!["ITEM_TOOLS".to_string()]);
    }

    #[test]
    fn test_buy_item() {
        let mut state = corridor_game();
        let (_, rejection) = run(&state, Action::BuyItem { player_id: PlayerId::new(HERO), item_id: "ITEM_SWORD".into() }, NOW);
        assert_eq!(rejection, Some(Rejection("not enough gold")));

        state.player_mut(&PlayerId::new(HERO)).unwrap().gold = 10;
        let (next, rejection) = run(&state, Action::BuyItem { player_id: PlayerId::new(HERO), item_id: "ITEM_SWORD".into() }, NOW);
        assert!(rejection.is_none());
        assert_eq!(hero(&next).gold, 6);
        assert!(hero(&next).inventory.contains(&"ITEM_SWORD".to_string()));

        let (_, rejection) = run(&state, Action::BuyItem { player_id: PlayerId::new(HERO), item_id: "RED_KEY".into() }, NOW);
        assert_eq!(rejection, Some(Rejection("not for sale")));
    }


    fn locked_muscle_die(state: &mut GameState) {
        state.room_mut(RoomId::new(0, 0)).unwrap().active_obstacles.push(obstacle("o1", &[(StatType::Muscle, 2)], SpecialRules::NONE));
        set_die(state, StatType::Muscle, 1);
        state.player_mut(&PlayerId::new(HERO)).unwrap().dice_pool[0].locked_to_obstacle_id = Some("o1".into());
    }

    #[test]
    fn test_pickup_sword_counts_toward_locked_die() {
        let mut state = corridor_game();
        locked_muscle_die(&mut state);
        state.room_mut(RoomId::new(0, 0)).unwrap().items.push("ITEM_SWORD".into());

        let (next, rejection) = run(&state, Action::PickupItem { player_id: PlayerId::new(HERO), item_id: "ITEM_SWORD".into() }, NOW);

        assert!(rejection.is_none());
        assert!(next.room(RoomId::new(0, 0)).unwrap().obstacle("o1").unwrap().is_defeated);
        assert!(!hero(&next).dice_pool[0].is_locked());
    }

    #[test]
    fn test_bought_sword_counts_toward_locked_die() {
        let mut state = corridor_game();
        locked_muscle_die(&mut state);
        state.player_mut(&PlayerId::new(HERO)).unwrap().gold = 4;

        let (next, rejection) = run(&state, Action::BuyItem { player_id: PlayerId::new(HERO), item_id: "ITEM_SWORD".into() }, NOW);

        assert!(rejection.is_none());
        assert!(next.room(RoomId::new(0, 0)).unwrap().obstacle("o1").unwrap().is_defeated);
    }

    #[test]
    fn test_teleport_scroll() {
        let mut state = corridor_game();
        {
            let p = state.player_mut(&PlayerId::new(HERO)).unwrap();
            p.current_room_id = Some(RoomId::new(2, 0));
            p.is_moving = true;
        }
        let (next, rejection) = run(&state, Action::UseItem { player_id: PlayerId::new(HERO), item_id: STARTER_ITEM_ID.into() }, NOW);
        assert!(rejection.is_none());
        let p = hero(&next);
        assert_eq!(p.current_room_id, Some(RoomId::new(0, 0)));
        assert!(!p.is_moving);
        assert!(!p.inventory.contains(&STARTER_ITEM_ID.to_string()));
    }

    #[test]
    fn test_summon_others() {
        let mut state = corridor_game();
        let mut ally = Player::new(PlayerId::new("ally"), "Ally", PlayerRole::Hero);
        ally.current_room_id = Some(RoomId::new(2, 0));
        state.players.insert(ally.id.clone(), Arc::new(ally));
        state.player_mut(&PlayerId::new(HERO)).unwrap().inventory.push("ITEM_SUMMON".into());

        let (next, rejection) = run(&state, Action::UseItem { player_id: PlayerId::new(HERO), item_id: "ITEM_SUMMON".into() }, NOW);
        assert!(rejection.is_none());
        assert_eq!(next.player(&PlayerId::new("ally")).unwrap().current_room_id, Some(RoomId::new(0, 0)));
        // The DM is not a hero and stays put
        assert_eq!(next.player(&PlayerId::new(DM)).unwrap().current_room_id, None);
    }

    #[test]
    fn test_potion_grants_point() {
        let mut state = corridor_game();
        state.player_mut(&PlayerId::new(HERO)).unwrap().inventory.push("ITEM_POTION_UPGRADE".into());
        let (next, _) = run(&state, Action::UseItem { player_id: PlayerId::new(HERO), item_id: "ITEM_POTION_UPGRADE".into() }, NOW);
        assert_eq!(hero(&next).upgrade_points, 1);
        assert!(hero(&next).inventory.iter().all(|i| i != "ITEM_POTION_UPGRADE"));
    }

    #[test]
    fn test_bomb_nukes_matching() {
        let mut state = corridor_game();
        {
            let room = state.room_mut(RoomId::new(0, 0)).unwrap();
            room.active_obstacles.push(obstacle("pit", &[(StatType::Agility, 6)], SpecialRules::NONE));
            room.active_obstacles.push(obstacle("ogre", &[(StatType::Muscle, 8)], SpecialRules::NONE));
        }
        state.player_mut(&PlayerId::new(HERO)).unwrap().inventory.push("ITEM_BOMB_FIRE".into());

        let (next, rejection) = run(&state, Action::UseItem { player_id: PlayerId::new(HERO), item_id: "ITEM_BOMB_FIRE".into() }, NOW);
        assert!(rejection.is_none());
        let room = next.room(RoomId::new(0, 0)).unwrap();
        assert!(room.obstacle("pit").unwrap().is_defeated);
        assert!(!room.obstacle("ogre").unwrap().is_defeated);
    }


    #[test]
    fn test_fire_bomb_opens_red_door() {
        let mut state = corridor_game();
        state
            .room_mut(RoomId::new(0, 0))
            .unwrap()
            .active_obstacles
            .push(RoomObstacle::new("door", catalog::RED_DOOR.instantiate("c")));
        state.player_mut(&PlayerId::new(HERO)).unwrap().inventory.push("ITEM_BOMB_FIRE".into());

        let (next, rejection) = run(&state, Action::UseItem { player_id: PlayerId::new(HERO), item_id: "ITEM_BOMB_FIRE".into() }, NOW);

        assert!(rejection.is_none());
        assert!(next.room(RoomId::new(0, 0)).unwrap().obstacle("door").unwrap().is_defeated);
        assert!(hero(&next).inventory.iter().all(|i| i != "ITEM_BOMB_FIRE"));
    }

    #[test]
    fn test_item_without_effect_rejected() {
        let mut state = corridor_game();
        state.player_mut(&PlayerId::new(HERO)).unwrap().inventory.push("ITEM_SWORD".into());
        let (next, rejection) = run(&state, Action::UseItem { player_id: PlayerId::new(HERO), item_id: "ITEM_SWORD".into() }, NOW);
        assert_eq!(next, state);
        assert_eq!(rejection, Some(Rejection("item has no effect")));
    }

    #[test]
    fn test_unlock_obstacle_with_key() {
        let mut state = corridor_game();
        state
            .room_mut(RoomId::new(0, 0))
            .unwrap()
            .active_obstacles
            .push(RoomObstacle::new("door", catalog::RED_DOOR.instantiate("c")));

        let (_, rejection) = run(&state, Action::UnlockObstacle { player_id: PlayerId::new(HERO), obstacle_id: "door".into() }, NOW);
        assert_eq!(rejection, Some(Rejection("missing key")));

        state.player_mut(&PlayerId::new(HERO)).unwrap().inventory.push(catalog::RED_KEY_ID.into());
        let (next, rejection) = run(&state, Action::UnlockObstacle { player_id: PlayerId::new(HERO), obstacle_id: "door".into() }, NOW);
        assert!(rejection.is_none());
        assert!(next.room(RoomId::new(0, 0)).unwrap().obstacle("door").unwrap().is_defeated);
    }

    #[test]
    fn test_place_trap_insufficient_resources() {
        let mut state = corridor_game();
        state.dm_resources = 3;
        let mut card = catalog::OBSTACLE_DECK[0].instantiate("pricey");
        card.cost = 4;
        state.dm_hand = vec![card];

        let (next, rejection) = run(
            &state,
            Action::DmPlaceTrap { player_id: PlayerId::new(DM), card_id: "pricey".into(), room_id: RoomId::new(2, 0) },
            NOW,
        );
        assert_eq!(rejection, Some(Rejection("not enough resources")));
        assert_eq!(next.dm_resources, 3);
        assert_eq!(next.dm_hand.len(), 1);
        assert_eq!(next.dm_hand[0].id, "pricey");
    }

    #[test]
    fn test_place_trap() {
        let mut state = corridor_game();
        state.dm_resources = 5;
        let card = catalog::OBSTACLE_DECK[0].instantiate("cheap");
        let cost = card.cost;
        state.dm_hand = vec![card];

        // Occupied room refused
        let (_, rejection) = run(
            &state,
            Action::DmPlaceTrap { player_id: PlayerId::new(DM), card_id: "cheap".into(), room_id: RoomId::new(0, 0) },
            NOW,
        );
        assert_eq!(rejection, Some(Rejection("room occupied")));

        let (next, rejection) = run(
            &state,
            Action::DmPlaceTrap { player_id: PlayerId::new(DM), card_id: "cheap".into(), room_id: RoomId::new(2, 0) },
            NOW,
        );
        assert!(rejection.is_none());
        assert_eq!(next.dm_resources, 5 - cost);
        assert_eq!(next.room(RoomId::new(2, 0)).unwrap().active_obstacles.len(), 1);
        assert_eq!(next.dm_hand.len(), 3);
        assert!(next.dm_hand.iter().all(|c| c.id != "cheap"));

        // Heroes cannot place traps
        let (_, rejection) = run(
            &state,
            Action::DmPlaceTrap { player_id: PlayerId::new(HERO), card_id: "cheap".into(), room_id: RoomId::new(2, 0) },
            NOW,
        );
        assert_eq!(rejection, Some(Rejection("not the DM")));
    }

    #[test]
    fn test_place_trap_cycles_drafted_deck() {
        let mut state = corridor_game();
        state.dm_resources = 10;
        state.dm_deck = vec![catalog::OBSTACLE_DECK[1].instantiate("deck-a")];
        state.dm_hand = vec![catalog::OBSTACLE_DECK[0].instantiate("h1")];

        let (next, _) = run(
            &state,
            Action::DmPlaceTrap { player_id: PlayerId::new(DM), card_id: "h1".into(), room_id: RoomId::new(2, 0) },
            NOW,
        );
        assert_eq!(next.dm_hand.len(), 3);
        assert!(next.dm_hand.iter().all(|c| c.name == catalog::OBSTACLE_DECK[1].name));
        assert_eq!(next.dm_deck_pointer, 3);
        let ids: std::collections::BTreeSet<_> = next.dm_hand.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_super_charge_cooldown() {
        let state = corridor_game();
        let action = Action::SuperChargeRoom { player_id: PlayerId::new(DM), room_id: RoomId::new(1, 0) };

        let (charged, rejection) = run(&state, action.clone(), NOW);
        assert!(rejection.is_none());
        assert_eq!(charged.room(RoomId::new(1, 0)).unwrap().super_charge_unlock_time, NOW + 20_000);
        assert!(charged.room(RoomId::new(1, 0)).unwrap().is_supercharged(NOW + 1));

        let (_, rejection) = run(&charged, action.clone(), NOW + 60_000);
        assert_eq!(rejection, Some(Rejection("supercharge cooling down")));
        let (_, rejection) = run(&charged, action, NOW + 60_001);
        assert!(rejection.is_none());
    }

    #[test]
    fn test_escape() {
        let mut state = corridor_game();
        state.player_mut(&PlayerId::new(HERO)).unwrap().current_room_id = Some(RoomId::new(2, 0));

        let (next, rejection) = run(&state, Action::EscapeDungeon { player_id: PlayerId::new(HERO) }, NOW);
        assert!(rejection.is_none());
        assert_eq!(next.status, GameStatus::VictoryHero);

        // Terminal: nothing else goes through
        let (after, rejection) = run(&next, Action::Reroll { player_id: PlayerId::new(HERO) }, NOW);
        assert_eq!(after, next);
        assert!(rejection.is_some());
    }

    #[test]
    fn test_escape_blocked() {
        let mut state = corridor_game();
        state.player_mut(&PlayerId::new(HERO)).unwrap().current_room_id = Some(RoomId::new(2, 0));
        state.room_mut(RoomId::new(2, 0)).unwrap().active_obstacles.push(obstacle("guard", &[(StatType::Muscle, 2)], SpecialRules::NONE));

        let (next, rejection) = run(&state, Action::EscapeDungeon { player_id: PlayerId::new(HERO) }, NOW);
        assert_eq!(next.status, GameStatus::Playing);
        assert_eq!(rejection, Some(Rejection("exit still blocked")));

        let (_, rejection) = run(&corridor_game(), Action::EscapeDungeon { player_id: PlayerId::new(HERO) }, NOW);
        assert_eq!(rejection, Some(Rejection("not at the exit")));
    }

    #[test]
    fn test_update_player_keeps_name() {
        let state = corridor_game();
        let (next, _) = run(
            &state,
            Action::UpdatePlayer { player_id: PlayerId::new(HERO), name: None, role: None, hero_class: Some(HeroClass::Wizard) },
            NOW,
        );
        assert_eq!(hero(&next).name, hero(&state).name);
        assert_eq!(hero(&next).hero_class, Some(HeroClass::Wizard));

        let (renamed, _) = run(
            &state,
            Action::UpdatePlayer { player_id: PlayerId::new(HERO), name: Some("Zed".into()), role: None, hero_class: None },
            NOW,
        );
        assert_eq!(hero(&renamed).name, "Zed");
    }

    #[test]
    fn test_reset_lobby() {
        let mut state = corridor_game();
        state.status = GameStatus::VictoryDm;
        state.dm_resources = 0;

        let (next, rejection) = run(&state, Action::ResetLobby, NOW);
        assert!(rejection.is_none());
        assert_eq!(next.status, GameStatus::Lobby);
        assert!(next.map.is_empty());
        assert_eq!(next.dm_resources, 8);
        assert!(next.dm_hand.is_empty());
        assert_eq!(next.players.len(), state.players.len());
        assert!(hero(&next).dice_pool.is_empty());
        assert_eq!(hero(&next).name, hero(&state).name);
    }

    #[test]
    fn test_start_game_host_only() {
        let config = GameConfig::default();
        let host = Player::new(PlayerId::new("host"), "Host", PlayerRole::Hero);
        let mut lobby = GameState::with_host(&config, host);
        let guest = Player::new(PlayerId::new("guest"), "Guest", PlayerRole::Dm);
        lobby.players.insert(guest.id.clone(), Arc::new(guest));

        let mut rng = DeterministicRng::new(1);
        let mut ctx = StepContext::new(NOW, &mut rng, &config);
        let refused = apply(&lobby, &Action::StartGame { player_id: PlayerId::new("guest") }, &mut ctx);
        assert_eq!(refused, lobby);

        let started = apply(&lobby, &Action::StartGame { player_id: PlayerId::new("host") }, &mut ctx);
        assert_eq!(started.status, GameStatus::Pregame);
        assert_eq!(started.timer, config.pregame_duration_secs);
        assert_eq!(started.map.len(), 64);
        let host = started.player(&PlayerId::new("host")).unwrap();
        assert_eq!(host.current_room_id, started.start_room_id());
        assert_eq!(host.dice_pool.len(), 1);
        assert_eq!(host.draft_die_options.len(), 3);
        assert_eq!(host.inventory, vec![STARTER_ITEM_ID.to_string()]);
        assert_eq!(started.dm_draft_options.len(), 3);
        assert!(started.dm_draft_options.iter().all(|c| c.tier == CardTier::Basic));
    }

    #[test]
    fn test_draft_flow() {
        let config = GameConfig::default();
        let host = Player::new(PlayerId::new("host"), "Host", PlayerRole::Hero);
        let mut lobby = GameState::with_host(&config, host);
        let dm = Player::new(PlayerId::new("dm"), "DM", PlayerRole::Dm);
        lobby.players.insert(dm.id.clone(), Arc::new(dm));

        let mut rng = DeterministicRng::new(2);
        let mut ctx = StepContext::new(NOW, &mut rng, &config);
        let mut state = apply(&lobby, &Action::StartGame { player_id: PlayerId::new("host") }, &mut ctx);

        for _ in 0..config.draft_steps {
            let pick = state.player(&PlayerId::new("host")).unwrap().draft_die_options[0].id.clone();
            state = apply(&state, &Action::DraftDie { player_id: PlayerId::new("host"), die_id: pick }, &mut ctx);
            assert!(ctx.rejection.is_none());
        }
        let host = state.player(&PlayerId::new("host")).unwrap();
        assert!(host.is_ready);
        assert_eq!(host.dice_pool.len(), 1 + config.draft_steps as usize);
        assert!(host.draft_die_options.is_empty());

        for pick in 0..config.dm_deck_size {
            if pick == 4 {
                assert!(state.dm_draft_options.iter().all(|c| c.tier == CardTier::Neutral));
            }
            if pick == 7 {
                assert!(state.dm_draft_options.iter().all(|c| c.tier == CardTier::Advanced));
            }
            let card = state.dm_draft_options[0].id.clone();
            state = apply(&state, &Action::DraftCard { player_id: PlayerId::new("dm"), card_id: card }, &mut ctx);
            assert!(ctx.rejection.is_none());
        }
        assert_eq!(state.dm_deck.len(), config.dm_deck_size);
        assert!(state.player(&PlayerId::new("dm")).unwrap().is_ready);
        assert!(state.all_players_ready());
    }


    #[test]
    fn test_zero_draft_steps_ready_at_start() {
        let config = GameConfig { draft_steps: 0, ..GameConfig::default() };
        let host = Player::new(PlayerId::new("host"), "Host", PlayerRole::Hero);
        let lobby = GameState::with_host(&config, host);

        let mut rng = DeterministicRng::new(5);
        let mut ctx = StepContext::new(NOW, &mut rng, &config);
        let started = apply(&lobby, &Action::StartGame { player_id: PlayerId::new("host") }, &mut ctx);

        assert_eq!(started.status, GameStatus::Pregame);
        let host = started.player(&PlayerId::new("host")).unwrap();
        assert!(host.is_ready);
        assert!(host.draft_die_options.is_empty());
        assert_eq!(host.dice_pool.len(), 1);
    }

    #[test]
    fn test_late_join() {
        let state = corridor_game();
        let config = GameConfig::default();
        let mut rng = DeterministicRng::new(3);
        let mut ctx = StepContext::new(NOW, &mut rng, &config);
        let newcomer = Player::new(PlayerId::new("late"), "Late", PlayerRole::Hero);

        let next = admit(&state, &newcomer, &mut ctx);

        let late = next.player(&PlayerId::new("late")).unwrap();
        assert_eq!(late.current_room_id, Some(RoomId::new(0, 0)));
        assert_eq!(late.dice_pool.len(), 1 + config.draft_steps as usize);
        assert!(late.inventory.contains(&STARTER_ITEM_ID.to_string()));
        assert!(ctx.events.iter().any(|e| matches!(e, GameEvent::PlayerJoined { late: true, .. })));

        // Rejoining with the same id does not duplicate
        let renamed = Player::new(PlayerId::new("late"), "Later", PlayerRole::Hero);
        let again = admit(&next, &renamed, &mut ctx);
        assert_eq!(again.players.len(), next.players.len());
        assert_eq!(again.player(&PlayerId::new("late")).unwrap().name, "Later");
        assert_eq!(again.player(&PlayerId::new("late")).unwrap().dice_pool.len(), late.dice_pool.len());
    }


    #[test]
    fn test_rejoin_keeps_role_mid_game() {
        let state = corridor_game();
        let config = GameConfig::default();
        let mut rng = DeterministicRng::new(6);
        let mut ctx = StepContext::new(NOW, &mut rng, &config);

        let as_dm = Player::new(PlayerId::new(HERO), "Turncoat", PlayerRole::Dm);
        let next = admit(&state, &as_dm, &mut ctx);

        let rejoined = hero(&next);
        assert_eq!(rejoined.role, PlayerRole::Hero);
        assert_eq!(rejoined.name, "Turncoat");
        assert_eq!(rejoined.current_room_id, hero(&state).current_room_id);
        assert_eq!(rejoined.dice_pool, hero(&state).dice_pool);
    }

    #[test]
    fn test_rejoin_changes_role_in_lobby() {
        let config = GameConfig::default();
        let host = Player::new(PlayerId::new("host"), "Host", PlayerRole::Hero);
        let lobby = GameState::with_host(&config, host);
        let mut rng = DeterministicRng::new(7);
        let mut ctx = StepContext::new(NOW, &mut rng, &config);

        let next = admit(&lobby, &Player::new(PlayerId::new("host"), "Host", PlayerRole::Dm), &mut ctx);

        assert_eq!(next.player(&PlayerId::new("host")).unwrap().role, PlayerRole::Dm);
    }

    #[test]
    fn test_first_joiner_becomes_host() {
        let config = GameConfig::default();
        let empty = GameState::new(&config);
        let mut rng = DeterministicRng::new(4);
        let mut ctx = StepContext::new(NOW, &mut rng, &config);

        let one = admit(&empty, &Player::new(PlayerId::new("first"), "First", PlayerRole::Hero), &mut ctx);
        let two = admit(&one, &Player::new(PlayerId::new("second"), "Second", PlayerRole::Dm), &mut ctx);

        assert_eq!(two.host_id, Some(PlayerId::new("first")));
        assert_eq!(two.players.len(), 2);
        assert!(two.player(&PlayerId::new("second")).unwrap().dice_pool.is_empty());
    }

    #[test]
    fn test_action_wire_format() {
        let action = Action::UseDie { player_id: PlayerId::new("p"), die_id: "d1".into(), obstacle_id: "o1".into() };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"type":"USE_DIE","playerId":"p","dieId":"d1","obstacleId":"o1"}"#);

        let moved: Action = serde_json::from_str(r#"{"type":"MOVE","playerId":"p","direction":"E"}"#).unwrap();
        assert_eq!(moved, Action::Move { player_id: PlayerId::new("p"), direction: Direction::E });

        let trap: Action = serde_json::from_str(r#"{"type":"DM_PLACE_TRAP","playerId":"d","cardId":"c","roomId":"3,4"}"#).unwrap();
        assert_eq!(trap.kind(), "DM_PLACE_TRAP");

        let reset: Action = serde_json::from_str(r#"{"type":"RESET_LOBBY"}"#).unwrap();
        assert_eq!(reset, Action::ResetLobby);
        assert!(reset.actor().is_none());
    }

    #[test]
    fn test_old_state_untouched() {
        let state = corridor_game();
        let snapshot = state.clone();
        let _ = run(&state, Action::Move { player_id: PlayerId::new(HERO), direction: Direction::E }, NOW);
        assert_eq!(state, snapshot);
    }
}
