//! Game State Definitions
//!
//! The canonical data model shared by the host and every replica.
//! Uses BTreeMap for deterministic iteration order; rooms and players sit
//! behind `Arc` so a transition copies only what it touches.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::hash::{digest_json, StateHash};
use crate::core::rng::DeterministicRng;
use crate::game::config::GameConfig;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Player identifier (the peer id of the owning connection).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for a peer that did not bring one.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grid coordinate of a room. Serialized as the string `"x,y"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoomId {
    /// Column.
    pub x: i32,
    /// Row (grows southward).
    pub y: i32,
}

impl RoomId {
    /// Create from coordinates.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Adjacent coordinate in a direction (may be off-grid).
    pub fn neighbor(self, direction: Direction) -> Self {
        let (dx, dy) = direction.offset();
        Self::new(self.x + dx, self.y + dy)
    }

    /// Manhattan distance.
    pub fn manhattan(self, other: RoomId) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Error parsing a `"x,y"` room id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid room id: {0:?}")]
pub struct ParseRoomIdError(pub String);

impl FromStr for RoomId {
    type Err = ParseRoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRoomIdError(s.to_string());
        let (x, y) = s.split_once(',').ok_or_else(err)?;
        let x = x.trim().parse().map_err(|_| err())?;
        let y = y.trim().parse().map_err(|_| err())?;
        Ok(Self::new(x, y))
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Compass direction for MOVE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// (x, y-1)
    N,
    /// (x, y+1)
    S,
    /// (x+1, y)
    E,
    /// (x-1, y)
    W,
}

impl Direction {
    /// All four, in N S E W order.
    pub const ALL: [Direction; 4] = [Direction::N, Direction::S, Direction::E, Direction::W];

    /// Coordinate delta.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::N => (0, -1),
            Direction::S => (0, 1),
            Direction::E => (1, 0),
            Direction::W => (-1, 0),
        }
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Top-level game phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    /// Players gather and pick roles.
    #[default]
    Lobby,
    /// Draft of dice and cards.
    Pregame,
    /// The timed crawl.
    Playing,
    /// A hero escaped.
    VictoryHero,
    /// The timer ran out.
    VictoryDm,
}

impl GameStatus {
    /// VICTORY_* states only leave via RESET_LOBBY.
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::VictoryHero | GameStatus::VictoryDm)
    }
}

/// Which side a player is on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerRole {
    /// Crawls the maze.
    #[default]
    Hero,
    /// Places obstacles.
    Dm,
}

/// Die face / requirement tag. GOLD and EXP are resource faces that never
/// count toward obstacles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatType {
    /// Strength.
    Muscle,
    /// Dexterity.
    Agility,
    /// Endurance.
    Fortitude,
    /// Lore.
    Knowledge,
    /// Wits.
    Smarts,
    /// Charm.
    Looks,
    /// Resource face: +1 gold.
    Gold,
    /// Resource face: +1 experience.
    Exp,
}

impl StatType {
    /// The six attribute stats (no resource faces).
    pub const ATTRIBUTES: [StatType; 6] = [
        StatType::Muscle,
        StatType::Agility,
        StatType::Fortitude,
        StatType::Knowledge,
        StatType::Smarts,
        StatType::Looks,
    ];

    /// GOLD or EXP.
    pub fn is_resource(self) -> bool {
        matches!(self, StatType::Gold | StatType::Exp)
    }
}

/// Hero class. Each one doubles the power of one attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeroClass {
    #[allow(missing_docs)]
    Fighter,
    #[allow(missing_docs)]
    Rogue,
    #[allow(missing_docs)]
    Wizard,
    #[allow(missing_docs)]
    Cleric,
    #[allow(missing_docs)]
    Barbarian,
    #[allow(missing_docs)]
    Bard,
}

impl HeroClass {
    /// The stat this class doubles.
    pub fn bonus_stat(self) -> StatType {
        match self {
            HeroClass::Fighter => StatType::Muscle,
            HeroClass::Rogue => StatType::Agility,
            HeroClass::Wizard => StatType::Knowledge,
            HeroClass::Cleric => StatType::Smarts,
            HeroClass::Barbarian => StatType::Fortitude,
            HeroClass::Bard => StatType::Looks,
        }
    }
}

// =============================================================================
// DICE
// =============================================================================

/// A six-sided die owned by one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Die {
    /// Unique within its owner's pool.
    pub id: String,
    /// Face tags.
    pub faces: [StatType; 6],
    /// Per-face multiplier (1 or 2).
    pub multipliers: [u32; 6],
    /// Index of the face currently showing.
    pub current_face: usize,
    /// Obstacle this die is committed to, if any.
    pub locked_to_obstacle_id: Option<String>,
    /// Item that granted this die (removed again when that item is dropped).
    #[serde(default)]
    pub granted_by: Option<String>,
}

impl Die {
    /// Build an unlocked die showing face 0.
    pub fn new(id: impl Into<String>, faces: [StatType; 6]) -> Self {
        Self {
            id: id.into(),
            faces,
            multipliers: [1; 6],
            current_face: 0,
            locked_to_obstacle_id: None,
            granted_by: None,
        }
    }

    /// Face currently showing.
    pub fn current_value(&self) -> StatType {
        self.faces[self.current_face % 6]
    }

    /// Multiplier of the face currently showing.
    pub fn current_multiplier(&self) -> u32 {
        self.multipliers[self.current_face % 6]
    }

    /// Committed to an obstacle.
    pub fn is_locked(&self) -> bool {
        self.locked_to_obstacle_id.is_some()
    }

    /// Locked to this particular obstacle.
    pub fn is_locked_to(&self, obstacle_id: &str) -> bool {
        self.locked_to_obstacle_id.as_deref() == Some(obstacle_id)
    }

    /// Roll: pick a face uniformly.
    pub fn roll(&mut self, rng: &mut DeterministicRng) {
        self.current_face = rng.next_index(6);
    }
}

// =============================================================================
// OBSTACLES
// =============================================================================

/// Card tier, gates when a card can show up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardTier {
    #[allow(missing_docs)]
    Basic,
    #[allow(missing_docs)]
    Neutral,
    #[allow(missing_docs)]
    Advanced,
}

/// Reward granted when an obstacle falls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reward {
    /// One item from the loot table drops on the floor.
    LootDrop,
}

/// Special behaviour flags on a card.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpecialRules {
    /// Heroes cannot step back to their previous room while it stands.
    pub prevents_retreat: bool,
    /// Comes back undefeated once the room is empty.
    pub resets_on_leave: bool,
    /// Dice hit and reroll instead of locking.
    pub accumulates_damage: bool,
    /// Drop on defeat.
    pub reward: Option<Reward>,
}

impl SpecialRules {
    /// No special behaviour.
    pub const NONE: SpecialRules = SpecialRules {
        prevents_retreat: false,
        resets_on_leave: false,
        accumulates_damage: false,
        reward: None,
    };
}

/// An obstacle card instance (in the deck, hand, or a room).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObstacleCard {
    /// Instance id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// DM resource cost.
    pub cost: u32,
    /// Deck tier.
    pub tier: CardTier,
    /// Stat totals needed to defeat it.
    pub requirements: BTreeMap<StatType, u32>,
    /// Behaviour flags.
    #[serde(default)]
    pub special_rules: SpecialRules,
    /// Item id that opens it (key-gated obstacles).
    #[serde(default)]
    pub key_requirement: Option<String>,
}

/// A card placed in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomObstacle {
    /// Instance id, referenced by `Die::locked_to_obstacle_id`.
    pub id: String,
    /// The card.
    pub card: ObstacleCard,
    /// Recomputed every resolve pass.
    pub current_successes: BTreeMap<StatType, u32>,
    /// Durable damage (accumulating cards only).
    pub permanent_successes: BTreeMap<StatType, u32>,
    /// Cleared.
    pub is_defeated: bool,
}

impl RoomObstacle {
    /// Place a card.
    pub fn new(id: impl Into<String>, card: ObstacleCard) -> Self {
        Self {
            id: id.into(),
            card,
            current_successes: BTreeMap::new(),
            permanent_successes: BTreeMap::new(),
            is_defeated: false,
        }
    }

    /// Only opened with a key item.
    pub fn is_key_gated(&self) -> bool {
        self.card.key_requirement.is_some()
    }

    /// Requires this stat at all.
    pub fn requires(&self, stat: StatType) -> bool {
        self.card.requirements.get(&stat).copied().unwrap_or(0) > 0
    }
}

// =============================================================================
// ROOMS
// =============================================================================

/// One cell of the maze.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Coordinate.
    pub id: RoomId,
    /// Open passages.
    pub connections: Vec<RoomId>,
    /// Placed obstacles (defeated ones stay).
    pub active_obstacles: Vec<RoomObstacle>,
    /// Item ids on the floor.
    pub items: Vec<String>,
    /// Spawn room.
    pub is_start: bool,
    /// Escape room.
    pub is_exit: bool,
    /// Requirements are doubled until this time (ms).
    pub super_charge_unlock_time: u64,
    /// When a stat total last rose (ms), for UI flashes.
    #[serde(default)]
    pub recent_successes: Vec<u64>,
}

impl Room {
    /// Empty room with no passages.
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            connections: Vec::new(),
            active_obstacles: Vec::new(),
            items: Vec::new(),
            is_start: false,
            is_exit: false,
            super_charge_unlock_time: 0,
            recent_successes: Vec::new(),
        }
    }

    /// Passage to `other` exists.
    pub fn connects_to(&self, other: RoomId) -> bool {
        self.connections.contains(&other)
    }

    /// Requirements doubled right now.
    pub fn is_supercharged(&self, now: u64) -> bool {
        now < self.super_charge_unlock_time
    }

    /// Any obstacle still standing.
    pub fn has_undefeated_obstacles(&self) -> bool {
        self.active_obstacles.iter().any(|o| !o.is_defeated)
    }

    /// Look up an obstacle.
    pub fn obstacle(&self, obstacle_id: &str) -> Option<&RoomObstacle> {
        self.active_obstacles.iter().find(|o| o.id == obstacle_id)
    }

    /// Look up an obstacle mutably.
    pub fn obstacle_mut(&mut self, obstacle_id: &str) -> Option<&mut RoomObstacle> {
        self.active_obstacles.iter_mut().find(|o| o.id == obstacle_id)
    }
}

impl AsRef<Room> for Room {
    fn as_ref(&self) -> &Room {
        self
    }
}

// =============================================================================
// PLAYERS
// =============================================================================

/// A seated player (host included).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Player {
    /// Peer id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Hero or DM.
    pub role: PlayerRole,
    /// Heroes only.
    pub hero_class: Option<HeroClass>,
    /// Where the player stands (None in the lobby).
    pub current_room_id: Option<RoomId>,
    /// Room the player came from.
    pub previous_room_id: Option<RoomId>,
    /// Rooms entered this game.
    pub visited_rooms: Vec<RoomId>,
    /// Owned dice.
    pub dice_pool: Vec<Die>,
    /// Item ids carried.
    pub inventory: Vec<String>,
    /// In transit between rooms.
    pub is_moving: bool,
    /// Transit ends at this time (ms).
    pub move_unlock_time: u64,
    /// Last REROLL (ms).
    pub last_reroll_time: u64,
    /// Unspent die upgrades.
    pub upgrade_points: u32,
    #[allow(missing_docs)]
    pub gold: u32,
    #[allow(missing_docs)]
    pub exp: u32,
    #[allow(missing_docs)]
    pub level: u32,
    /// Picks made so far in the draft.
    pub draft_step: u32,
    /// Dice on offer in the draft.
    pub draft_die_options: Vec<Die>,
    /// Done drafting / ready to play.
    pub is_ready: bool,
}

impl Player {
    /// New player in the lobby.
    pub fn new(id: PlayerId, name: impl Into<String>, role: PlayerRole) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            level: 1,
            ..Default::default()
        }
    }

    /// Heroes move, roll and escape.
    pub fn is_hero(&self) -> bool {
        self.role == PlayerRole::Hero
    }

    /// The DM places traps.
    pub fn is_dm(&self) -> bool {
        self.role == PlayerRole::Dm
    }

    /// Standing in this room.
    pub fn is_in(&self, room_id: RoomId) -> bool {
        self.current_room_id == Some(room_id)
    }

    /// Look up a die by id.
    pub fn die_mut(&mut self, die_id: &str) -> Option<&mut Die> {
        self.dice_pool.iter_mut().find(|d| d.id == die_id)
    }

    /// Release every lock.
    pub fn unlock_all_dice(&mut self) {
        for die in &mut self.dice_pool {
            die.locked_to_obstacle_id = None;
        }
    }

    /// Release locks held on one obstacle.
    pub fn unlock_dice_on(&mut self, obstacle_id: &str) {
        for die in &mut self.dice_pool {
            if die.is_locked_to(obstacle_id) {
                die.locked_to_obstacle_id = None;
            }
        }
    }

    /// Sum of item bonuses for a stat.
    pub fn item_bonus(&self, stat: StatType) -> u32 {
        self.inventory
            .iter()
            .filter_map(|id| crate::game::catalog::item(id))
            .filter_map(|def| def.bonus)
            .filter(|(bonus_stat, _)| *bonus_stat == stat)
            .map(|(_, amount)| amount)
            .sum()
    }

    /// Wipe everything but identity, role and class.
    pub fn reset_transient(&mut self) {
        *self = Player {
            id: std::mem::take(&mut self.id),
            name: std::mem::take(&mut self.name),
            role: self.role,
            hero_class: self.hero_class,
            level: 1,
            ..Default::default()
        };
    }

    /// Enter a room and remember it.
    pub fn enter_room(&mut self, room_id: RoomId) {
        self.current_room_id = Some(room_id);
        if !self.visited_rooms.contains(&room_id) {
            self.visited_rooms.push(room_id);
        }
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// The root aggregate. Only the host's copy is authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Phase.
    pub status: GameStatus,
    /// Seconds remaining in the current timed phase.
    pub timer: u32,
    /// DM currency (0..=cap).
    pub dm_resources: u32,
    /// Cards ready to place.
    pub dm_hand: Vec<ObstacleCard>,
    /// Drafted cards, drawn cyclically.
    pub dm_deck: Vec<ObstacleCard>,
    /// Cycle cursor into `dm_deck`.
    pub dm_deck_pointer: usize,
    /// Cards on offer in the DM draft.
    #[serde(default)]
    pub dm_draft_options: Vec<ObstacleCard>,
    /// Seated players.
    pub players: BTreeMap<PlayerId, Arc<Player>>,
    /// Rooms by `"x,y"`.
    pub map: BTreeMap<RoomId, Arc<Room>>,
    /// The player whose process holds authority.
    #[serde(default)]
    pub host_id: Option<PlayerId>,
    /// Last DM resource regeneration (ms).
    pub last_resource_tick: u64,
    /// Last DM card draw (ms).
    pub last_card_draw_tick: u64,
    /// Last supercharge anywhere (ms).
    pub last_super_charge_time: u64,
    /// Counter for minted instance ids.
    #[serde(default)]
    pub next_instance_id: u64,
}

impl GameState {
    /// Empty lobby.
    pub fn new(config: &GameConfig) -> Self {
        Self {
            status: GameStatus::Lobby,
            timer: config.game_duration_secs,
            dm_resources: config.initial_dm_resources,
            dm_hand: Vec::new(),
            dm_deck: Vec::new(),
            dm_deck_pointer: 0,
            dm_draft_options: Vec::new(),
            players: BTreeMap::new(),
            map: BTreeMap::new(),
            host_id: None,
            last_resource_tick: 0,
            last_card_draw_tick: 0,
            last_super_charge_time: 0,
            next_instance_id: 0,
        }
    }

    /// Lobby seated with the host.
    pub fn with_host(config: &GameConfig, host: Player) -> Self {
        let mut state = Self::new(config);
        state.host_id = Some(host.id.clone());
        state.players.insert(host.id.clone(), Arc::new(host));
        state
    }

    /// Mint a unique instance id.
    pub fn mint_id(&mut self, prefix: &str) -> String {
        self.next_instance_id += 1;
        format!("{}-{}", prefix, self.next_instance_id)
    }

    /// Get a player.
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id).map(|p| p.as_ref())
    }

    /// Get a player for writing (copy-on-write).
    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id).map(Arc::make_mut)
    }

    /// Get a room.
    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.map.get(&id).map(|r| r.as_ref())
    }

    /// Get a room for writing (copy-on-write).
    pub fn room_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.map.get_mut(&id).map(Arc::make_mut)
    }

    /// The Start room.
    pub fn start_room_id(&self) -> Option<RoomId> {
        self.map.values().find(|r| r.is_start).map(|r| r.id)
    }

    /// The Exit room.
    pub fn exit_room_id(&self) -> Option<RoomId> {
        self.map.values().find(|r| r.is_exit).map(|r| r.id)
    }

    /// Anyone standing in this room.
    pub fn room_is_occupied(&self, room_id: RoomId) -> bool {
        self.players.values().any(|p| p.is_in(room_id))
    }

    /// Everyone done drafting. Vacuously true with nobody seated.
    pub fn all_players_ready(&self) -> bool {
        self.players.values().all(|p| p.is_ready)
    }

    /// Digest of the canonical encoding.
    pub fn digest(&self) -> Result<StateHash, serde_json::Error> {
        digest_json(self)
    }
}

// =============================================================================
// TESTS
// =============================================================================
