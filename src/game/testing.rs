//! Shared test fixtures.

use std::sync::Arc;

use crate::core::rng::DeterministicRng;
use crate::game::catalog::STARTER_ITEM_ID;
use crate::game::config::GameConfig;
use crate::game::dice;
use crate::game::state::{
    CardTier, GameState, GameStatus, ObstacleCard, Player, PlayerId, PlayerRole, Room, RoomId, RoomObstacle,
    SpecialRules, StatType,
};

pub(crate) const HERO: &str = "hero";
pub(crate) const DM: &str = "dm";
pub(crate) const NOW: u64 = 1_700_000_000_000;

/// One-off obstacle instance.
pub(crate) fn obstacle(id: &str, requirements: &[(StatType, u32)], rules: SpecialRules) -> RoomObstacle {
    let card = ObstacleCard {
        id: format!("card-{}", id),
        name: id.to_string(),
        cost: 1,
        tier: CardTier::Basic,
        requirements: requirements.iter().copied().collect(),
        special_rules: rules,
        key_requirement: None,
    };
    RoomObstacle::new(id, card)
}

/// A running game on a three-room corridor: Start (0,0) - (1,0) - Exit (2,0).
///
/// The host hero stands at Start with an undrafted pool and the starter
/// scroll; the DM has no room.
pub(crate) fn corridor_game() -> GameState {
    let config = GameConfig::default();
    let mut rng = DeterministicRng::new(1);

    let mut hero = Player::new(PlayerId::new(HERO), "Hero", PlayerRole::Hero);
    hero.enter_room(RoomId::new(0, 0));
    hero.dice_pool = dice::undrafted_pool(HERO, &config, &mut rng);
    hero.inventory.push(STARTER_ITEM_ID.to_string());
    hero.is_ready = true;

    let mut dm = Player::new(PlayerId::new(DM), "Dungeon Master", PlayerRole::Dm);
    dm.is_ready = true;

    let mut state = GameState::with_host(&config, hero);
    state.players.insert(dm.id.clone(), Arc::new(dm));

    let ids = [RoomId::new(0, 0), RoomId::new(1, 0), RoomId::new(2, 0)];
    for (i, id) in ids.iter().enumerate() {
        let mut room = Room::new(*id);
        if i > 0 {
            room.connections.push(ids[i - 1]);
        }
        if i + 1 < ids.len() {
            room.connections.push(ids[i + 1]);
        }
        room.is_start = i == 0;
        room.is_exit = i + 1 == ids.len();
        state.map.insert(*id, Arc::new(room));
    }

    state.status = GameStatus::Playing;
    state.last_resource_tick = NOW;
    state.last_card_draw_tick = NOW;
    state
}
