//! Obstacle Resolution
//!
//! Recomputes every standing obstacle in a room from the dice locked to it.
//! Progress is derived, never incremented: `currentSuccesses` starts from
//! `permanentSuccesses` each pass and adds the power of every locked die
//! showing a required stat.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::rng::DeterministicRng;
use crate::game::catalog;
use crate::game::events::GameEvent;
use crate::game::state::{Die, Player, PlayerId, Reward, Room, StatType};

/// Power one die contributes toward `stat`.
///
/// Face multiplier, doubled by a matching class bonus, plus the flat bonus of
/// every matching item the holder carries. Zero if the die is not showing
/// `stat`.
pub fn die_power(die: &Die, holder: &Player, stat: StatType) -> u32 {
    if die.current_value() != stat || stat.is_resource() {
        return 0;
    }
    let mut power = die.current_multiplier();
    if holder.hero_class.map(|c| c.bonus_stat()) == Some(stat) {
        power *= 2;
    }
    power + holder.item_bonus(stat)
}

/// Recompute obstacle progress in `room`.
///
/// Players outside the room are ignored. Key-gated obstacles are skipped;
/// they only open through the unlock action. Defeat releases every die
/// locked to the obstacle and rolls loot when the card asks for it.
pub fn recalculate(
    room: &mut Room,
    players: &mut BTreeMap<PlayerId, Arc<Player>>,
    now: u64,
    rng: &mut DeterministicRng,
) -> Vec<GameEvent> {
    let mut events = Vec::new();
    let supercharged = room.is_supercharged(now);
    let mut any_rise = false;
    let mut drops = Vec::new();

    for obstacle in room.active_obstacles.iter_mut() {
        if obstacle.is_defeated || obstacle.is_key_gated() {
            continue;
        }

        let room_id = room.id;
        let obstacle_id = obstacle.id.as_str();
        let mut totals = obstacle.permanent_successes.clone();
        for &stat in obstacle.card.requirements.keys() {
            let contributed: u32 = players
                .values()
                .filter(|p| p.is_in(room_id))
                .flat_map(|p| {
                    p.dice_pool
                        .iter()
                        .filter(move |d| d.is_locked_to(obstacle_id))
                        .map(move |d| die_power(d, p, stat))
                })
                .sum();
            *totals.entry(stat).or_insert(0) += contributed;
        }

        let rose = totals
            .iter()
            .any(|(stat, total)| *total > obstacle.current_successes.get(stat).copied().unwrap_or(0));
        any_rise |= rose;
        obstacle.current_successes = totals;

        let cleared = obstacle.card.requirements.iter().all(|(stat, required)| {
            let needed = if supercharged { required * 2 } else { *required };
            obstacle.current_successes.get(stat).copied().unwrap_or(0) >= needed
        });
        if !cleared {
            continue;
        }

        obstacle.is_defeated = true;
        for player in players.values_mut() {
            if player.dice_pool.iter().any(|d| d.is_locked_to(&obstacle.id)) {
                Arc::make_mut(player).unlock_dice_on(&obstacle.id);
            }
        }
        events.push(GameEvent::ObstacleDefeated {
            room_id: room.id,
            obstacle_id: obstacle.id.clone(),
            name: obstacle.card.name.clone(),
        });

        if obstacle.card.special_rules.reward == Some(Reward::LootDrop) {
            drops.push(catalog::random_loot(rng));
        }
    }

    if any_rise {
        room.recent_successes.push(now);
    }
    for item_id in drops {
        events.push(GameEvent::LootDropped { room_id: room.id, item_id: item_id.clone() });
        room.items.push(item_id);
    }

    events
}
