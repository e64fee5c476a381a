//! Card and Item Catalog
//!
//! Static content: obstacle templates by tier, the item registry, and the
//! loot table. Templates are `'static` data; drawing one mints an owned
//! [`ObstacleCard`] instance.

use std::collections::BTreeMap;

use crate::core::rng::DeterministicRng;
use crate::game::state::{CardTier, ObstacleCard, Reward, SpecialRules, StatType};

use crate::game::state::StatType::{Agility, Fortitude, Knowledge, Looks, Muscle, Smarts};
use crate::game::state::CardTier::{Advanced, Basic, Neutral};

/// Item id of the key that opens the red door.
pub const RED_KEY_ID: &str = "RED_KEY";

/// Item every hero starts with.
pub const STARTER_ITEM_ID: &str = "ITEM_SCROLL";

// =============================================================================
// OBSTACLE TEMPLATES
// =============================================================================

/// Immutable obstacle template.
#[derive(Clone, Copy, Debug)]
pub struct CardTemplate {
    /// Display name.
    pub name: &'static str,
    /// DM resource cost.
    pub cost: u32,
    /// Deck tier.
    pub tier: CardTier,
    /// Stat totals needed.
    pub requirements: &'static [(StatType, u32)],
    /// Behaviour flags.
    pub rules: SpecialRules,
    /// Key item that opens it.
    pub key_requirement: Option<&'static str>,
}

impl CardTemplate {
    const fn new(name: &'static str, cost: u32, tier: CardTier, requirements: &'static [(StatType, u32)]) -> Self {
        Self {
            name,
            cost,
            tier,
            requirements,
            rules: SpecialRules::NONE,
            key_requirement: None,
        }
    }

    const fn rules(self, rules: SpecialRules) -> Self {
        Self { rules, ..self }
    }

    /// Mint an owned card.
    pub fn instantiate(&self, id: impl Into<String>) -> ObstacleCard {
        ObstacleCard {
            id: id.into(),
            name: self.name.to_string(),
            cost: self.cost,
            tier: self.tier,
            requirements: self.requirements.iter().copied().collect::<BTreeMap<_, _>>(),
            special_rules: self.rules,
            key_requirement: self.key_requirement.map(str::to_string),
        }
    }
}

const RETREAT: SpecialRules = SpecialRules { prevents_retreat: true, ..SpecialRules::NONE };
const RESETS: SpecialRules = SpecialRules { resets_on_leave: true, ..SpecialRules::NONE };
const DAMAGE: SpecialRules = SpecialRules { accumulates_damage: true, ..SpecialRules::NONE };
const LOOT: SpecialRules = SpecialRules { reward: Some(Reward::LootDrop), ..SpecialRules::NONE };
const DAMAGE_LOOT: SpecialRules = SpecialRules {
    accumulates_damage: true,
    reward: Some(Reward::LootDrop),
    ..SpecialRules::NONE
};
const DAMAGE_RETREAT: SpecialRules = SpecialRules {
    accumulates_damage: true,
    prevents_retreat: true,
    ..SpecialRules::NONE
};

/// The key-gated door. Never drawn; only placed by the map generator.
pub const RED_DOOR: CardTemplate = CardTemplate {
    name: "Red Door",
    cost: 0,
    tier: Neutral,
    requirements: &[(Agility, 99)],
    rules: SpecialRules::NONE,
    key_requirement: Some(RED_KEY_ID),
};

/// Every drawable obstacle.
pub const OBSTACLE_DECK: &[CardTemplate] = &[
    // Basic
    CardTemplate::new("Locked Door", 1, Basic, &[(Agility, 2)]),
    CardTemplate::new("Web Trap", 1, Basic, &[(Smarts, 2)]).rules(RETREAT),
    CardTemplate::new("Goblin Scout", 1, Basic, &[(Looks, 2)]),
    CardTemplate::new("Loose Rocks", 1, Basic, &[(Fortitude, 2)]),
    CardTemplate::new("Simple Riddle", 1, Basic, &[(Knowledge, 2)]),
    CardTemplate::new("Heavy Box", 1, Basic, &[(Muscle, 2)]),
    CardTemplate::new("Sleeping Guard", 1, Basic, &[(Agility, 1), (Smarts, 1)]),
    CardTemplate::new("Weak Wall", 1, Basic, &[(Muscle, 3)]),
    CardTemplate::new("Orc Guard", 2, Basic, &[(Muscle, 4)]),
    CardTemplate::new("Poison Gas", 2, Basic, &[(Fortitude, 4)]),
    CardTemplate::new("Seductive Siren", 2, Basic, &[(Looks, 4)]),
    CardTemplate::new("Greased Floor", 2, Basic, &[(Agility, 4)]),
    CardTemplate::new("Hypnotic Pattern", 2, Basic, &[(Smarts, 4)]),
    CardTemplate::new("Forgotten Lore", 2, Basic, &[(Knowledge, 4)]),
    CardTemplate::new("Ancient Lever", 2, Basic, &[(Muscle, 2), (Fortitude, 2)]),
    CardTemplate::new("Pressure Plate", 2, Basic, &[(Agility, 2), (Smarts, 2)]),
    // Neutral
    CardTemplate::new("Spiked Pit", 3, Neutral, &[(Agility, 6)]),
    CardTemplate::new("Rune Trap", 3, Neutral, &[(Knowledge, 6)]),
    CardTemplate::new("Sphinx Riddle", 3, Neutral, &[(Smarts, 6)]),
    CardTemplate::new("Ancient Curse", 3, Neutral, &[(Fortitude, 6)]).rules(RESETS),
    CardTemplate::new("Slime Cube", 2, Neutral, &[(Fortitude, 6)]),
    CardTemplate::new("Giant Bat", 2, Neutral, &[(Agility, 6)]),
    CardTemplate::new("Treasure Chest", 2, Neutral, &[(Muscle, 4)]).rules(LOOT),
    CardTemplate::new("Mimic", 3, Neutral, &[(Muscle, 6)]),
    CardTemplate::new("Locked Grimoire", 3, Neutral, &[(Knowledge, 2), (Smarts, 2)]),
    CardTemplate::new("Haunted Mirror", 3, Neutral, &[(Knowledge, 2), (Looks, 2)]),
    CardTemplate::new("Minotaur", 4, Neutral, &[(Muscle, 6), (Smarts, 2)]),
    CardTemplate::new("Harpy Flock", 3, Neutral, &[(Looks, 6)]),
    CardTemplate::new("Golem Sentry", 4, Neutral, &[(Muscle, 8)]).rules(DAMAGE),
    CardTemplate::new("Flooding Room", 4, Neutral, &[(Fortitude, 4), (Muscle, 4)]).rules(RETREAT),
    CardTemplate::new("Cursed Idol", 2, Neutral, &[(Fortitude, 4)]).rules(RESETS),
    CardTemplate::new("Gilded Chest", 2, Neutral, &[(Muscle, 4)]).rules(LOOT),
    CardTemplate::new("Quick Sand", 3, Neutral, &[(Muscle, 4), (Agility, 2)]).rules(RETREAT),
    CardTemplate::new("Bandit Ambush", 2, Neutral, &[(Agility, 4), (Looks, 2)]),
    // Advanced
    CardTemplate::new("Cave Troll", 4, Advanced, &[(Muscle, 12)]).rules(DAMAGE),
    CardTemplate::new("Lich King", 5, Advanced, &[(Knowledge, 14)]).rules(DAMAGE_LOOT),
    CardTemplate::new("Dragon", 5, Advanced, &[(Fortitude, 16)]).rules(DAMAGE_LOOT),
    CardTemplate::new("Mirror Maze", 4, Advanced, &[(Smarts, 10)]),
    CardTemplate::new("Lava Floor", 4, Advanced, &[(Agility, 10)]),
    CardTemplate::new("Vampire Lord", 4, Advanced, &[(Looks, 10)]),
    CardTemplate::new("Grand Chest", 3, Advanced, &[(Smarts, 8)]).rules(LOOT),
    CardTemplate::new("Chimera", 5, Advanced, &[(Muscle, 6), (Knowledge, 6)]).rules(DAMAGE),
    CardTemplate::new("Marathon", 4, Advanced, &[(Fortitude, 4), (Agility, 4)]),
    CardTemplate::new("Triathlon", 5, Advanced, &[(Muscle, 4), (Agility, 4), (Fortitude, 4)]).rules(RESETS),
    CardTemplate::new("Spiked Wall", 4, Advanced, &[(Muscle, 4), (Agility, 4)]).rules(RETREAT),
    CardTemplate::new("Hydra", 5, Advanced, &[(Muscle, 6), (Fortitude, 4)]).rules(DAMAGE),
    CardTemplate::new("The Tarrasque", 8, Advanced, &[(Muscle, 10), (Fortitude, 10)]).rules(DAMAGE_LOOT),
    CardTemplate::new("Living Wall", 5, Advanced, &[(Muscle, 8), (Fortitude, 4)]).rules(DAMAGE_RETREAT),
    CardTemplate::new("Mind Flayer", 6, Advanced, &[(Smarts, 12)]),
    CardTemplate::new("Elemental Chaos", 5, Advanced, &[(Fortitude, 4), (Knowledge, 4), (Agility, 4)]).rules(RESETS),
];

/// Templates of exactly one tier.
pub fn cards_of_tier(tier: CardTier) -> impl Iterator<Item = &'static CardTemplate> {
    OBSTACLE_DECK.iter().filter(move |c| c.tier == tier)
}

/// Templates a random draw may produce with `timer` seconds left.
///
/// The deck opens up as the clock runs down: Basic only above 240 s,
/// Basic + Neutral above 120 s, everything after that.
pub fn drawable_at(timer: u32) -> Vec<&'static CardTemplate> {
    OBSTACLE_DECK
        .iter()
        .filter(|c| match c.tier {
            Basic => true,
            Neutral => timer <= 240,
            Advanced => timer <= 120,
        })
        .collect()
}

/// Random card from the timer-filtered deck.
pub fn draw_card(timer: u32, rng: &mut DeterministicRng, id: impl Into<String>) -> Option<ObstacleCard> {
    let pool = drawable_at(timer);
    rng.choose(&pool).map(|template| template.instantiate(id))
}

/// Random Basic/Neutral card, used to seed the maze.
pub fn draw_seed_card(rng: &mut DeterministicRng, id: impl Into<String>) -> Option<ObstacleCard> {
    let pool: Vec<&CardTemplate> = OBSTACLE_DECK.iter().filter(|c| c.tier != Advanced).collect();
    rng.choose(&pool).map(|template| template.instantiate(id))
}

/// Random card of a given tier.
pub fn draw_card_of_tier(tier: CardTier, rng: &mut DeterministicRng, id: impl Into<String>) -> Option<ObstacleCard> {
    let pool: Vec<&CardTemplate> = cards_of_tier(tier).collect();
    rng.choose(&pool).map(|template| template.instantiate(id))
}

// =============================================================================
// ITEMS
// =============================================================================

/// What using an item does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemEffect {
    /// Self to Start.
    Teleport,
    /// Every other hero to the user's room.
    TeleportOthers,
    /// +1 upgrade point.
    GrantUpgrade,
    /// Defeat every standing obstacle that requires this stat.
    NukeObstacle(StatType),
}

/// Immutable item catalog entry.
#[derive(Clone, Copy, Debug)]
pub struct ItemDefinition {
    /// Item id.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Flat bonus added to each matching die.
    pub bonus: Option<(StatType, u32)>,
    /// Carrying it adds a die to the pool.
    pub grants_extra_die: bool,
    /// Usable effect (consumed on use).
    pub effect: Option<ItemEffect>,
    /// Gold price, if sold.
    pub price: Option<u32>,
}

impl ItemDefinition {
    const fn gear(id: &'static str, name: &'static str, stat: StatType, price: u32) -> Self {
        Self { id, name, bonus: Some((stat, 1)), grants_extra_die: false, effect: None, price: Some(price) }
    }

    const fn usable(id: &'static str, name: &'static str, effect: ItemEffect, price: u32) -> Self {
        Self { id, name, bonus: None, grants_extra_die: false, effect: Some(effect), price: Some(price) }
    }
}

/// Every item in the game.
pub const ITEM_REGISTRY: &[ItemDefinition] = &[
    ItemDefinition { id: RED_KEY_ID, name: "Red Key", bonus: None, grants_extra_die: false, effect: None, price: None },
    ItemDefinition::gear("ITEM_SWORD", "Iron Sword", Muscle, 4),
    ItemDefinition::gear("ITEM_SHIELD", "Tower Shield", Fortitude, 4),
    ItemDefinition::gear("ITEM_BOOTS", "Elven Boots", Agility, 4),
    ItemDefinition::gear("ITEM_BOOK", "Arcane Tome", Knowledge, 4),
    ItemDefinition::gear("ITEM_STAFF", "Elder Staff", Smarts, 4),
    ItemDefinition { id: "ITEM_TOOLS", name: "Thieves Tools", bonus: None, grants_extra_die: true, effect: None, price: Some(6) },
    ItemDefinition::usable("ITEM_SCROLL", "Teleport Scroll", ItemEffect::Teleport, 3),
    ItemDefinition::usable("ITEM_SUMMON", "Summoning Scroll", ItemEffect::TeleportOthers, 5),
    ItemDefinition::usable("ITEM_POTION_UPGRADE", "Potion of Growth", ItemEffect::GrantUpgrade, 5),
    ItemDefinition::gear("ITEM_CHARM_MUSCLE", "Bear Charm", Muscle, 3),
    ItemDefinition::gear("ITEM_CHARM_AGILITY", "Cat Charm", Agility, 3),
    ItemDefinition::gear("ITEM_CHARM_FORT", "Ox Charm", Fortitude, 3),
    ItemDefinition::gear("ITEM_CHARM_KNOW", "Owl Charm", Knowledge, 3),
    ItemDefinition::gear("ITEM_CHARM_SMART", "Fox Charm", Smarts, 3),
    ItemDefinition::gear("ITEM_CHARM_LOOKS", "Swan Charm", Looks, 3),
    ItemDefinition::usable("ITEM_BOMB_FIRE", "Fire Bomb", ItemEffect::NukeObstacle(Agility), 4),
    ItemDefinition::usable("ITEM_BOMB_ICE", "Ice Bomb", ItemEffect::NukeObstacle(Muscle), 4),
    ItemDefinition::usable("ITEM_BOMB_ACID", "Acid Bomb", ItemEffect::NukeObstacle(Fortitude), 4),
    ItemDefinition::usable("ITEM_BOMB_LIGHT", "Light Bomb", ItemEffect::NukeObstacle(Knowledge), 4),
    ItemDefinition::usable("ITEM_BOMB_VOID", "Void Bomb", ItemEffect::NukeObstacle(Smarts), 4),
    ItemDefinition::usable("ITEM_BOMB_GLAM", "Glamour Bomb", ItemEffect::NukeObstacle(Looks), 4),
    ItemDefinition::gear("ITEM_HELM", "Iron Helm", Fortitude, 3),
    ItemDefinition::gear("ITEM_DAGGER", "Rusty Dagger", Agility, 2),
    ItemDefinition::gear("ITEM_ROBE", "Silk Robe", Looks, 2),
    ItemDefinition::gear("ITEM_RING", "Ring of Mind", Smarts, 3),
];

/// Items that drop from LOOT_DROP obstacles.
pub const LOOT_TABLE: [&str; 15] = [
    "ITEM_SWORD", "ITEM_SHIELD", "ITEM_BOOTS", "ITEM_BOOK", "ITEM_STAFF", "ITEM_TOOLS",
    "ITEM_SUMMON", "ITEM_POTION_UPGRADE", "ITEM_CHARM_MUSCLE", "ITEM_CHARM_AGILITY",
    "ITEM_BOMB_FIRE", "ITEM_BOMB_ICE", "ITEM_BOMB_ACID", "ITEM_DAGGER", "ITEM_ROBE",
];

/// Look up an item definition.
pub fn item(id: &str) -> Option<&'static ItemDefinition> {
    ITEM_REGISTRY.iter().find(|def| def.id == id)
}

/// Uniform draw from the loot table.
pub fn random_loot(rng: &mut DeterministicRng) -> String {
    LOOT_TABLE[rng.next_index(LOOT_TABLE.len())].to_string()
}
