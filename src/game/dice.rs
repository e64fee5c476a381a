//! Dice
//!
//! Die generation (starter, standard, draft-by-power-level) and the
//! auto-consumption of GOLD/EXP faces.

use crate::core::rng::DeterministicRng;
use crate::game::config::GameConfig;
use crate::game::state::{Die, Player, StatType};

/// Six uniformly random attribute faces.
pub fn standard_die(id: impl Into<String>, rng: &mut DeterministicRng) -> Die {
    let mut faces = [StatType::Muscle; 6];
    for face in &mut faces {
        *face = StatType::ATTRIBUTES[rng.next_index(StatType::ATTRIBUTES.len())];
    }
    let mut die = Die::new(id, faces);
    die.roll(rng);
    die
}

/// Exactly one face per attribute.
pub fn balanced_die(id: impl Into<String>, rng: &mut DeterministicRng) -> Die {
    let mut die = Die::new(id, StatType::ATTRIBUTES);
    die.roll(rng);
    die
}

/// A die offered in the draft.
///
/// Power level 0 trades one attribute face for a GOLD or EXP face. Each
/// level above that pre-upgrades one more attribute face to x2.
pub fn draft_die(id: impl Into<String>, power_level: u32, rng: &mut DeterministicRng) -> Die {
    let mut die = standard_die(id, rng);

    if power_level == 0 {
        let slot = rng.next_index(6);
        die.faces[slot] = if rng.chance(50) { StatType::Gold } else { StatType::Exp };
    }

    let upgrades = (power_level as usize).min(6);
    for (face, multiplier) in die.faces.iter().zip(die.multipliers.iter_mut()).take(upgrades) {
        if !face.is_resource() {
            *multiplier = 2;
        }
    }

    die.roll(rng);
    die
}

/// The pool a hero starts with before drafting.
pub fn starter_dice(owner: &str, rng: &mut DeterministicRng) -> Vec<Die> {
    vec![balanced_die(format!("{}-d1", owner), rng)]
}

/// Starter die plus one die per draft step at increasing power, for heroes
/// who skip the draft (late joiners, draft disabled).
pub fn undrafted_pool(owner: &str, config: &GameConfig, rng: &mut DeterministicRng) -> Vec<Die> {
    let mut pool = starter_dice(owner, rng);
    for step in 0..config.draft_steps {
        pool.push(draft_die(format!("{}-d{}", owner, step + 2), step, rng));
    }
    pool
}

/// Draft offer batch.
pub fn draft_offer(owner: &str, step: u32, config: &GameConfig, rng: &mut DeterministicRng) -> Vec<Die> {
    (0..config.draft_options)
        .map(|i| draft_die(format!("{}-draft{}-{}", owner, step, i + 1), step, rng))
        .collect()
}

/// What the auto-consumption loop paid out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceGain {
    /// Gold gained.
    pub gold: u32,
    /// Experience gained (before level-ups spend it).
    pub exp: u32,
    /// Levels gained.
    pub levels: u32,
}

impl ResourceGain {
    /// Nothing changed.
    pub fn is_empty(&self) -> bool {
        self.gold == 0 && self.exp == 0
    }
}

/// Cash in every unlocked die showing GOLD or EXP, then reroll it.
///
/// A reroll can land on another resource face, so this runs in passes until
/// a pass changes nothing. Passes are capped by
/// `auto_resource_max_iterations`: a die with several resource faces could
/// otherwise keep paying out for a long time.
pub fn resolve_auto_resources(player: &mut Player, rng: &mut DeterministicRng, config: &GameConfig) -> ResourceGain {
    let mut gain = ResourceGain::default();

    for _ in 0..config.auto_resource_max_iterations {
        let mut changed = false;

        for die in player.dice_pool.iter_mut().filter(|d| !d.is_locked()) {
            match die.current_value() {
                StatType::Gold => {
                    gain.gold += 1;
                    player.gold += 1;
                }
                StatType::Exp => {
                    gain.exp += 1;
                    player.exp += 1;
                    let per_level = config.exp_per_level.max(1);
                    if player.exp >= per_level {
                        player.exp -= per_level;
                        player.level += 1;
                        player.upgrade_points += 1;
                        gain.levels += 1;
                    }
                }
                _ => continue,
            }
            die.roll(rng);
            changed = true;
        }

        if !changed {
            break;
        }
    }

    gain
}
