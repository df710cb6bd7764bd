//! Damage, experience and death rules for player characters

use crate::character::CharacterInfo;
use crate::config::Location;
use crate::content::{Content, ItemKind};
use crate::inventory::{equipped, wear};
use rand::Rng;
use shared::{EquipmentSlot, ItemStack, StatKind, MAX_LEVEL};

/// Time between two regeneration pulses
pub const REGEN_INTERVAL_MS: u64 = 5_000;

/// Experience needed to advance from `level` to the next one
pub fn next_level(level: u32) -> u64 {
    let next = level as u64 + 1;
    50 * next * next
}

/// Raw damage of one swing before the defender's protection
pub fn attack_power(character: &CharacterInfo, content: &Content) -> u32 {
    let base = (character.stats.strength / 2).max(1);
    let weapon = match equipped(character, content, EquipmentSlot::Weapon).map(|t| t.kind) {
        Some(ItemKind::Weapon { damage }) => damage,
        _ => 0,
    };
    base + weapon
}

pub fn protection(character: &CharacterInfo, content: &Content) -> u32 {
    let mut total = character.stats.defense / 5;
    for slot in [EquipmentSlot::Armor, EquipmentSlot::Helmet] {
        if let Some(ItemKind::Armor { protection } | ItemKind::Helmet { protection }) =
            equipped(character, content, slot).map(|t| t.kind)
        {
            total += protection;
        }
    }
    total
}

/// Percent chance the equipped shield stops a hit entirely
pub fn block_chance(character: &CharacterInfo, content: &Content) -> u32 {
    match equipped(character, content, EquipmentSlot::Shield).map(|t| t.kind) {
        Some(ItemKind::Shield { block_chance }) => block_chance.min(100),
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub damage: u32,
    pub blocked: bool,
}

pub fn roll_hit(power: u32, protection: u32, block_chance: u32, rng: &mut impl Rng) -> Hit {
    if block_chance > 0 && rng.gen_range(0..100) < block_chance {
        return Hit {
            damage: 0,
            blocked: true,
        };
    }
    Hit {
        damage: power.saturating_sub(protection),
        blocked: false,
    }
}

/// Lands a hit of `power` on a player
///
/// Armor and helmet wear only when damage actually gets through; a zero
/// damage hit leaves the defender untouched.
pub fn strike_player(
    defender: &mut CharacterInfo,
    content: &Content,
    power: u32,
    rng: &mut impl Rng,
) -> Hit {
    let hit = roll_hit(
        power,
        protection(defender, content),
        block_chance(defender, content),
        rng,
    );
    if hit.damage > 0 {
        defender.vitals.health = defender.vitals.health.saturating_sub(hit.damage);
        wear(defender, EquipmentSlot::Armor);
        wear(defender, EquipmentSlot::Helmet);
    }
    hit
}

/// Wears the attacker's weapon after a landed swing
pub fn consume_weapon(attacker: &mut CharacterInfo) -> bool {
    wear(attacker, EquipmentSlot::Weapon)
}

/// Experience a player killer earns from the victim
pub fn kill_experience(victim: &CharacterInfo, kill_exp_percent: u32) -> u64 {
    percent_of(victim.experience, kill_exp_percent)
}

/// `percent` percent of `amount`, widened so large totals cannot overflow
fn percent_of(amount: u64, percent: u32) -> u64 {
    u64::try_from(amount as u128 * percent as u128 / 100).unwrap_or(u64::MAX)
}

/// Adds experience and levels up as long as thresholds are met
///
/// Returns the number of levels gained.
pub fn grant_experience(character: &mut CharacterInfo, amount: u64) -> u32 {
    character.experience = character.experience.saturating_add(amount);
    let mut gained = 0;
    while character.level < MAX_LEVEL && character.experience >= next_level(character.level) {
        character.experience -= next_level(character.level);
        character.level += 1;
        character.stat_points += 3 + character.stats.speed / 10;
        gained += 1;
    }
    if gained > 0 {
        character.restore_vitals();
    }
    gained
}

/// Spends one stat point on `stat`
pub fn train_stat(character: &mut CharacterInfo, stat: StatKind) -> bool {
    if character.stat_points == 0 {
        return false;
    }
    character.stat_points -= 1;
    *character.stats.get_mut(stat) += 1;
    true
}

/// Everything a death took from a player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathPenalty {
    /// Tile the player died on; dropped items land here
    pub map: String,
    pub x: u16,
    pub y: u16,
    pub dropped: Vec<ItemStack>,
    pub lost_experience: u64,
}

/// Applies every consequence of dying in one step
pub fn apply_death_penalty(
    character: &mut CharacterInfo,
    respawn: &Location,
    exp_penalty_percent: u32,
) -> DeathPenalty {
    let map = std::mem::replace(&mut character.map, respawn.map.clone());
    let (x, y) = (character.x, character.y);

    let mut dropped = Vec::new();
    for index in character.equipment.equipped_indices() {
        if let Some(stack) = character.inventory.get_mut(index as usize).and_then(Option::take) {
            dropped.push(stack);
        }
    }
    character.equipment = Default::default();

    let lost_experience = percent_of(character.experience, exp_penalty_percent.min(100));
    character.experience -= lost_experience;

    character.restore_vitals();
    character.x = respawn.x;
    character.y = respawn.y;

    DeathPenalty {
        map,
        x,
        y,
        dropped,
        lost_experience,
    }
}

/// One regeneration pulse; returns false when already at full vitals
pub fn regenerate(character: &mut CharacterInfo) -> bool {
    let before = character.vitals;
    character.heal(
        (character.max_health() / 10).max(1),
        (character.max_mana() / 10).max(1),
        (character.max_stamina() / 5).max(1),
    );
    character.vitals != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{give_item, use_item};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::Job;

    const SWORD: u32 = 2;
    const ARMOR: u32 = 3;
    const CAP: u32 = 4;

    fn warrior() -> CharacterInfo {
        CharacterInfo::new("Brann", "brann", Job::Warrior, 1, "Forest", 4, 4)
    }

    fn equip(character: &mut CharacterInfo, content: &Content, item: u32) -> usize {
        let index = give_item(character, content, item, 1, None).unwrap();
        use_item(character, content, index).unwrap();
        index
    }

    #[test]
    fn test_attack_power_includes_weapon() {
        let content = Content::builtin();
        let mut character = warrior();
        assert_eq!(attack_power(&character, &content), 4);
        equip(&mut character, &content, SWORD);
        assert_eq!(attack_power(&character, &content), 8);

        character.stats.strength = 0;
        assert_eq!(attack_power(&character, &content), 5);
    }

    #[test]
    fn test_protection_sums_armor_pieces() {
        let content = Content::builtin();
        let mut character = warrior();
        character.stats.defense = 10;
        equip(&mut character, &content, ARMOR);
        equip(&mut character, &content, CAP);
        assert_eq!(protection(&character, &content), 2 + 3 + 1);
    }

    #[test]
    fn test_zero_damage_hit_changes_nothing() {
        let content = Content::builtin();
        let mut rng = StdRng::seed_from_u64(7);
        let mut defender = warrior();
        let armor = equip(&mut defender, &content, ARMOR);
        let before = defender.clone();

        let hit = strike_player(&mut defender, &content, 2, &mut rng);
        assert_eq!(hit.damage, 0);
        assert_eq!(defender.vitals, before.vitals);
        assert_eq!(defender.inventory[armor], before.inventory[armor]);
    }

    #[test]
    fn test_damaging_hit_wears_armor() {
        let content = Content::builtin();
        let mut rng = StdRng::seed_from_u64(7);
        let mut defender = warrior();
        let armor = equip(&mut defender, &content, ARMOR);
        let health = defender.vitals.health;

        let hit = strike_player(&mut defender, &content, 20, &mut rng);
        assert_eq!(hit.damage, 20 - 1 - 3);
        assert_eq!(defender.vitals.health, health - hit.damage);
        assert_eq!(defender.inventory[armor].unwrap().durability, 79);
    }

    #[test]
    fn test_full_block_chance_always_blocks() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let hit = roll_hit(50, 0, 100, &mut rng);
            assert!(hit.blocked);
            assert_eq!(hit.damage, 0);
        }
        assert_eq!(roll_hit(50, 10, 0, &mut rng).damage, 40);
    }

    #[test]
    fn test_level_up_carries_remainder() {
        let mut character = warrior();
        let gained = grant_experience(&mut character, next_level(1) + next_level(2) + 7);
        assert_eq!(gained, 2);
        assert_eq!(character.level, 3);
        assert_eq!(character.experience, 7);
        assert_eq!(character.stat_points, 6);
        assert_eq!(character.vitals.health, character.max_health());
    }

    #[test]
    fn test_level_cap_is_respected() {
        let mut character = warrior();
        character.level = MAX_LEVEL;
        assert_eq!(grant_experience(&mut character, u32::MAX as u64), 0);
        assert_eq!(character.level, MAX_LEVEL);
    }

    #[test]
    fn test_train_stat_spends_points() {
        let mut character = warrior();
        assert!(!train_stat(&mut character, StatKind::Strength));
        character.stat_points = 1;
        assert!(train_stat(&mut character, StatKind::Strength));
        assert_eq!(character.stats.strength, 9);
        assert_eq!(character.stat_points, 0);
    }

    #[test]
    fn test_death_penalty_applies_all_effects() {
        let content = Content::builtin();
        let mut character = warrior();
        let sword = equip(&mut character, &content, SWORD);
        give_item(&mut character, &content, 1, 40, None).unwrap();
        character.experience = 1_000;
        character.vitals.health = 0;

        let respawn = Location::new("Town", 5, 5);
        let penalty = apply_death_penalty(&mut character, &respawn, 10);

        assert_eq!((penalty.map.as_str(), penalty.x, penalty.y), ("Forest", 4, 4));
        assert_eq!(penalty.dropped.len(), 1);
        assert_eq!(penalty.dropped[0].item, SWORD);
        assert_eq!(character.inventory[sword], None);
        assert_eq!(character.equipment.weapon, None);
        assert_eq!(penalty.lost_experience, 100);
        assert_eq!(character.experience, 900);
        assert_eq!(character.vitals.health, character.max_health());
        assert_eq!((character.map.as_str(), character.x, character.y), ("Town", 5, 5));
        assert!(crate::inventory::has_item(&character, 1));
    }

    #[test]
    fn test_kill_experience_share() {
        let mut victim = warrior();
        victim.experience = 500;
        assert_eq!(kill_experience(&victim, 10), 50);
    }

    #[test]
    fn test_regenerate_stops_at_full() {
        let mut character = warrior();
        assert!(!regenerate(&mut character));
        character.vitals.health = 1;
        assert!(regenerate(&mut character));
        assert!(character.vitals.health > 1);
    }

    #[test]
    fn test_capped_experience_does_not_overflow() {
        let mut victim = warrior();
        victim.experience = u64::MAX;
        assert_eq!(kill_experience(&victim, 10), u64::MAX / 10);

        let penalty = apply_death_penalty(&mut victim, &Location::new("Town", 5, 5), 10);
        assert_eq!(penalty.lost_experience, u64::MAX / 10);
        assert_eq!(victim.experience, u64::MAX - u64::MAX / 10);
    }
}
