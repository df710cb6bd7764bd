//! Persistent character records

use serde::{Deserialize, Serialize};
use shared::packets::{CharacterSummary, PlayerSnapshot};
use shared::{
    AccessLevel, Direction, EquipmentSlot, ItemStack, Job, SessionId, Stats, MAX_INVENTORY,
};

/// Authentication identity owning up to [`shared::MAX_CHARACTERS`] characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub password_hash: String,
    pub characters: Vec<String>,
}

/// Current values of the three pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vitals {
    pub health: u32,
    pub mana: u32,
    pub stamina: u32,
}

/// Equipped items, stored as indices into the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Equipment {
    pub weapon: Option<u8>,
    pub armor: Option<u8>,
    pub helmet: Option<u8>,
    pub shield: Option<u8>,
}

impl Equipment {
    pub fn get(&self, slot: EquipmentSlot) -> Option<u8> {
        match slot {
            EquipmentSlot::Weapon => self.weapon,
            EquipmentSlot::Armor => self.armor,
            EquipmentSlot::Helmet => self.helmet,
            EquipmentSlot::Shield => self.shield,
        }
    }

    pub fn set(&mut self, slot: EquipmentSlot, index: Option<u8>) {
        match slot {
            EquipmentSlot::Weapon => self.weapon = index,
            EquipmentSlot::Armor => self.armor = index,
            EquipmentSlot::Helmet => self.helmet = index,
            EquipmentSlot::Shield => self.shield = index,
        }
    }

    /// Equipment slot currently holding the given inventory index
    pub fn slot_of(&self, index: u8) -> Option<EquipmentSlot> {
        [
            EquipmentSlot::Weapon,
            EquipmentSlot::Armor,
            EquipmentSlot::Helmet,
            EquipmentSlot::Shield,
        ]
        .into_iter()
        .find(|&slot| self.get(slot) == Some(index))
    }

    pub fn equipped_indices(&self) -> Vec<u8> {
        [self.weapon, self.armor, self.helmet, self.shield]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Everything about a character that survives a disconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub name: String,
    pub account: String,
    pub job: Job,
    pub sprite: u16,
    pub access: AccessLevel,
    pub level: u32,
    pub experience: u64,
    pub stat_points: u32,
    pub stats: Stats,
    pub vitals: Vitals,
    pub inventory: Vec<Option<ItemStack>>,
    pub equipment: Equipment,
    pub spells: Vec<u32>,
    pub map: String,
    pub x: u16,
    pub y: u16,
    pub direction: Direction,
}

impl CharacterInfo {
    pub fn new(
        name: &str,
        account: &str,
        job: Job,
        sprite: u16,
        map: &str,
        x: u16,
        y: u16,
    ) -> Self {
        let mut character = Self {
            name: name.to_string(),
            account: account.to_string(),
            job,
            sprite,
            access: AccessLevel::Player,
            level: 1,
            experience: 0,
            stat_points: 0,
            stats: job.base_stats(),
            vitals: Vitals::default(),
            inventory: vec![None; MAX_INVENTORY],
            equipment: Equipment::default(),
            spells: Vec::new(),
            map: map.to_string(),
            x,
            y,
            direction: Direction::Down,
        };
        character.restore_vitals();
        character
    }

    pub fn max_health(&self) -> u32 {
        100 + self.level * 10 + self.stats.defense * 2
    }

    pub fn max_mana(&self) -> u32 {
        30 + self.level * 5 + self.stats.magic * 3
    }

    pub fn max_stamina(&self) -> u32 {
        50 + self.level * 2 + self.stats.speed * 2
    }

    pub fn is_alive(&self) -> bool {
        self.vitals.health > 0
    }

    pub fn restore_vitals(&mut self) {
        self.vitals = Vitals {
            health: self.max_health(),
            mana: self.max_mana(),
            stamina: self.max_stamina(),
        };
    }

    /// Re-applies the `[0, max]` bounds after maxima changed
    pub fn clamp_vitals(&mut self) {
        self.vitals.health = self.vitals.health.min(self.max_health());
        self.vitals.mana = self.vitals.mana.min(self.max_mana());
        self.vitals.stamina = self.vitals.stamina.min(self.max_stamina());
    }

    pub fn heal(&mut self, health: u32, mana: u32, stamina: u32) {
        self.vitals.health = self.vitals.health.saturating_add(health);
        self.vitals.mana = self.vitals.mana.saturating_add(mana);
        self.vitals.stamina = self.vitals.stamina.saturating_add(stamina);
        self.clamp_vitals();
    }

    pub fn summary(&self) -> CharacterSummary {
        CharacterSummary {
            name: self.name.clone(),
            job: self.job,
            sprite: self.sprite,
            level: self.level,
        }
    }

    pub fn snapshot(&self, session: SessionId, player_killer: bool) -> PlayerSnapshot {
        PlayerSnapshot {
            session,
            name: self.name.clone(),
            job: self.job,
            sprite: self.sprite,
            level: self.level,
            x: self.x,
            y: self.y,
            direction: self.direction,
            health: self.vitals.health,
            max_health: self.max_health(),
            access: self.access,
            player_killer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character() -> CharacterInfo {
        CharacterInfo::new("Tamsin", "tam", Job::Warrior, 1, "Town", 5, 5)
    }

    #[test]
    fn test_new_character_starts_full() {
        let character = character();
        assert_eq!(character.level, 1);
        assert_eq!(character.vitals.health, character.max_health());
        assert_eq!(character.vitals.mana, character.max_mana());
        assert_eq!(character.inventory.len(), MAX_INVENTORY);
        assert!(character.is_alive());
    }

    #[test]
    fn test_heal_never_exceeds_maximum() {
        let mut character = character();
        character.vitals.health = 1;
        character.heal(u32::MAX, 5, 0);
        assert_eq!(character.vitals.health, character.max_health());
        assert_eq!(character.vitals.mana, character.max_mana());
    }

    #[test]
    fn test_equipment_slot_lookup() {
        let mut equipment = Equipment::default();
        equipment.set(EquipmentSlot::Helmet, Some(4));
        equipment.set(EquipmentSlot::Weapon, Some(0));
        assert_eq!(equipment.slot_of(4), Some(EquipmentSlot::Helmet));
        assert_eq!(equipment.slot_of(1), None);
        assert_eq!(equipment.equipped_indices(), vec![0, 4]);
    }

    #[test]
    fn test_character_survives_bincode() {
        let character = character();
        let bytes = bincode::serialize(&character).unwrap();
        let decoded: CharacterInfo = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, character);
    }
}
