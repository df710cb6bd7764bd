//! Inventory and equipment operations on a character

use crate::character::CharacterInfo;
use crate::content::{Content, ItemKind, ItemTemplate};
use shared::packets::{EquipmentCommand, InventoryCommand, InventoryEntry};
use shared::{EquipmentSlot, ItemStack};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("inventory slot {0} does not exist")]
    InvalidSlot(usize),
    #[error("inventory slot {0} is empty")]
    EmptySlot(usize),
    #[error("requested {requested} but only {held} held")]
    InsufficientQuantity { requested: u32, held: u32 },
    #[error("inventory is full")]
    InventoryFull,
    #[error("item {0} is not known")]
    UnknownItem(u32),
    #[error("item {0} cannot be used")]
    NotUsable(u32),
}

impl ItemError {
    /// Errors no honest client can produce
    pub fn is_hack_attempt(&self) -> bool {
        matches!(
            self,
            ItemError::InvalidSlot(_) | ItemError::InsufficientQuantity { .. }
        )
    }
}

/// What using an item did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemUse {
    Consumed,
    Equipped(EquipmentSlot),
    Unequipped(EquipmentSlot),
}

/// Equipment slot an item kind goes into
pub fn equipment_slot(kind: ItemKind) -> Option<EquipmentSlot> {
    match kind {
        ItemKind::Weapon { .. } => Some(EquipmentSlot::Weapon),
        ItemKind::Armor { .. } => Some(EquipmentSlot::Armor),
        ItemKind::Helmet { .. } => Some(EquipmentSlot::Helmet),
        ItemKind::Shield { .. } => Some(EquipmentSlot::Shield),
        _ => None,
    }
}

fn stack_at(character: &CharacterInfo, index: usize) -> Result<ItemStack, ItemError> {
    character
        .inventory
        .get(index)
        .ok_or(ItemError::InvalidSlot(index))?
        .ok_or(ItemError::EmptySlot(index))
}

/// Template of the item equipped in `slot`, if any
pub fn equipped<'a>(
    character: &CharacterInfo,
    content: &'a Content,
    slot: EquipmentSlot,
) -> Option<&'a ItemTemplate> {
    let index = character.equipment.get(slot)? as usize;
    let stack = character.inventory.get(index).copied().flatten()?;
    content.item(stack.item)
}

pub fn has_item(character: &CharacterInfo, item: u32) -> bool {
    character
        .inventory
        .iter()
        .flatten()
        .any(|stack| stack.item == item && stack.quantity > 0)
}

/// Adds items, merging into an existing stack when the item stacks
///
/// Returns the inventory index that received the items.
pub fn give_item(
    character: &mut CharacterInfo,
    content: &Content,
    item: u32,
    quantity: u32,
    durability: Option<u32>,
) -> Result<usize, ItemError> {
    let template = content.item(item).ok_or(ItemError::UnknownItem(item))?;

    if template.stackable {
        let existing = character
            .inventory
            .iter_mut()
            .enumerate()
            .find_map(|(index, slot)| match slot {
                Some(stack) if stack.item == item => Some((index, stack)),
                _ => None,
            });
        if let Some((index, stack)) = existing {
            stack.quantity = stack.quantity.saturating_add(quantity);
            return Ok(index);
        }
    }

    let index = character
        .inventory
        .iter()
        .position(Option::is_none)
        .ok_or(ItemError::InventoryFull)?;
    character.inventory[index] = Some(ItemStack {
        item,
        quantity: if template.stackable { quantity } else { 1 },
        durability: durability.unwrap_or(template.max_durability),
    });
    Ok(index)
}

/// Adds as many of `quantity` as fit; non-stackable items take one slot each
///
/// Returns how many were added. Fails with [`ItemError::InventoryFull`] only
/// when nothing fit.
pub fn give_items(
    character: &mut CharacterInfo,
    content: &Content,
    item: u32,
    quantity: u32,
    durability: Option<u32>,
) -> Result<u32, ItemError> {
    let template = content.item(item).ok_or(ItemError::UnknownItem(item))?;
    if template.stackable {
        give_item(character, content, item, quantity, durability)?;
        return Ok(quantity);
    }

    let mut given = 0;
    while given < quantity {
        match give_item(character, content, item, 1, durability) {
            Ok(_) => given += 1,
            Err(ItemError::InventoryFull) if given > 0 => break,
            Err(e) => return Err(e),
        }
    }
    Ok(given)
}

/// Removes up to the held quantity from a slot, unequipping it when emptied
pub fn take_item(
    character: &mut CharacterInfo,
    index: usize,
    quantity: u32,
) -> Result<ItemStack, ItemError> {
    let mut stack = stack_at(character, index)?;
    if quantity == 0 || quantity > stack.quantity {
        return Err(ItemError::InsufficientQuantity {
            requested: quantity,
            held: stack.quantity,
        });
    }

    let remaining = stack.quantity - quantity;
    if remaining == 0 {
        character.inventory[index] = None;
        if let Some(slot) = character.equipment.slot_of(index as u8) {
            character.equipment.set(slot, None);
        }
    } else if let Some(held) = character.inventory[index].as_mut() {
        held.quantity = remaining;
    }

    stack.quantity = quantity;
    Ok(stack)
}

pub fn unequip(character: &mut CharacterInfo, slot: EquipmentSlot) -> bool {
    let was_equipped = character.equipment.get(slot).is_some();
    character.equipment.set(slot, None);
    was_equipped
}

/// Uses the item in `index`: potions are drunk, equipment is toggled
pub fn use_item(
    character: &mut CharacterInfo,
    content: &Content,
    index: usize,
) -> Result<ItemUse, ItemError> {
    let stack = stack_at(character, index)?;
    let template = content
        .item(stack.item)
        .ok_or(ItemError::UnknownItem(stack.item))?;

    if let ItemKind::Potion {
        health,
        mana,
        stamina,
    } = template.kind
    {
        take_item(character, index, 1)?;
        character.heal(health, mana, stamina);
        return Ok(ItemUse::Consumed);
    }

    let slot = equipment_slot(template.kind).ok_or(ItemError::NotUsable(stack.item))?;
    if character.equipment.get(slot) == Some(index as u8) {
        character.equipment.set(slot, None);
        Ok(ItemUse::Unequipped(slot))
    } else {
        character.equipment.set(slot, Some(index as u8));
        Ok(ItemUse::Equipped(slot))
    }
}

/// Consumes one durability point of the item in `slot`
///
/// An item worn down to zero is unequipped and destroyed; returns true then.
pub fn wear(character: &mut CharacterInfo, slot: EquipmentSlot) -> bool {
    let Some(index) = character.equipment.get(slot) else {
        return false;
    };
    let index = index as usize;
    let Some(stack) = character.inventory.get_mut(index).and_then(Option::as_mut) else {
        character.equipment.set(slot, None);
        return false;
    };

    stack.durability = stack.durability.saturating_sub(1);
    if stack.durability == 0 {
        character.inventory[index] = None;
        character.equipment.set(slot, None);
        return true;
    }
    false
}

pub fn inventory_command(character: &CharacterInfo) -> InventoryCommand {
    InventoryCommand {
        items: character
            .inventory
            .iter()
            .enumerate()
            .filter_map(|(slot, stack)| {
                stack.map(|stack| InventoryEntry {
                    slot: slot as u8,
                    stack,
                })
            })
            .collect(),
    }
}

pub fn equipment_command(character: &CharacterInfo) -> EquipmentCommand {
    let equipment = character.equipment;
    EquipmentCommand {
        weapon: equipment.weapon,
        armor: equipment.armor,
        helmet: equipment.helmet,
        shield: equipment.shield,
    }
}
