//! # Slot Configuration
//!
//! Immutable per-slot configuration loaded once at startup.

use crate::item::ItemInstance;
use crate::tag::{Tag, TagSet};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::hash::{Hash, Hasher};

// Fixed keys so slot hashes are stable across runs and processes.
const HASH_K0: u64 = 0x6172_6d6f_7279_5f73;
const HASH_K1: u64 = 0x6c6f_745f_6366_6721;

/// Coarse slot category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotType {
    /// Unconfigured slot.
    #[default]
    None,
    /// Main weapon.
    PrimaryWeapon,
    /// Backup weapon.
    SecondaryWeapon,
    /// Sidearm holster.
    Holster,
    /// Melee scabbard.
    Scabbard,
    /// Off-hand (shields, torches).
    OffHand,
    /// Helmets and hats.
    Headwear,
    /// Chest armor.
    BodyArmor,
    /// Gloves and gauntlets.
    Hands,
    /// Leg armor.
    Legs,
    /// Boots.
    Feet,
    /// Backpacks.
    Backpack,
    /// Rings, amulets.
    Accessory,
    /// Consumable quick slots.
    QuickSlot,
    /// Cosmetic overlays.
    Cosmetic,
}

/// Configuration of one equipment slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Real slot index in the store.
    pub index: usize,
    /// Slot category.
    #[serde(default)]
    pub slot_type: SlotType,
    /// Semantic slot tag (e.g. `Equipment.Slot.Hand.Main`).
    pub slot_tag: Tag,
    /// Item types accepted. Empty accepts all.
    #[serde(default)]
    pub allowed_item_types: TagSet,
    /// Item types rejected (exact match).
    #[serde(default)]
    pub disallowed_item_types: TagSet,
    /// Whether the slot must be filled.
    #[serde(default)]
    pub required: bool,
}

impl SlotConfig {
    /// Creates a slot accepting every item type.
    #[must_use]
    pub fn new(index: usize, slot_type: SlotType, slot_tag: impl Into<Tag>) -> Self {
        Self {
            index,
            slot_type,
            slot_tag: slot_tag.into(),
            allowed_item_types: TagSet::new(),
            disallowed_item_types: TagSet::new(),
            required: false,
        }
    }

    /// Accepts an item type (and everything nested under it).
    #[must_use]
    pub fn allow(mut self, item_type: impl Into<Tag>) -> Self {
        self.allowed_item_types.insert(item_type);
        self
    }

    /// Rejects an exact item type.
    #[must_use]
    pub fn deny(mut self, item_type: impl Into<Tag>) -> Self {
        self.disallowed_item_types.insert(item_type);
        self
    }

    /// Marks the slot as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Returns true if the slot accepts `item_type`.
    #[must_use]
    pub fn can_equip_item_type(&self, item_type: &Tag) -> bool {
        if self.disallowed_item_types.has_exact(item_type) {
            return false;
        }
        self.allowed_item_types.is_empty() || self.allowed_item_types.has_tag(item_type)
    }

    /// Stable hash of the whole configuration.
    #[must_use]
    pub fn config_hash(&self) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(HASH_K0, HASH_K1);
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// One slot as seen by the rule engines.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotSnapshot {
    /// Real slot index.
    pub index: usize,
    /// Item in the slot, if any.
    pub item: Option<ItemInstance>,
    /// Slot configuration.
    pub config: SlotConfig,
}

impl SlotSnapshot {
    /// Creates an empty slot snapshot.
    #[must_use]
    pub fn empty(config: SlotConfig) -> Self {
        Self {
            index: config.index,
            item: None,
            config,
        }
    }

    /// Returns true if the slot holds an item.
    #[inline]
    #[must_use]
    pub const fn is_occupied(&self) -> bool {
        self.item.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_equip_item_type() {
        let slot = SlotConfig::new(0, SlotType::PrimaryWeapon, "Equipment.Slot.Hand.Main")
            .allow("Item.Weapon")
            .deny("Item.Weapon.Bow");

        assert!(slot.can_equip_item_type(&Tag::new("Item.Weapon.Sword")));
        assert!(!slot.can_equip_item_type(&Tag::new("Item.Weapon.Bow")));
        assert!(slot.can_equip_item_type(&Tag::new("Item.Weapon.Bow.Long")));
        assert!(!slot.can_equip_item_type(&Tag::new("Item.Armor.Heavy")));

        let open = SlotConfig::new(1, SlotType::Backpack, "Equipment.Slot.Backpack");
        assert!(open.can_equip_item_type(&Tag::new("Item.Anything")));
    }

    #[test]
    fn test_config_hash_is_stable_and_sensitive() {
        let a = SlotConfig::new(0, SlotType::Headwear, "Equipment.Slot.Head");
        let b = a.clone();
        assert_eq!(a.config_hash(), b.config_hash());

        let c = a.clone().allow("Item.Armor");
        assert_ne!(a.config_hash(), c.config_hash());
    }
}
