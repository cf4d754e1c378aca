//! # Hierarchical Tags
//!
//! Dotted names such as `Item.Weapon.Sword` used to classify items and slots.
//!
//! ## Matching
//!
//! ```text
//!   Item.Weapon.Sword  matches  Item.Weapon.Sword   (exact)
//!   Item.Weapon.Sword  matches  Item.Weapon         (parent)
//!   Item.Weapon        !matches Item.Weapon.Sword   (child)
//!   Item.WeaponRack    !matches Item.Weapon         (prefix is not a parent)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A hierarchical tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Creates a tag from any string-like value.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The empty tag.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self(String::new())
    }

    /// Returns the dotted name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this tag has no name.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `self` equals `parent` or is nested under it.
    #[must_use]
    pub fn matches(&self, parent: &Tag) -> bool {
        if self.is_empty() || parent.is_empty() {
            return false;
        }
        match self.0.strip_prefix(parent.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An ordered set of tags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<Tag>);

impl TagSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds a tag.
    pub fn insert(&mut self, tag: impl Into<Tag>) {
        self.0.insert(tag.into());
    }

    /// Builder form of [`TagSet::insert`].
    #[must_use]
    pub fn with(mut self, tag: impl Into<Tag>) -> Self {
        self.insert(tag);
        self
    }

    /// Returns true if the set has no tags.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of tags.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if `tag` matches any member (hierarchically).
    #[must_use]
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.0.iter().any(|t| tag.matches(t))
    }

    /// Returns true if any member is nested under `parent`.
    #[must_use]
    pub fn has_any_under(&self, parent: &Tag) -> bool {
        self.0.iter().any(|t| t.matches(parent))
    }

    /// Returns true if `tag` is a member.
    #[inline]
    #[must_use]
    pub fn has_exact(&self, tag: &Tag) -> bool {
        self.0.contains(tag)
    }

    /// Iterates over the members in order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }
}

impl<T: Into<Tag>> FromIterator<T> for TagSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Well-known tag names shared by the engines.
pub mod names {
    /// Item requires both hands.
    pub const REQUIRES_BOTH_HANDS: &str = "Item.RequiresBothHands";
    /// Two-handed weapon class.
    pub const WEAPON_TWO_HANDED: &str = "Item.Weapon.TwoHanded";
    /// Primary weapon class.
    pub const WEAPON_PRIMARY: &str = "Item.Weapon.Primary";
    /// Melee weapon class.
    pub const WEAPON_MELEE: &str = "Item.Weapon.Melee";
    /// Heavy weapon class.
    pub const WEAPON_HEAVY: &str = "Item.Weapon.Heavy";
    /// Shield class.
    pub const SHIELD: &str = "Item.Shield";
    /// Heavy armor class.
    pub const ARMOR_HEAVY: &str = "Item.Armor.Heavy";
    /// Medium armor class.
    pub const ARMOR_MEDIUM: &str = "Item.Armor.Medium";
    /// Light armor class.
    pub const ARMOR_LIGHT: &str = "Item.Armor.Light";
    /// Consumables.
    pub const CONSUMABLE: &str = "Item.Consumable";
    /// Unknown item bucket.
    pub const ITEM_UNKNOWN: &str = "Item.Unknown";
    /// Main-hand slot semantic tag.
    pub const SLOT_HAND_MAIN: &str = "Equipment.Slot.Hand.Main";
    /// Off-hand slot semantic tag.
    pub const SLOT_HAND_OFF: &str = "Equipment.Slot.Hand.Off";
    /// Marker for items that may occupy their equipment slot only once.
    pub const ITEM_UNIQUE: &str = "Item.Unique";
    /// Cosmetic slots, ignored by gameplay rules.
    pub const SLOT_COSMETIC: &str = "Equipment.Slot.Cosmetic";
    /// Badge slots, ignored by gameplay rules.
    pub const SLOT_BADGE: &str = "Equipment.Slot.Badge";
    /// Default equipment state.
    pub const STATE_IDLE: &str = "Equipment.State.Idle";
}
