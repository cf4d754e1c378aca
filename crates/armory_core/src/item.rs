//! # Item Instances
//!
//! Runtime items as they sit in equipment slots. Static per-type data lives
//! in [`crate::catalog`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Runtime property holding an item's weight.
pub const PROP_WEIGHT: &str = "Weight";
/// Runtime property holding an item's level requirement.
pub const PROP_REQUIRED_LEVEL: &str = "RequiredLevel";

/// Identifier of an item type (e.g. `Knight_Helmet`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an item id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a single physical item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generates a fresh random instance id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An item instance.
///
/// Owned by whichever slot currently holds it and copied into snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemInstance {
    /// Item type.
    pub item_id: ItemId,
    /// Physical identity.
    pub instance_id: InstanceId,
    /// Stack size.
    pub quantity: u32,
    /// Remaining durability as a fraction of maximum, in `[0, 1]`.
    pub durability: f32,
    /// Arbitrary runtime properties.
    pub properties: BTreeMap<String, f32>,
}

impl ItemInstance {
    /// Creates a single, fully repaired instance with a fresh identity.
    #[must_use]
    pub fn new(item_id: impl Into<ItemId>) -> Self {
        Self {
            item_id: item_id.into(),
            instance_id: InstanceId::generate(),
            quantity: 1,
            durability: 1.0,
            properties: BTreeMap::new(),
        }
    }

    /// Sets the stack size.
    #[must_use]
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Sets the durability fraction (clamped to `[0, 1]`).
    #[must_use]
    pub fn with_durability(mut self, durability: f32) -> Self {
        self.durability = durability.clamp(0.0, 1.0);
        self
    }

    /// Sets a runtime property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: f32) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Sets the runtime weight.
    #[must_use]
    pub fn with_weight(self, weight: f32) -> Self {
        self.with_property(PROP_WEIGHT, weight)
    }

    /// Reads a runtime property, falling back to `default`.
    #[inline]
    #[must_use]
    pub fn property(&self, name: &str, default: f32) -> f32 {
        self.properties.get(name).copied().unwrap_or(default)
    }

    /// Returns true if the item has no durability left.
    #[inline]
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.durability <= 0.0
    }
}

impl From<&str> for ItemInstance {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_identity_is_unique() {
        let a = ItemInstance::new("Knight_Helmet");
        let b = ItemInstance::new("Knight_Helmet");
        assert_eq!(a.item_id, b.item_id);
        assert_ne!(a.instance_id, b.instance_id);
        assert_ne!(a, b);
    }

    #[test]
    fn test_runtime_properties() {
        let item = ItemInstance::new("Rope").with_weight(2.5).with_durability(1.7);
        assert!((item.property(PROP_WEIGHT, 0.0) - 2.5).abs() < f32::EPSILON);
        assert!((item.property(PROP_REQUIRED_LEVEL, 0.0)).abs() < f32::EPSILON);
        assert!((item.durability - 1.0).abs() < f32::EPSILON);
        assert!(!item.is_broken());
        assert!(item.with_durability(-1.0).is_broken());
    }

    #[test]
    fn test_item_id_from_owned_string() {
        let item = ItemInstance::new(format!("Seed{}", 3));
        assert_eq!(item.item_id.as_str(), "Seed3");
    }
}
