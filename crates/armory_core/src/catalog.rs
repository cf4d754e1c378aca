//! # Item Catalog
//!
//! Static item data and character attributes, injected into the rule engines
//! through the [`ItemDataProvider`] and [`AttributeProvider`] traits.
//!
//! Catalogs are loaded once at startup, typically from TOML:
//!
//! ```toml
//! [[items]]
//! item_id = "Greatsword"
//! display_name = "Greatsword"
//! item_type = "Item.Weapon.Sword"
//! tags = ["Item.RequiresBothHands", "Item.Weapon.Melee"]
//! equipment_slot = "Equipment.Slot.Hand.Main"
//! weight = 6.0
//! ```

use crate::error::{ArmoryError, ArmoryResult};
use crate::item::ItemId;
use crate::tag::{Tag, TagSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static data for one item type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Item type identifier.
    pub item_id: ItemId,
    /// Human readable name.
    #[serde(default)]
    pub display_name: String,
    /// Primary classification (e.g. `Item.Armor.Heavy`).
    pub item_type: Tag,
    /// Additional classification tags.
    #[serde(default)]
    pub tags: TagSet,
    /// Slot the item is designed for.
    #[serde(default)]
    pub equipment_slot: Tag,
    /// Minimum character level.
    #[serde(default)]
    pub required_level: u32,
    /// Base weight per unit.
    #[serde(default)]
    pub weight: f32,
}

impl ItemDefinition {
    /// Creates a definition with the given id and type.
    #[must_use]
    pub fn new(item_id: impl Into<ItemId>, item_type: impl Into<Tag>) -> Self {
        let item_id = item_id.into();
        Self {
            display_name: item_id.as_str().to_string(),
            item_id,
            item_type: item_type.into(),
            tags: TagSet::new(),
            equipment_slot: Tag::none(),
            required_level: 0,
            weight: 0.0,
        }
    }

    /// Adds a classification tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Sets the designed-for slot.
    #[must_use]
    pub fn with_slot(mut self, slot: impl Into<Tag>) -> Self {
        self.equipment_slot = slot.into();
        self
    }

    /// Sets the level requirement.
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.required_level = level;
        self
    }

    /// Sets the base weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Returns true if the item type or any extra tag is `tag` or nested under it.
    #[must_use]
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.item_type.matches(tag) || self.tags.has_any_under(tag)
    }

    /// Returns true if the item carries any tag under `name`.
    #[must_use]
    pub fn has_tag_named(&self, name: &str) -> bool {
        self.has_tag(&Tag::new(name))
    }
}

/// Source of static item data.
pub trait ItemDataProvider: Send + Sync {
    /// Looks up an item definition.
    fn item_definition(&self, item_id: &ItemId) -> Option<ItemDefinition>;
}

/// Source of character attributes (strength, level, ...).
pub trait AttributeProvider: Send + Sync {
    /// Reads a named attribute.
    fn attribute(&self, name: &str) -> Option<f32>;
}

/// Attribute name for strength.
pub const ATTR_STRENGTH: &str = "Strength";
/// Attribute name for character level.
pub const ATTR_LEVEL: &str = "Level";

/// A fixed attribute table.
#[derive(Clone, Debug, Default)]
pub struct StaticAttributes {
    values: HashMap<String, f32>,
}

impl StaticAttributes {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f32) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

impl AttributeProvider for StaticAttributes {
    fn attribute(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    items: Vec<ItemDefinition>,
}

/// In-memory item catalog.
#[derive(Clone, Debug, Default)]
pub struct ItemCatalog {
    items: HashMap<ItemId, ItemDefinition>,
}

impl ItemCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from definitions. Later duplicates replace earlier ones.
    #[must_use]
    pub fn from_definitions(definitions: impl IntoIterator<Item = ItemDefinition>) -> Self {
        let mut catalog = Self::new();
        for def in definitions {
            catalog.insert(def);
        }
        catalog
    }

    /// Parses a catalog from a TOML document with an `[[items]]` array.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the document does not parse.
    pub fn from_toml_str(source: &str) -> ArmoryResult<Self> {
        let file: CatalogFile =
            toml::from_str(source).map_err(|e| ArmoryError::InvalidConfig(e.to_string()))?;
        Ok(Self::from_definitions(file.items))
    }

    /// Adds or replaces a definition.
    pub fn insert(&mut self, definition: ItemDefinition) {
        self.items.insert(definition.item_id.clone(), definition);
    }

    /// Looks up a definition.
    #[must_use]
    pub fn get(&self, item_id: &ItemId) -> Option<&ItemDefinition> {
        self.items.get(item_id)
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ItemDataProvider for ItemCatalog {
    fn item_definition(&self, item_id: &ItemId) -> Option<ItemDefinition> {
        self.items.get(item_id).cloned()
    }
}
