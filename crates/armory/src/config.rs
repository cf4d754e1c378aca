//! # ARMORY Configuration
//!
//! **One TOML document, one section per engine.**
//!
//! ```toml
//! [transaction]
//! timeout_secs = 30
//!
//! [character]
//! level = 12
//! strength = 10.0
//!
//! [[slots]]
//! index = 0
//! slot_type = "PrimaryWeapon"
//! slot_tag = "Equipment.Slot.Hand.Main"
//!
//! [[items]]
//! item_id = "Longsword"
//! item_type = "Item.Weapon.Sword"
//! ```
//!
//! Every section is optional and falls back to its defaults.

use crate::error::{ServiceError, ServiceResult};
use armory_core::{ItemCatalog, ItemDefinition, SlotConfig, StaticAttributes, ATTR_LEVEL, ATTR_STRENGTH};
use armory_rules::{ConflictConfig, CoordinatorConfig, SlotRestriction, ValidatorConfig, WeightConfig};
use armory_transaction::TransactionConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Character attributes fed to the level and weight rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    /// Character level.
    pub level: u32,
    /// Strength attribute.
    pub strength: f32,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            level: 1,
            strength: 0.0,
        }
    }
}

impl CharacterConfig {
    /// Attribute table for the rule engines.
    #[must_use]
    pub fn attributes(&self) -> StaticAttributes {
        StaticAttributes::new()
            .with(ATTR_LEVEL, self.level as f32)
            .with(ATTR_STRENGTH, self.strength)
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmoryConfig {
    /// Transaction processor.
    pub transaction: TransactionConfig,
    /// Slot validator.
    pub validator: ValidatorConfig,
    /// Weight engine.
    pub weight: WeightConfig,
    /// Rules coordinator.
    pub coordinator: CoordinatorConfig,
    /// Conflict engine.
    pub conflict: ConflictConfig,
    /// Character attributes.
    pub character: CharacterConfig,
    /// Slot layout.
    pub slots: Vec<SlotConfig>,
    /// Item catalog.
    pub items: Vec<ItemDefinition>,
    /// Restrictions keyed by slot tag.
    pub restrictions: BTreeMap<String, SlotRestriction>,
}

impl ArmoryConfig {
    /// Server preset for every section that has one.
    #[must_use]
    pub fn production() -> Self {
        Self {
            transaction: TransactionConfig::production(),
            validator: ValidatorConfig::production(),
            weight: WeightConfig::production(),
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the document does not parse or fails [`validate`](Self::validate).
    pub fn from_toml_str(source: &str) -> ServiceResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ServiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Serializes back to TOML.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> ServiceResult<String> {
        toml::to_string(self).map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Checks cross-section consistency.
    ///
    /// # Errors
    ///
    /// Returns `Config` on duplicate slot indices, duplicate item ids or
    /// out-of-range thresholds.
    pub fn validate(&self) -> ServiceResult<()> {
        let mut indices = BTreeSet::new();
        if let Some(slot) = self.slots.iter().find(|s| !indices.insert(s.index)) {
            return Err(ServiceError::Config(format!("slot index {} is defined twice", slot.index)));
        }
        let mut ids = BTreeSet::new();
        if let Some(item) = self.items.iter().find(|i| !ids.insert(i.item_id.clone())) {
            return Err(ServiceError::Config(format!("item {} is defined twice", item.item_id.as_str())));
        }
        if self.weight.base_capacity < 0.0 || self.weight.max_overweight_ratio < 1.0 {
            return Err(ServiceError::Config(
                "weight capacity must be non-negative and max_overweight_ratio at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.conflict.low_compatibility_threshold) {
            return Err(ServiceError::Config(
                "low_compatibility_threshold must be within 0..=1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the item catalog.
    #[must_use]
    pub fn catalog(&self) -> ItemCatalog {
        ItemCatalog::from_definitions(self.items.iter().cloned())
    }
}
