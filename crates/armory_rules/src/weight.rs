//! # Weight Rules Engine
//!
//! **Stateless carry-capacity math.**
//!
//! ```text
//!   capacity = max(0, base_capacity + strength * capacity_per_strength)
//!
//!   total <= capacity                          ──> pass (Info)
//!   total >  capacity * max_overweight_ratio   ──> fail (Error, blocking)
//!   overweight disallowed                      ──> fail (Error, blocking)
//!   otherwise                                  ──> pass (Warning, overridable)
//! ```
//!
//! Encumbrance is informational only and never blocks.

use crate::result::{RuleCheckResult, RuleSeverity, RuleType};
use crate::validator::item_unit_weight;
use armory_core::{
    names, AttributeProvider, ItemDataProvider, ItemDefinition, ItemInstance, Tag, ATTR_STRENGTH,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const RULE_WEIGHT_LIMIT: &str = "Rule.Weight.Limit";
const RULE_ENCUMBRANCE: &str = "Rule.Weight.Encumbrance";

/// Weight engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Capacity at zero strength.
    pub base_capacity: f32,
    /// Capacity gained per strength point.
    pub capacity_per_strength: f32,
    /// Load ratio at which a character counts as encumbered.
    pub encumbered_threshold: f32,
    /// Load ratio at which a character counts as overweight.
    pub overweight_threshold: f32,
    /// Whether carrying more than capacity is allowed at all.
    pub allow_overweight: bool,
    /// Hard ceiling as a multiple of capacity.
    pub max_overweight_ratio: f32,
    /// Weight multipliers by item tag.
    pub type_modifiers: BTreeMap<Tag, f32>,
}

impl Default for WeightConfig {
    fn default() -> Self {
        let type_modifiers = [
            (names::ARMOR_HEAVY, 1.25),
            (names::ARMOR_LIGHT, 0.85),
            (names::WEAPON_HEAVY, 1.15),
            (names::CONSUMABLE, 0.9),
        ]
        .into_iter()
        .map(|(tag, factor)| (Tag::new(tag), factor))
        .collect();

        Self {
            base_capacity: 40.0,
            capacity_per_strength: 2.0,
            encumbered_threshold: 0.75,
            overweight_threshold: 1.0,
            allow_overweight: true,
            max_overweight_ratio: 1.5,
            type_modifiers,
        }
    }
}

impl WeightConfig {
    /// Server preset: no overweight tolerance beyond 25%.
    #[must_use]
    pub fn production() -> Self {
        Self {
            max_overweight_ratio: 1.25,
            ..Self::default()
        }
    }
}

/// Encumbrance classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncumbranceLevel {
    /// Below the encumbered threshold.
    Normal,
    /// At or above the encumbered threshold.
    Encumbered,
    /// At or above the overweight threshold.
    Overweight,
}

impl EncumbranceLevel {
    /// Tag reported in result context.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Normal => "Encumbrance.Normal",
            Self::Encumbered => "Encumbrance.Encumbered",
            Self::Overweight => "Encumbrance.Overweight",
        }
    }
}

impl fmt::Display for EncumbranceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Carry-capacity and encumbrance rules.
pub struct WeightRulesEngine {
    config: WeightConfig,
    catalog: Option<Arc<dyn ItemDataProvider>>,
    attributes: Option<Arc<dyn AttributeProvider>>,
}

impl WeightRulesEngine {
    /// Creates an engine with no catalog and no attribute source.
    #[must_use]
    pub const fn new(config: WeightConfig) -> Self {
        Self {
            config,
            catalog: None,
            attributes: None,
        }
    }

    /// Reads item definitions from `catalog` for weights and modifiers.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn ItemDataProvider>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Reads strength from `attributes`.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Arc<dyn AttributeProvider>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &WeightConfig {
        &self.config
    }

    /// Capacity for a given strength. Never negative.
    #[must_use]
    pub fn calculate_weight_capacity(&self, strength: f32) -> f32 {
        (self.config.base_capacity + strength * self.config.capacity_per_strength).max(0.0)
    }

    /// Capacity of the character behind the attribute provider.
    ///
    /// Strength reads as 0 when unavailable.
    #[must_use]
    pub fn character_capacity(&self) -> f32 {
        let strength = self
            .attributes
            .as_ref()
            .and_then(|a| a.attribute(ATTR_STRENGTH))
            .unwrap_or(0.0);
        self.calculate_weight_capacity(strength)
    }

    /// Gates adding `additional` weight on top of `current`.
    #[must_use]
    pub fn check_weight_limit(&self, current: f32, additional: f32, capacity: f32) -> RuleCheckResult {
        let total = current + additional;
        if total <= capacity {
            return RuleCheckResult::pass(RuleType::Weight, "Within carry capacity")
                .with_tag(RULE_WEIGHT_LIMIT)
                .with_context("Current", current)
                .with_context("Additional", additional)
                .with_context("Capacity", capacity);
        }

        let max_allowed = capacity * self.config.max_overweight_ratio.max(1.0);
        if !self.config.allow_overweight || total > max_allowed {
            return RuleCheckResult::fail(
                RuleType::Weight,
                RuleSeverity::Error,
                format!("Total weight {total:.1} exceeds the limit of {max_allowed:.1}"),
            )
            .with_tag(RULE_WEIGHT_LIMIT)
            .with_context("TotalWeight", total)
            .with_context("Capacity", capacity)
            .with_context("MaxAllowed", max_allowed);
        }

        let ratio = self.encumbrance_ratio(total, capacity);
        RuleCheckResult::pass_with_warning(
            RuleType::Weight,
            format!("Overweight: {total:.1} of {capacity:.1}"),
        )
        .with_confidence(1.0 / ratio.max(1.0))
        .with_tag(RULE_WEIGHT_LIMIT)
        .with_context("TotalWeight", total)
        .with_context("Capacity", capacity)
        .with_context("MaxAllowed", max_allowed)
    }

    /// Load ratio in `[0, 2]`.
    #[must_use]
    pub fn encumbrance_ratio(&self, weight: f32, capacity: f32) -> f32 {
        if capacity <= 0.0 {
            return if weight > 0.0 { 2.0 } else { 0.0 };
        }
        (weight / capacity).clamp(0.0, 2.0)
    }

    /// Classifies a load ratio.
    #[must_use]
    pub fn encumbrance_level(&self, ratio: f32) -> EncumbranceLevel {
        if ratio >= self.config.overweight_threshold {
            EncumbranceLevel::Overweight
        } else if ratio >= self.config.encumbered_threshold {
            EncumbranceLevel::Encumbered
        } else {
            EncumbranceLevel::Normal
        }
    }

    /// Informational encumbrance report. Always passes.
    #[must_use]
    pub fn check_encumbrance(&self, weight: f32, capacity: f32) -> RuleCheckResult {
        let ratio = self.encumbrance_ratio(weight, capacity);
        let level = self.encumbrance_level(ratio);
        let message = format!("Load {:.0}% ({level})", ratio * 100.0);
        let result = if ratio >= self.config.overweight_threshold {
            RuleCheckResult::pass_with_warning(RuleType::Weight, message)
        } else {
            RuleCheckResult::pass(RuleType::Weight, message)
        };
        result
            .with_tag(RULE_ENCUMBRANCE)
            .with_context("Ratio", ratio)
            .with_context("Encumbrance", level.tag())
    }

    /// Weight of one stack, modifiers applied.
    #[must_use]
    pub fn calculate_item_weight(&self, item: &ItemInstance) -> f32 {
        let definition = self.definition(item);
        let base = item_unit_weight(item, definition.as_ref()) * item.quantity.max(1) as f32;
        match definition {
            Some(def) => self.apply_weight_modifiers(base, &def),
            None => base,
        }
    }

    /// Sum of item weights.
    #[must_use]
    pub fn calculate_total_weight<'a>(&self, items: impl IntoIterator<Item = &'a ItemInstance>) -> f32 {
        items
            .into_iter()
            .map(|item| self.calculate_item_weight(item))
            .sum()
    }

    /// Applies every configured modifier whose tag the item carries.
    #[must_use]
    pub fn apply_weight_modifiers(&self, weight: f32, definition: &ItemDefinition) -> f32 {
        self.config
            .type_modifiers
            .iter()
            .filter(|(tag, _)| definition.has_tag(tag))
            .fold(weight, |acc, (_, factor)| acc * factor)
    }

    /// Total weight per item category (first two tag segments).
    #[must_use]
    pub fn analyze_weight_distribution(&self, items: &[ItemInstance]) -> BTreeMap<String, f32> {
        let mut distribution = BTreeMap::new();
        for item in items {
            let category = self
                .definition(item)
                .map_or_else(|| names::ITEM_UNKNOWN.to_string(), |d| category_of(&d.item_type));
            *distribution.entry(category).or_insert(0.0) += self.calculate_item_weight(item);
        }
        distribution
    }

    /// The `count` heaviest items, heaviest first.
    #[must_use]
    pub fn find_heaviest_items(&self, items: &[ItemInstance], count: usize) -> Vec<(ItemInstance, f32)> {
        let mut weighted: Vec<_> = items
            .iter()
            .map(|item| (item.clone(), self.calculate_item_weight(item)))
            .collect();
        weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
        weighted.truncate(count);
        weighted
    }

    /// Weight gate for equipping `item` on top of `carried`.
    #[must_use]
    pub fn evaluate(&self, item: Option<&ItemInstance>, carried: &[ItemInstance]) -> RuleCheckResult {
        let current = self.calculate_total_weight(carried);
        let additional = item.map_or(0.0, |i| self.calculate_item_weight(i));
        self.check_weight_limit(current, additional, self.character_capacity())
    }

    fn definition(&self, item: &ItemInstance) -> Option<ItemDefinition> {
        self.catalog.as_ref()?.item_definition(&item.item_id)
    }
}

impl fmt::Debug for WeightRulesEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightRulesEngine")
            .field("config", &self.config)
            .field("catalog", &self.catalog.is_some())
            .field("attributes", &self.attributes.is_some())
            .finish()
    }
}

fn category_of(item_type: &Tag) -> String {
    item_type
        .as_str()
        .splitn(3, '.')
        .take(2)
        .collect::<Vec<_>>()
        .join(".")
}
