//! # Compatibility Rules Engine
//!
//! The hard placement gate is the [`SlotValidator`]; this engine maps its
//! verdicts into rule results and layers durability on top.
//!
//! ```text
//!   durability <= 0    ──> Error   (blocking)
//!   durability <  0.2  ──> Warning (overridable, confidence 0.7)
//! ```

use crate::context::{PlacementContext, RuleContext};
use crate::result::{AggregatedRuleResult, RuleCheckResult, RuleSeverity, RuleType};
use crate::validator::{SlotValidator, ValidationResult};
use armory_core::{ItemInstance, OperationType, SlotConfig, SlotSnapshot, ValidationFailure};
use std::sync::Arc;

const RULE_PLACEMENT: &str = "Rule.Compatibility.Placement";
const RULE_DURABILITY: &str = "Rule.Compatibility.Durability";
const RULE_ITEM_TYPE: &str = "Rule.Compatibility.ItemType";

/// Durability below this fraction produces a warning.
pub const LOW_DURABILITY_THRESHOLD: f32 = 0.2;

/// Placement and durability checks.
#[derive(Debug)]
pub struct CompatibilityRulesEngine {
    validator: Arc<SlotValidator>,
}

impl CompatibilityRulesEngine {
    /// Wraps a shared validator.
    #[must_use]
    pub const fn new(validator: Arc<SlotValidator>) -> Self {
        Self { validator }
    }

    /// The wrapped validator.
    #[must_use]
    pub const fn validator(&self) -> &Arc<SlotValidator> {
        &self.validator
    }

    /// Hard placement gate for `ctx` against the real slot layout.
    ///
    /// Moves and swaps check both directions.
    #[must_use]
    pub fn check_placement(&self, ctx: &RuleContext, slots: &[SlotSnapshot]) -> RuleCheckResult {
        let placement = placement_context(ctx, slots);
        let find = |index: Option<usize>| index.and_then(|i| slots.iter().find(|s| s.index == i));

        let verdict = match ctx.operation_type {
            OperationType::Unequip => {
                return RuleCheckResult::pass(RuleType::SlotValidation, "Unequip needs no placement check")
                    .with_tag(RULE_PLACEMENT);
            }
            OperationType::Move | OperationType::Swap => {
                let (Some(source), Some(target)) = (find(ctx.source_slot), find(ctx.target_slot)) else {
                    return invalid_slot(ctx.source_slot.or(ctx.target_slot));
                };
                let moving = ctx.item.as_ref().or(source.item.as_ref());
                let returning = if ctx.operation_type == OperationType::Swap {
                    target.item.as_ref()
                } else {
                    None
                };
                self.validator
                    .can_swap(&source.config, moving, &target.config, returning, &placement)
            }
            _ => {
                let Some(target) = find(ctx.target_slot) else {
                    return invalid_slot(ctx.target_slot);
                };
                match ctx.item.as_ref() {
                    Some(item) => self.validator.can_place_in(&target.config, item, &placement),
                    None => {
                        return RuleCheckResult::pass(RuleType::SlotValidation, "No item to place")
                            .with_tag(RULE_PLACEMENT);
                    }
                }
            }
        };
        validation_to_rule(&verdict)
    }

    /// Durability gate.
    #[must_use]
    pub fn check_durability(&self, item: &ItemInstance) -> RuleCheckResult {
        if item.is_broken() {
            return RuleCheckResult::fail(
                RuleType::Compatibility,
                RuleSeverity::Error,
                format!("{} is broken and cannot be equipped", item.item_id),
            )
            .with_tag(RULE_DURABILITY)
            .with_context("Durability", item.durability);
        }
        if item.durability < LOW_DURABILITY_THRESHOLD {
            return RuleCheckResult::fail(
                RuleType::Compatibility,
                RuleSeverity::Warning,
                format!("{} is nearly broken ({:.0}%)", item.item_id, item.durability * 100.0),
            )
            .with_confidence(0.7)
            .with_tag(RULE_DURABILITY)
            .with_context("Durability", item.durability);
        }
        RuleCheckResult::pass(RuleType::Compatibility, "Durability is sufficient").with_tag(RULE_DURABILITY)
    }

    /// Whether the item's catalog type fits the slot's type filters.
    #[must_use]
    pub fn check_type_compatibility(&self, item: &ItemInstance, slot: &SlotConfig) -> RuleCheckResult {
        let Some(definition) = self.validator.catalog().item_definition(&item.item_id) else {
            return RuleCheckResult::fail(
                RuleType::Compatibility,
                RuleSeverity::Critical,
                format!("No item data for {}", item.item_id),
            )
            .with_tag(RULE_ITEM_TYPE);
        };
        if slot.can_equip_item_type(&definition.item_type) {
            RuleCheckResult::pass(RuleType::Compatibility, "Item type is allowed").with_tag(RULE_ITEM_TYPE)
        } else {
            RuleCheckResult::fail(
                RuleType::Compatibility,
                RuleSeverity::Critical,
                format!("{} cannot go in {}", definition.item_type, slot.slot_tag),
            )
            .with_tag(RULE_ITEM_TYPE)
            .with_context("ItemType", &definition.item_type)
            .with_context("SlotTag", &slot.slot_tag)
        }
    }

    /// Indices of slots that accept `item` given what is equipped.
    #[must_use]
    pub fn find_compatible_slots(&self, item: &ItemInstance, slots: &[SlotSnapshot]) -> Vec<usize> {
        let placement = PlacementContext {
            character_level: None,
            equipped: equipped(slots),
        };
        slots
            .iter()
            .filter(|s| self.validator.can_place_in(&s.config, item, &placement).valid)
            .map(|s| s.index)
            .collect()
    }

    /// Soft fit in `[0, 1]`: zero when the validator refuses, otherwise
    /// scaled by durability with a bonus when the catalog names this slot.
    #[must_use]
    pub fn compatibility_score(&self, item: &ItemInstance, slot: &SlotConfig) -> f32 {
        if !self.validator.can_place(slot, item).valid {
            return 0.0;
        }
        let Some(definition) = self.validator.catalog().item_definition(&item.item_id) else {
            return 0.5;
        };
        let slot_bonus = if !definition.equipment_slot.is_empty()
            && slot.slot_tag.matches(&definition.equipment_slot)
        {
            1.15
        } else {
            1.0
        };
        let durability = 0.6 + 0.4 * item.durability.clamp(0.0, 1.0);
        (durability * slot_bonus).clamp(0.0, 1.0)
    }

    /// Placement gate followed by durability, stopping on a hard failure.
    #[must_use]
    pub fn evaluate(&self, ctx: &RuleContext, slots: &[SlotSnapshot]) -> AggregatedRuleResult {
        let mut aggregated = AggregatedRuleResult::new();
        let placement = self.check_placement(ctx, slots);
        let stop = placement.is_hard_failure();
        aggregated.push(placement);
        if stop {
            return aggregated;
        }
        if let Some(item) = moving_item(ctx, slots) {
            aggregated.push(self.check_durability(item));
        }
        aggregated
    }
}

/// The item an operation puts somewhere, if any.
pub(crate) fn moving_item<'a>(ctx: &'a RuleContext, slots: &'a [SlotSnapshot]) -> Option<&'a ItemInstance> {
    ctx.item.as_ref().or_else(|| match ctx.operation_type {
        OperationType::Move | OperationType::Swap => ctx
            .source_slot
            .and_then(|i| slots.iter().find(|s| s.index == i))
            .and_then(|s| s.item.as_ref()),
        _ => None,
    })
}

fn equipped(slots: &[SlotSnapshot]) -> Vec<(usize, ItemInstance)> {
    slots
        .iter()
        .filter_map(|s| s.item.clone().map(|item| (s.index, item)))
        .collect()
}

fn placement_context(ctx: &RuleContext, slots: &[SlotSnapshot]) -> PlacementContext {
    PlacementContext {
        character_level: ctx.character_level,
        equipped: equipped(slots),
    }
}

fn invalid_slot(index: Option<usize>) -> RuleCheckResult {
    let message = index.map_or_else(|| "Operation has no slot".to_string(), |i| format!("Invalid slot index {i}"));
    RuleCheckResult::fail(RuleType::SlotValidation, RuleSeverity::Critical, message)
        .with_tag(RULE_PLACEMENT)
        .with_context("FailureCode", ValidationFailure::InvalidSlot.code())
}

fn validation_to_rule(verdict: &ValidationResult) -> RuleCheckResult {
    let Some(failure) = verdict.failure.filter(|_| !verdict.valid) else {
        return RuleCheckResult::pass(RuleType::SlotValidation, "Placement allowed").with_tag(RULE_PLACEMENT);
    };
    let severity = match failure {
        ValidationFailure::InvalidSlot
        | ValidationFailure::UniqueConstraint
        | ValidationFailure::TypeIncompatible => RuleSeverity::Critical,
        _ => RuleSeverity::Error,
    };
    let mut result = RuleCheckResult::fail(RuleType::SlotValidation, severity, verdict.message.clone())
        .with_tag(verdict.rule_tag.clone());
    result.context.extend(verdict.context.clone());
    result
}
