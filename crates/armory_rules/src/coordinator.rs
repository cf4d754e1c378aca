//! # Rules Coordinator
//!
//! **One entry point, fixed order, first hard failure wins.**
//!
//! ## Pipeline
//!
//! ```text
//!   ┌───────────────┐   ┌──────────┐   ┌───────────────┐   ┌────────┐
//!   │ SlotValidator │──>│ Conflict │──>│ Compatibility │──>│ Weight │
//!   └───────────────┘   └──────────┘   └───────────────┘   └────────┘
//!          │                 │                 │
//!          └── hard failure ─┴─────────────────┴──> return immediately
//! ```
//!
//! Every stage can be disabled at runtime. Per-stage call counts and
//! wall time are kept in atomics and snapshotted by [`RulesCoordinator::statistics`].

use crate::compatibility::{moving_item, CompatibilityRulesEngine};
use crate::conflict::ConflictRulesEngine;
use crate::context::RuleContext;
use crate::result::{AggregatedRuleResult, RuleCheckResult, RuleSeverity, RuleType};
use crate::validator::SlotValidator;
use crate::weight::WeightRulesEngine;
use armory_core::{
    names, AttributeProvider, EquipmentStateSnapshot, ItemInstance, OperationRequest, SlotSnapshot, Tag,
    ATTR_LEVEL,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RULE_LOADOUT: &str = "Rule.Loadout.RequiredSlots";
const RULE_SHADOW: &str = "Rule.Loadout.Shadow";

/// Coordinator configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Run the slot validator stage.
    pub enable_slot_validation: bool,
    /// Run the conflict stage.
    pub enable_conflict: bool,
    /// Run the compatibility stage.
    pub enable_compatibility: bool,
    /// Run the weight stage.
    pub enable_weight: bool,
    /// Items in slots under these tags are ignored by conflict and weight.
    pub excluded_slot_tags: Vec<Tag>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enable_slot_validation: true,
            enable_conflict: true,
            enable_compatibility: true,
            enable_weight: true,
            excluded_slot_tags: vec![Tag::new(names::SLOT_COSMETIC), Tag::new(names::SLOT_BADGE)],
        }
    }
}

/// Pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleEngine {
    /// Slot validator placement gate.
    SlotValidation,
    /// Conflict engine.
    Conflict,
    /// Durability checks.
    Compatibility,
    /// Carry capacity.
    Weight,
}

impl RuleEngine {
    /// Stages in pipeline order.
    pub const ALL: [Self; 4] = [Self::SlotValidation, Self::Conflict, Self::Compatibility, Self::Weight];

    const fn index(self) -> usize {
        match self {
            Self::SlotValidation => 0,
            Self::Conflict => 1,
            Self::Compatibility => 2,
            Self::Weight => 3,
        }
    }
}

impl fmt::Display for RuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SlotValidation => "SlotValidation",
            Self::Conflict => "Conflict",
            Self::Compatibility => "Compatibility",
            Self::Weight => "Weight",
        };
        f.write_str(name)
    }
}

/// Per-stage metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    /// Times the stage ran.
    pub evaluations: u64,
    /// Wall time spent in the stage.
    pub total_time: Duration,
}

impl EngineMetrics {
    /// Mean time per run.
    #[must_use]
    pub fn average_time(&self) -> Duration {
        match u32::try_from(self.evaluations) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_time / n,
            Err(_) => Duration::ZERO,
        }
    }
}

/// Coordinator metrics snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStatistics {
    /// Pipeline runs.
    pub evaluations: u64,
    /// Runs that ended with a hard failure.
    pub blocked: u64,
    /// Per-stage metrics in pipeline order.
    pub engines: Vec<(RuleEngine, EngineMetrics)>,
}

#[derive(Debug, Default)]
struct StageCounters {
    runs: AtomicU64,
    nanos: AtomicU64,
}

#[derive(Debug, Default)]
struct CoordinatorCounters {
    evaluations: AtomicU64,
    blocked: AtomicU64,
    stages: [StageCounters; 4],
}

/// Runs every engine in order for one operation.
pub struct RulesCoordinator {
    config: CoordinatorConfig,
    compatibility: CompatibilityRulesEngine,
    conflict: Arc<ConflictRulesEngine>,
    weight: WeightRulesEngine,
    attributes: Option<Arc<dyn AttributeProvider>>,
    enabled: [AtomicBool; 4],
    counters: CoordinatorCounters,
}

impl RulesCoordinator {
    /// Wires the engines together.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        validator: Arc<SlotValidator>,
        conflict: Arc<ConflictRulesEngine>,
        weight: WeightRulesEngine,
    ) -> Self {
        let enabled = [
            AtomicBool::new(config.enable_slot_validation),
            AtomicBool::new(config.enable_conflict),
            AtomicBool::new(config.enable_compatibility),
            AtomicBool::new(config.enable_weight),
        ];
        Self {
            config,
            compatibility: CompatibilityRulesEngine::new(validator),
            conflict,
            weight,
            attributes: None,
            enabled,
            counters: CoordinatorCounters::default(),
        }
    }

    /// Reads the character level from `attributes` in [`Self::evaluate_operation`].
    #[must_use]
    pub fn with_attributes(mut self, attributes: Arc<dyn AttributeProvider>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The shared slot validator.
    #[must_use]
    pub fn validator(&self) -> &Arc<SlotValidator> {
        self.compatibility.validator()
    }

    /// The conflict engine.
    #[must_use]
    pub fn conflict(&self) -> &Arc<ConflictRulesEngine> {
        &self.conflict
    }

    /// The compatibility engine.
    #[must_use]
    pub const fn compatibility(&self) -> &CompatibilityRulesEngine {
        &self.compatibility
    }

    /// The weight engine.
    #[must_use]
    pub const fn weight(&self) -> &WeightRulesEngine {
        &self.weight
    }

    /// Enables or disables a stage.
    pub fn set_engine_enabled(&self, engine: RuleEngine, enabled: bool) {
        self.enabled[engine.index()].store(enabled, Ordering::Release);
        tracing::debug!(%engine, enabled, "rule engine toggled");
    }

    /// Whether a stage runs.
    #[must_use]
    pub fn is_engine_enabled(&self, engine: RuleEngine) -> bool {
        self.enabled[engine.index()].load(Ordering::Acquire)
    }

    /// Runs the pipeline for `ctx` against the real slot layout.
    #[must_use]
    pub fn evaluate_with_slots(&self, ctx: &RuleContext, slots: &[SlotSnapshot]) -> AggregatedRuleResult {
        self.counters.evaluations.fetch_add(1, Ordering::Relaxed);
        let mut aggregated = AggregatedRuleResult::new();

        if self.is_engine_enabled(RuleEngine::SlotValidation) {
            let result = self.timed(RuleEngine::SlotValidation, || self.compatibility.check_placement(ctx, slots));
            aggregated.push(result);
            if !aggregated.all_passed {
                return self.finish(aggregated, RuleEngine::SlotValidation);
            }
        }

        if self.is_engine_enabled(RuleEngine::Conflict) {
            let result = self.timed(RuleEngine::Conflict, || self.conflict.evaluate_with_slots(ctx, slots));
            aggregated.merge(result);
            if !aggregated.all_passed {
                return self.finish(aggregated, RuleEngine::Conflict);
            }
        }

        if self.is_engine_enabled(RuleEngine::Compatibility) {
            if let Some(item) = moving_item(ctx, slots) {
                let result = self.timed(RuleEngine::Compatibility, || self.compatibility.check_durability(item));
                aggregated.push(result);
                if !aggregated.all_passed {
                    return self.finish(aggregated, RuleEngine::Compatibility);
                }
            }
        }

        if self.is_engine_enabled(RuleEngine::Weight) && ctx.operation_type.writes_item() {
            if let Some(item) = ctx.item.as_ref() {
                let carried = carried_without_target(item, ctx.target_slot, slots);
                let result = self.timed(RuleEngine::Weight, || self.weight.evaluate(Some(item), &carried));
                aggregated.push(result);
                if !aggregated.all_passed {
                    return self.finish(aggregated, RuleEngine::Weight);
                }
            }
        }

        aggregated
    }

    /// Runs the pipeline for a caller request, then checks the loadout
    /// that would result from applying it.
    #[must_use]
    pub fn evaluate_operation(&self, request: &OperationRequest, slots: &[SlotSnapshot]) -> AggregatedRuleResult {
        let mut ctx = RuleContext::from_request(request);
        if let Some(level) = self
            .attributes
            .as_ref()
            .and_then(|a| a.attribute(ATTR_LEVEL))
        {
            ctx.character_level = Some(level.max(0.0) as u32);
        }
        let visible = self.without_excluded(slots, &ctx);
        ctx.current_items = visible.iter().filter_map(|s| s.item.clone()).collect();

        let mut aggregated = self.evaluate_with_slots(&ctx, &visible);
        if !aggregated.all_passed {
            return aggregated;
        }

        let mut shadow = EquipmentStateSnapshot::new(slots.to_vec());
        match shadow.apply_operation(&request.to_operation()) {
            Ok(()) => aggregated.push(self.check_loadout_compliance(&shadow.slots)),
            Err(err) => aggregated.push(
                RuleCheckResult::fail(RuleType::SlotValidation, RuleSeverity::Critical, err.to_string())
                    .with_tag(RULE_SHADOW),
            ),
        }
        aggregated
    }

    /// Warns when a required slot is empty. Never blocks.
    #[must_use]
    pub fn check_loadout_compliance(&self, slots: &[SlotSnapshot]) -> RuleCheckResult {
        let empty: Vec<String> = slots
            .iter()
            .filter(|s| s.config.required && !s.is_occupied())
            .map(|s| s.config.slot_tag.to_string())
            .collect();
        if empty.is_empty() {
            return RuleCheckResult::pass(RuleType::Loadout, "All required slots are filled").with_tag(RULE_LOADOUT);
        }
        RuleCheckResult::fail(
            RuleType::Loadout,
            RuleSeverity::Warning,
            format!("Required slots are empty: {}", empty.join(", ")),
        )
        .with_tag(RULE_LOADOUT)
        .with_context("EmptyRequiredSlots", empty.len())
    }

    /// Drops every cached placement verdict.
    pub fn clear_cache(&self) {
        self.validator().clear_cache();
    }

    /// Metrics snapshot.
    #[must_use]
    pub fn statistics(&self) -> CoordinatorStatistics {
        CoordinatorStatistics {
            evaluations: self.counters.evaluations.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            engines: RuleEngine::ALL
                .iter()
                .map(|&engine| {
                    let stage = &self.counters.stages[engine.index()];
                    (
                        engine,
                        EngineMetrics {
                            evaluations: stage.runs.load(Ordering::Relaxed),
                            total_time: Duration::from_nanos(stage.nanos.load(Ordering::Relaxed)),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Zeroes every counter.
    pub fn reset_statistics(&self) {
        self.counters.evaluations.store(0, Ordering::Relaxed);
        self.counters.blocked.store(0, Ordering::Relaxed);
        for stage in &self.counters.stages {
            stage.runs.store(0, Ordering::Relaxed);
            stage.nanos.store(0, Ordering::Relaxed);
        }
    }

    fn timed<T>(&self, engine: RuleEngine, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        let stage = &self.counters.stages[engine.index()];
        stage.runs.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        stage.nanos.fetch_add(nanos, Ordering::Relaxed);
        out
    }

    fn finish(&self, aggregated: AggregatedRuleResult, stage: RuleEngine) -> AggregatedRuleResult {
        self.counters.blocked.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%stage, summary = %aggregated.summary(), "operation blocked by rules");
        aggregated
    }

    fn without_excluded(&self, slots: &[SlotSnapshot], ctx: &RuleContext) -> Vec<SlotSnapshot> {
        slots
            .iter()
            .map(|slot| {
                let involved = Some(slot.index) == ctx.target_slot || Some(slot.index) == ctx.source_slot;
                let excluded = self
                    .config
                    .excluded_slot_tags
                    .iter()
                    .any(|tag| slot.config.slot_tag.matches(tag));
                if excluded && !involved {
                    SlotSnapshot {
                        item: None,
                        ..slot.clone()
                    }
                } else {
                    slot.clone()
                }
            })
            .collect()
    }
}

impl fmt::Debug for RulesCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RulesCoordinator")
            .field("config", &self.config)
            .field("conflict", &self.conflict)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

fn carried_without_target(item: &ItemInstance, target: Option<usize>, slots: &[SlotSnapshot]) -> Vec<ItemInstance> {
    slots
        .iter()
        .filter(|s| Some(s.index) != target)
        .filter_map(|s| s.item.clone())
        .filter(|carried| carried.instance_id != item.instance_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ValidatorConfig;
    use crate::weight::WeightConfig;
    use armory_core::{ItemCatalog, ItemDefinition, SlotConfig, SlotType};

    fn coordinator() -> RulesCoordinator {
        let catalog = Arc::new(ItemCatalog::from_definitions([
            ItemDefinition::new("Greatsword", "Item.Weapon.TwoHanded.Sword")
                .with_tag(names::REQUIRES_BOTH_HANDS)
                .with_weight(8.0),
            ItemDefinition::new("Longsword", "Item.Weapon.Sword").with_weight(3.0),
            ItemDefinition::new("Buckler", names::SHIELD).with_weight(4.0),
            ItemDefinition::new("Anvil", "Item.Weapon.Club").with_weight(100.0),
            ItemDefinition::new("Tabard", "Item.Cosmetic.Tabard"),
        ]));
        let validator = Arc::new(SlotValidator::new(ValidatorConfig::default(), catalog.clone()));
        let conflict = Arc::new(ConflictRulesEngine::new(catalog.clone()));
        conflict.load_default_rules();
        let weight = WeightRulesEngine::new(WeightConfig::default()).with_catalog(catalog);
        RulesCoordinator::new(CoordinatorConfig::default(), validator, conflict, weight)
    }

    fn slots() -> Vec<SlotSnapshot> {
        vec![
            SlotSnapshot::empty(
                SlotConfig::new(0, SlotType::PrimaryWeapon, names::SLOT_HAND_MAIN)
                    .allow("Item.Weapon")
                    .required(),
            ),
            SlotSnapshot::empty(SlotConfig::new(1, SlotType::OffHand, names::SLOT_HAND_OFF)),
            SlotSnapshot::empty(SlotConfig::new(2, SlotType::Cosmetic, names::SLOT_COSMETIC)),
        ]
    }

    #[test]
    fn test_validator_failure_short_circuits() {
        let coordinator = coordinator();
        let ctx = RuleContext::equip(ItemInstance::new("Buckler"), 0);
        let result = coordinator.evaluate_with_slots(&ctx, &slots());
        assert!(!result.all_passed);
        assert_eq!(result.len(), 1);
        assert_eq!(result.results[0].rule_type, RuleType::SlotValidation);

        let stats = coordinator.statistics();
        assert_eq!(stats.evaluations, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.engines[1].1.evaluations, 0);
    }

    #[test]
    fn test_conflict_blocks_before_weight() {
        let coordinator = coordinator();
        let mut slots = slots();
        slots[1].item = Some(ItemInstance::new("Buckler"));
        let ctx = RuleContext::equip(ItemInstance::new("Greatsword"), 0);
        let result = coordinator.evaluate_with_slots(&ctx, &slots);
        assert!(!result.all_passed);
        assert_eq!(
            result.first_hard_failure().map(|r| r.rule_type),
            Some(RuleType::Conflict)
        );
        assert_eq!(coordinator.statistics().engines[3].1.evaluations, 0);
    }

    #[test]
    fn test_weight_excludes_replaced_item() {
        let coordinator = coordinator();
        let mut slots = slots();
        slots[0].item = Some(ItemInstance::new("Anvil").with_weight(58.0));
        let ctx = RuleContext::equip(ItemInstance::new("Longsword"), 0);
        let result = coordinator.evaluate_with_slots(&ctx, &slots);
        assert!(result.all_passed);

        let heavy = RuleContext::equip(ItemInstance::new("Anvil"), 0);
        let result = coordinator.evaluate_with_slots(&heavy, &slots);
        assert_eq!(
            result.first_hard_failure().map(|r| r.rule_type),
            Some(RuleType::Weight)
        );
    }

    #[test]
    fn test_disabled_engine_is_skipped() {
        let coordinator = coordinator();
        coordinator.set_engine_enabled(RuleEngine::SlotValidation, false);
        assert!(!coordinator.is_engine_enabled(RuleEngine::SlotValidation));
        let ctx = RuleContext::equip(ItemInstance::new("Buckler"), 0);
        assert!(coordinator.evaluate_with_slots(&ctx, &slots()).all_passed);

        coordinator.reset_statistics();
        assert_eq!(coordinator.statistics().evaluations, 0);
    }

    #[test]
    fn test_evaluate_operation_checks_resulting_loadout() {
        let coordinator = coordinator();
        let mut slots = slots();
        slots[0].item = Some(ItemInstance::new("Longsword"));

        let result = coordinator.evaluate_operation(&OperationRequest::unequip(0), &slots);
        assert!(result.all_passed);
        let loadout = result.results.last().unwrap();
        assert_eq!(loadout.rule_type, RuleType::Loadout);
        assert!(!loadout.passed);

        let result = coordinator.evaluate_operation(&OperationRequest::move_item(1, 0), &slots);
        assert!(!result.all_passed);
    }

    #[test]
    fn test_excluded_slots_are_ignored() {
        let coordinator = coordinator();
        let mut slots = slots();
        slots[2].item = Some(ItemInstance::new("Anvil").with_weight(500.0));
        let request = OperationRequest::equip(ItemInstance::new("Longsword"), 0);
        let result = coordinator.evaluate_operation(&request, &slots);
        assert!(result.all_passed);

        let direct = coordinator.evaluate_with_slots(&RuleContext::equip(ItemInstance::new("Longsword"), 0), &slots);
        assert!(!direct.all_passed);
    }

    #[test]
    fn test_loadout_compliance() {
        let coordinator = coordinator();
        let mut slots = slots();
        let missing = coordinator.check_loadout_compliance(&slots);
        assert!(!missing.passed);
        assert!(missing.overridable);
        slots[0].item = Some(ItemInstance::new("Longsword"));
        assert!(coordinator.check_loadout_compliance(&slots).passed);
    }
}
