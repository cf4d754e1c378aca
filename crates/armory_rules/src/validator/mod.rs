//! # Slot Validator
//!
//! **Can item X go in slot Y?**
//!
//! ## Design
//!
//! ```text
//!   can_place_in(slot, item, ctx)
//!        │
//!        ├── cache hit (fresh TTL, same data version) ──> cached result
//!        │
//!        └── miss ──> ItemType ─> Level ─> Weight ─> Unique ─> custom rules
//!                       first failure wins, result cached
//! ```
//!
//! ## Guarantees
//!
//! - Pure: reads the catalog and the caller's context, never live storage
//! - A data version bump invalidates every cached result immediately
//! - Rule and restriction registries are immutable snapshots swapped on write

mod batch;
mod cache;
pub mod rules;

pub use batch::{find_operation_conflicts, BatchValidationResult};
pub use rules::{SlotRestriction, ValidationRule};

use crate::context::PlacementContext;
use crate::error::RulesResult;
use armory_core::{
    ItemDataProvider, ItemDefinition, ItemInstance, SlotConfig, Tag, ValidationFailure,
    PROP_REQUIRED_LEVEL, PROP_WEIGHT,
};
use cache::{CacheKey, ValidationCache};
use parking_lot::RwLock;
use rules::{RuleRegistry, RULE_ITEM_TYPE, RULE_LEVEL, RULE_UNIQUE, RULE_WEIGHT};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slot validator configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Cache entry lifetime in milliseconds. Zero disables time-based expiry.
    pub cache_ttl_ms: u64,
    /// Maximum cached results.
    pub max_cache_entries: usize,
    /// Whether results are cached at all.
    pub enable_cache: bool,
    /// Non-atomic batches larger than this are validated in parallel.
    pub parallel_batch_threshold: usize,
    /// Worker threads for parallel batches.
    pub max_parallelism: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5_000,
            max_cache_entries: 2_048,
            enable_cache: true,
            parallel_batch_threshold: 32,
            max_parallelism: 4,
        }
    }
}

impl ValidatorConfig {
    /// Server preset: larger cache, wider batches.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            cache_ttl_ms: 10_000,
            max_cache_entries: 8_192,
            enable_cache: true,
            parallel_batch_threshold: 64,
            max_parallelism: 8,
        }
    }
}

/// Outcome of a placement check.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationResult {
    /// Whether the item may be placed.
    pub valid: bool,
    /// Why not.
    pub failure: Option<ValidationFailure>,
    /// Human readable message.
    pub message: String,
    /// Rule that decided the result.
    pub rule_tag: Tag,
    /// Extra details.
    pub context: BTreeMap<String, String>,
}

impl ValidationResult {
    /// A passing result.
    #[must_use]
    pub fn success() -> Self {
        Self {
            valid: true,
            failure: None,
            message: String::new(),
            rule_tag: Tag::none(),
            context: BTreeMap::new(),
        }
    }

    /// A failing result.
    #[must_use]
    pub fn failure(failure: ValidationFailure, rule_tag: impl Into<Tag>, message: impl Into<String>) -> Self {
        let mut context = BTreeMap::new();
        context.insert("FailureCode".to_string(), failure.code().to_string());
        Self {
            valid: false,
            failure: Some(failure),
            message: message.into(),
            rule_tag: rule_tag.into(),
            context,
        }
    }

    /// Numeric failure code, 0 when valid.
    #[must_use]
    pub fn code(&self) -> u32 {
        self.failure.map_or(0, ValidationFailure::code)
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }
}

/// Snapshot of validator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidatorStatistics {
    /// Placement checks requested.
    pub calls: u64,
    /// Served from cache.
    pub cache_hits: u64,
    /// Computed.
    pub cache_misses: u64,
    /// Checks that failed.
    pub failures: u64,
    /// Batches validated.
    pub batches: u64,
    /// Entries currently cached.
    pub cache_entries: usize,
}

impl ValidatorStatistics {
    /// Fraction of cache lookups that hit.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct ValidatorCounters {
    calls: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    batches: AtomicU64,
}

/// Cache-assisted placement validator.
pub struct SlotValidator {
    config: ValidatorConfig,
    catalog: Arc<dyn ItemDataProvider>,
    restrictions: RwLock<Arc<HashMap<Tag, SlotRestriction>>>,
    registry: RwLock<Arc<RuleRegistry>>,
    cache: ValidationCache,
    data_version: AtomicU64,
    counters: ValidatorCounters,
}

impl SlotValidator {
    /// Creates a validator reading item data from `catalog`.
    #[must_use]
    pub fn new(config: ValidatorConfig, catalog: Arc<dyn ItemDataProvider>) -> Self {
        let cache = ValidationCache::new(
            Duration::from_millis(config.cache_ttl_ms),
            config.max_cache_entries,
        );
        Self {
            config,
            catalog,
            restrictions: RwLock::new(Arc::new(HashMap::new())),
            registry: RwLock::new(Arc::new(RuleRegistry::default())),
            cache,
            data_version: AtomicU64::new(0),
            counters: ValidatorCounters::default(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Item data source.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn ItemDataProvider> {
        &self.catalog
    }

    /// Checks a placement with no surrounding equipment and no level.
    #[must_use]
    pub fn can_place(&self, slot: &SlotConfig, item: &ItemInstance) -> ValidationResult {
        self.can_place_in(slot, item, &PlacementContext::empty())
    }

    /// Checks a placement against the given surroundings.
    #[must_use]
    pub fn can_place_in(
        &self,
        slot: &SlotConfig,
        item: &ItemInstance,
        ctx: &PlacementContext,
    ) -> ValidationResult {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        let result = if self.config.enable_cache {
            let key = CacheKey::new(item, slot, context_fingerprint(ctx));
            let version = self.data_version();
            if let Some(cached) = self.cache.get(&key, version) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                cached
            } else {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let computed = self.run_rules(slot, item, ctx);
                self.cache.insert(key, computed.clone(), version);
                computed
            }
        } else {
            self.run_rules(slot, item, ctx)
        };

        if !result.valid {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Checks that two slots can exchange their contents.
    #[must_use]
    pub fn can_swap(
        &self,
        slot_a: &SlotConfig,
        item_a: Option<&ItemInstance>,
        slot_b: &SlotConfig,
        item_b: Option<&ItemInstance>,
        ctx: &PlacementContext,
    ) -> ValidationResult {
        if let Some(item) = item_a {
            let result = self.can_place_in(slot_b, item, ctx);
            if !result.valid {
                return result.with_context("SwapDirection", "A->B");
            }
        }
        if let Some(item) = item_b {
            let result = self.can_place_in(slot_a, item, ctx);
            if !result.valid {
                return result.with_context("SwapDirection", "B->A");
            }
        }
        ValidationResult::success()
    }

    fn run_rules(&self, slot: &SlotConfig, item: &ItemInstance, ctx: &PlacementContext) -> ValidationResult {
        let registry = Arc::clone(&self.registry.read());
        let restriction = self.slot_restriction(&slot.slot_tag);
        let definition = self.catalog.item_definition(&item.item_id);

        let builtin: [(&str, BuiltInCheck); 3] = [
            (RULE_ITEM_TYPE, check_item_type),
            (RULE_LEVEL, check_level),
            (RULE_WEIGHT, check_weight),
        ];
        for (tag, check) in builtin {
            if !registry.is_enabled(tag) {
                continue;
            }
            if let Some(failure) = check(slot, item, definition.as_ref(), &restriction, ctx) {
                return decorate(failure, slot, item);
            }
        }
        if registry.is_enabled(RULE_UNIQUE) {
            if let Some(failure) = self.check_unique(slot, item, definition.as_ref(), &restriction, ctx) {
                return decorate(failure, slot, item);
            }
        }

        for rule in registry.enabled_custom_rules() {
            if !rule.check(item, slot, ctx) {
                let failure = ValidationResult::failure(rule.failure, rule.tag.clone(), rule.message.clone());
                return decorate(failure, slot, item);
            }
        }

        ValidationResult::success()
    }

    fn check_unique(
        &self,
        slot: &SlotConfig,
        item: &ItemInstance,
        definition: Option<&ItemDefinition>,
        restriction: &SlotRestriction,
        ctx: &PlacementContext,
    ) -> Option<ValidationResult> {
        let group = restriction.unique_group.as_ref()?;
        if !definition?.has_tag(group) {
            return None;
        }
        let clash = ctx.equipped.iter().any(|(index, other)| {
            *index != slot.index
                && other.instance_id != item.instance_id
                && self
                    .catalog
                    .item_definition(&other.item_id)
                    .is_some_and(|d| d.has_tag(group))
        });
        clash.then(|| {
            ValidationResult::failure(
                ValidationFailure::UniqueConstraint,
                RULE_UNIQUE,
                format!("An item of unique group {group} is already equipped"),
            )
        })
    }

    /// Sets restrictions for every slot with `slot_tag`.
    pub fn set_slot_restriction(&self, slot_tag: impl Into<Tag>, restriction: SlotRestriction) {
        {
            let mut guard = self.restrictions.write();
            let mut next = HashMap::clone(&guard);
            next.insert(slot_tag.into(), restriction);
            *guard = Arc::new(next);
        }
        self.cache.clear();
    }

    /// Restrictions for a slot tag, default when none are set.
    #[must_use]
    pub fn slot_restriction(&self, slot_tag: &Tag) -> SlotRestriction {
        self.restrictions
            .read()
            .get(slot_tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Registers a custom rule.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRule` if the tag is taken, `EmptyTag` if it is empty.
    pub fn register_rule(&self, rule: ValidationRule) -> RulesResult<()> {
        {
            let mut guard = self.registry.write();
            let next = guard.with_rule(rule)?;
            *guard = Arc::new(next);
        }
        self.cache.clear();
        Ok(())
    }

    /// Removes a custom rule. Returns false if it was not registered.
    pub fn unregister_rule(&self, tag: &Tag) -> bool {
        let removed = {
            let mut guard = self.registry.write();
            match guard.without_rule(tag) {
                Some(next) => {
                    *guard = Arc::new(next);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.cache.clear();
        }
        removed
    }

    /// Enables or disables a rule (built-in or custom) by tag.
    pub fn set_rule_enabled(&self, tag: &Tag, enabled: bool) {
        {
            let mut guard = self.registry.write();
            let next = guard.with_enabled(tag, enabled);
            *guard = Arc::new(next);
        }
        self.cache.clear();
    }

    /// Every rule tag in execution order.
    #[must_use]
    pub fn registered_rules(&self) -> Vec<Tag> {
        self.registry.read().tags()
    }

    /// Current authoritative data version.
    #[must_use]
    pub fn data_version(&self) -> u64 {
        self.data_version.load(Ordering::Acquire)
    }

    /// Advances the data version, invalidating every cached result.
    ///
    /// The owner of the validator calls this when data the rules read
    /// changes; `EquipmentService::notify_data_changed` is the service hook.
    pub fn bump_data_version(&self) -> u64 {
        self.data_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::debug!("slot validator cache cleared");
    }

    /// Counter snapshot.
    #[must_use]
    pub fn statistics(&self) -> ValidatorStatistics {
        ValidatorStatistics {
            calls: self.counters.calls.load(Ordering::Relaxed),
            cache_hits: self.counters.hits.load(Ordering::Relaxed),
            cache_misses: self.counters.misses.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            cache_entries: self.cache.len(),
        }
    }

    /// Zeroes every counter.
    pub fn reset_statistics(&self) {
        for counter in [
            &self.counters.calls,
            &self.counters.hits,
            &self.counters.misses,
            &self.counters.failures,
            &self.counters.batches,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for SlotValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotValidator")
            .field("config", &self.config)
            .field("data_version", &self.data_version())
            .field("cache_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Runtime weight, falling back to the catalog weight.
#[must_use]
pub fn item_unit_weight(item: &ItemInstance, definition: Option<&ItemDefinition>) -> f32 {
    item.property(PROP_WEIGHT, definition.map_or(0.0, |d| d.weight))
}

type BuiltInCheck = fn(
    &SlotConfig,
    &ItemInstance,
    Option<&ItemDefinition>,
    &SlotRestriction,
    &PlacementContext,
) -> Option<ValidationResult>;

fn check_item_type(
    slot: &SlotConfig,
    item: &ItemInstance,
    definition: Option<&ItemDefinition>,
    _restriction: &SlotRestriction,
    _ctx: &PlacementContext,
) -> Option<ValidationResult> {
    let Some(definition) = definition else {
        return Some(ValidationResult::failure(
            ValidationFailure::InvalidSlot,
            RULE_ITEM_TYPE,
            format!("No item data for {}", item.item_id),
        ));
    };
    if slot.can_equip_item_type(&definition.item_type) {
        None
    } else {
        Some(ValidationResult::failure(
            ValidationFailure::TypeIncompatible,
            RULE_ITEM_TYPE,
            format!(
                "Item type {} is not allowed in slot {}",
                definition.item_type, slot.slot_tag
            ),
        ))
    }
}

fn check_level(
    _slot: &SlotConfig,
    item: &ItemInstance,
    definition: Option<&ItemDefinition>,
    _restriction: &SlotRestriction,
    ctx: &PlacementContext,
) -> Option<ValidationResult> {
    let level = ctx.character_level?;
    let catalog_level = definition.map_or(0.0, |d| d.required_level as f32);
    let required = item.property(PROP_REQUIRED_LEVEL, 0.0).max(catalog_level);
    ((level as f32) < required).then(|| {
        ValidationResult::failure(
            ValidationFailure::LevelRequirement,
            RULE_LEVEL,
            format!("Requires level {required}, character is level {level}"),
        )
    })
}

fn check_weight(
    _slot: &SlotConfig,
    item: &ItemInstance,
    definition: Option<&ItemDefinition>,
    restriction: &SlotRestriction,
    _ctx: &PlacementContext,
) -> Option<ValidationResult> {
    let weight = item_unit_weight(item, definition);
    (restriction.max_weight > 0.0 && weight > restriction.max_weight).then(|| {
        ValidationResult::failure(
            ValidationFailure::WeightExceeded,
            RULE_WEIGHT,
            format!("Item weighs {weight}, slot allows {}", restriction.max_weight),
        )
    })
}

fn decorate(result: ValidationResult, slot: &SlotConfig, item: &ItemInstance) -> ValidationResult {
    result
        .with_context("SlotIndex", slot.index)
        .with_context("ItemId", &item.item_id)
}

fn context_fingerprint(ctx: &PlacementContext) -> u64 {
    let mut hasher = SipHasher13::new();
    ctx.character_level.hash(&mut hasher);
    for (index, item) in &ctx.equipped {
        index.hash(&mut hasher);
        item.item_id.hash(&mut hasher);
        item.instance_id.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use armory_core::{
        names, EquipmentStateSnapshot, ItemCatalog, SlotSnapshot, SlotType, TransactionOperation,
    };

    fn catalog() -> Arc<dyn ItemDataProvider> {
        Arc::new(ItemCatalog::from_definitions([
            ItemDefinition::new("Longsword", "Item.Weapon.Sword").with_weight(3.0),
            ItemDefinition::new("Warbow", "Item.Weapon.Bow").with_level(10),
            ItemDefinition::new("Ring_Fire", "Item.Accessory.Ring").with_tag("Item.Unique.Elemental"),
            ItemDefinition::new("Ring_Ice", "Item.Accessory.Ring").with_tag("Item.Unique.Elemental"),
            ItemDefinition::new("Cap", "Item.Armor.Light"),
        ]))
    }

    fn hand() -> SlotConfig {
        SlotConfig::new(0, SlotType::PrimaryWeapon, names::SLOT_HAND_MAIN)
            .allow("Item.Weapon")
            .deny("Item.Weapon.Bow")
    }

    fn state() -> EquipmentStateSnapshot {
        EquipmentStateSnapshot::new(vec![
            SlotSnapshot::empty(SlotConfig::new(0, SlotType::PrimaryWeapon, names::SLOT_HAND_MAIN).allow("Item.Weapon")),
            SlotSnapshot::empty(SlotConfig::new(1, SlotType::SecondaryWeapon, "Equipment.Slot.Back").allow("Item.Weapon")),
            SlotSnapshot::empty(SlotConfig::new(2, SlotType::Headwear, "Equipment.Slot.Head").allow("Item.Armor")),
        ])
    }

    #[test]
    fn test_item_type_rule() {
        let validator = SlotValidator::new(ValidatorConfig::default(), catalog());
        assert!(validator.can_place(&hand(), &ItemInstance::new("Longsword")).valid);

        let bow = validator.can_place(&hand(), &ItemInstance::new("Warbow"));
        assert_eq!(bow.failure, Some(ValidationFailure::TypeIncompatible));
        assert_eq!(bow.code(), 2001);

        let unknown = validator.can_place(&hand(), &ItemInstance::new("Mystery"));
        assert_eq!(unknown.failure, Some(ValidationFailure::InvalidSlot));
        assert_eq!(unknown.context.get("FailureCode").map(String::as_str), Some("1001"));
    }

    #[test]
    fn test_level_rule_uses_context() {
        let validator = SlotValidator::new(ValidatorConfig::default(), catalog());
        let open = SlotConfig::new(3, SlotType::SecondaryWeapon, "Equipment.Slot.Back");
        let bow = ItemInstance::new("Warbow");

        assert!(validator.can_place(&open, &bow).valid);
        let low = validator.can_place_in(&open, &bow, &PlacementContext::empty().with_level(5));
        assert_eq!(low.failure, Some(ValidationFailure::LevelRequirement));
        assert!(validator.can_place_in(&open, &bow, &PlacementContext::empty().with_level(10)).valid);
    }

    #[test]
    fn test_weight_restriction() {
        let validator = SlotValidator::new(ValidatorConfig::default(), catalog());
        validator.set_slot_restriction(
            names::SLOT_HAND_MAIN,
            SlotRestriction {
                max_weight: 2.5,
                unique_group: None,
            },
        );
        let result = validator.can_place(&hand(), &ItemInstance::new("Longsword"));
        assert_eq!(result.failure, Some(ValidationFailure::WeightExceeded));

        let light = ItemInstance::new("Longsword").with_weight(2.0);
        assert!(validator.can_place(&hand(), &light).valid);
    }

    #[test]
    fn test_unique_group() {
        let validator = SlotValidator::new(ValidatorConfig::default(), catalog());
        let ring_slot = SlotConfig::new(7, SlotType::Accessory, "Equipment.Slot.Ring");
        validator.set_slot_restriction(
            "Equipment.Slot.Ring",
            SlotRestriction {
                max_weight: 0.0,
                unique_group: Some(Tag::new("Item.Unique.Elemental")),
            },
        );
        let fire = ItemInstance::new("Ring_Fire");
        let ice = ItemInstance::new("Ring_Ice");

        let ctx = PlacementContext::empty().with_equipped(8, fire.clone());
        let result = validator.can_place_in(&ring_slot, &ice, &ctx);
        assert_eq!(result.failure, Some(ValidationFailure::UniqueConstraint));
        assert_eq!(result.code(), 7100);

        // Re-placing the same instance is not a clash.
        assert!(validator.can_place_in(&ring_slot, &fire, &ctx).valid);
        // Replacing the item already in the target slot is not a clash either.
        let same_slot = PlacementContext::empty().with_equipped(7, fire);
        assert!(validator.can_place_in(&ring_slot, &ice, &same_slot).valid);
    }

    #[test]
    fn test_cache_goes_stale_on_version_bump() {
        let validator = SlotValidator::new(ValidatorConfig::default(), catalog());
        let sword = ItemInstance::new("Longsword");

        let _ = validator.can_place(&hand(), &sword);
        let _ = validator.can_place(&hand(), &sword);
        let stats = validator.statistics();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);

        validator.bump_data_version();
        let _ = validator.can_place(&hand(), &sword);
        let stats = validator.statistics();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.calls, 3);
    }

    #[test]
    fn test_custom_rule_and_disable() {
        let validator = SlotValidator::new(ValidatorConfig::default(), catalog());
        validator
            .register_rule(ValidationRule::new(
                "Validation.Rule.NoBroken",
                10,
                ValidationFailure::RequirementsNotMet,
                "Broken items cannot be equipped",
                |item, _, _| !item.is_broken(),
            ))
            .unwrap();
        let broken = ItemInstance::new("Longsword").with_durability(0.0);
        let result = validator.can_place(&hand(), &broken);
        assert_eq!(result.failure, Some(ValidationFailure::RequirementsNotMet));
        assert_eq!(result.rule_tag.as_str(), "Validation.Rule.NoBroken");

        validator.set_rule_enabled(&Tag::new("Validation.Rule.NoBroken"), false);
        assert!(validator.can_place(&hand(), &broken).valid);

        validator.set_rule_enabled(&Tag::new(RULE_ITEM_TYPE), false);
        assert!(validator.can_place(&hand(), &ItemInstance::new("Warbow")).valid);
        assert_eq!(validator.registered_rules().len(), 5);
    }

    #[test]
    fn test_sequential_batch_sees_prior_effects() {
        let validator = SlotValidator::new(ValidatorConfig::default(), catalog());
        let state = state();
        let ops = vec![
            TransactionOperation::equip(0, ItemInstance::new("Longsword")),
            TransactionOperation::move_item(0, 1),
        ];
        let result = validator.validate_batch(&ops, &state, true);
        assert!(result.all_valid, "{}", result.summary);
        assert!(!result.parallel);
        // The caller's snapshot is untouched.
        assert!(state.equipped_items().is_empty());
    }

    #[test]
    fn test_atomic_batch_halts_at_first_failure() {
        let validator = SlotValidator::new(ValidatorConfig::default(), catalog());
        let ops = vec![
            TransactionOperation::move_item(0, 1),
            TransactionOperation::equip(2, ItemInstance::new("Cap")),
        ];
        let atomic = validator.validate_batch(&ops, &state(), true);
        assert!(!atomic.all_valid);
        assert_eq!(atomic.failed_count(), 2);

        let independent = validator.validate_batch(&ops, &state(), false);
        assert_eq!(independent.failed_count(), 1);
        assert!(independent.results[1].valid);
    }

    #[test]
    fn test_parallel_batch_flags_conflicts() {
        let config = ValidatorConfig {
            parallel_batch_threshold: 2,
            max_parallelism: 2,
            ..ValidatorConfig::default()
        };
        let validator = SlotValidator::new(config, catalog());
        let ops = vec![
            TransactionOperation::equip(0, ItemInstance::new("Longsword")),
            TransactionOperation::equip(0, ItemInstance::new("Longsword")),
            TransactionOperation::equip(2, ItemInstance::new("Cap")),
            TransactionOperation::unequip(1),
        ];
        let result = validator.validate_batch(&ops, &state(), false);
        assert!(result.parallel);
        assert_eq!(result.conflicting, vec![0, 1]);
        assert_eq!(result.results[0].code(), 7001);
        assert!(result.results[2].valid);
        assert!(result.results[3].valid);
        assert_eq!(result.results[3].context.get("OperationIndex").map(String::as_str), Some("3"));
        assert_eq!(validator.statistics().batches, 1);
    }
}
