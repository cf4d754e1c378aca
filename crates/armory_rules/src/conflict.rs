//! # Conflict Rules Engine
//!
//! **Which equipped items cannot coexist, and what to do about it.**
//!
//! ## Design
//!
//! ```text
//!   evaluate_with_slots(ctx, slots)
//!        │
//!        ├── 1. item conflicts   mutual exclusion ─> conflict type     (first hard hit stops)
//!        │                       ─> missing companions ─> set interference  (warnings)
//!        ├── 2. slot conflicts   primary weapon on primary, both-hands vs occupied hand slot
//!        └── 3. score            synergy average, < threshold ──> Warning
//! ```
//!
//! The rule registry is an immutable [`ConflictRules`] value behind an
//! `RwLock<Arc<_>>`. Writers clone, modify and swap; readers take the `Arc`
//! and drop the lock before evaluating anything.
//!
//! ## Conflict Classification
//!
//! | Pair                                   | Type                  | Strategy |
//! |----------------------------------------|-----------------------|----------|
//! | both-hands weapon vs shield            | `TypeIncompatibility` | Reject   |
//! | registered mutual exclusion            | `MutualExclusion`     | Replace  |
//! | same equipment slot, either unique     | `SlotConflict`        | Replace  |
//! | same equipment slot, breaks active set | `SetInterference`     | Prompt   |

use crate::context::RuleContext;
use crate::error::{RulesError, RulesResult};
use crate::result::{AggregatedRuleResult, RuleCheckResult, RuleSeverity, RuleType};
use armory_core::{names, ItemDataProvider, ItemDefinition, ItemId, ItemInstance, SlotSnapshot, Tag, TagSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

const RULE_MUTUAL_EXCLUSION: &str = "Rule.Conflict.MutualExclusion";
const RULE_CONFLICT_TYPE: &str = "Rule.Conflict.Type";
const RULE_COMPANIONS: &str = "Rule.Conflict.Companions";
const RULE_SET_INTERFERENCE: &str = "Rule.Conflict.SetInterference";
const RULE_SLOT: &str = "Rule.Conflict.Slot";
const RULE_SCORE: &str = "Rule.Conflict.Score";

/// Score reported when the incoming item has no catalog entry.
const UNKNOWN_COMPATIBILITY: f32 = 0.5;

/// Knight set used by [`ConflictRulesEngine::load_default_rules`].
pub const KNIGHT_SET: &str = "Set.Knight";

/// Classification of a conflict between two items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// No conflict.
    #[default]
    None,
    /// Registered mutual exclusion between item tags.
    MutualExclusion,
    /// Both claim the same equipment slot and one is unique.
    SlotConflict,
    /// Item types that cannot be used together.
    TypeIncompatibility,
    /// Equipping would break an active set bonus.
    SetInterference,
}

impl ConflictType {
    /// Strategy suggested for this kind of conflict.
    #[must_use]
    pub const fn suggested_strategy(self) -> ResolutionStrategy {
        match self {
            Self::None => ResolutionStrategy::Auto,
            Self::MutualExclusion | Self::SlotConflict => ResolutionStrategy::Replace,
            Self::TypeIncompatibility => ResolutionStrategy::Reject,
            Self::SetInterference => ResolutionStrategy::Prompt,
        }
    }

    /// Whether the conflict can be resolved without asking the player.
    #[must_use]
    pub const fn is_auto_resolvable(self) -> bool {
        matches!(self, Self::MutualExclusion | Self::SlotConflict)
    }

    /// Short name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::MutualExclusion => "MutualExclusion",
            Self::SlotConflict => "SlotConflict",
            Self::TypeIncompatibility => "TypeIncompatibility",
            Self::SetInterference => "SetInterference",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a set of conflicts should be resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// Pick the best strategy for the conflicts at hand.
    #[default]
    Auto,
    /// Unequip the conflicting items.
    Replace,
    /// Refuse the new item.
    Reject,
    /// Ask the player.
    Prompt,
    /// Stack with the existing item.
    Stack,
}

/// One detected conflict.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictInfo {
    /// Kind of conflict.
    pub conflict_type: ConflictType,
    /// The incoming (or first planned) item.
    pub item_a: ItemInstance,
    /// The item it conflicts with.
    pub item_b: ItemInstance,
    /// Human readable description.
    pub description: String,
    /// Strategy suggested for this conflict alone.
    pub suggested_strategy: ResolutionStrategy,
    /// Whether the conflict can be resolved automatically.
    pub auto_resolvable: bool,
}

impl ConflictInfo {
    fn new(conflict_type: ConflictType, item_a: &ItemInstance, item_b: &ItemInstance) -> Self {
        Self {
            conflict_type,
            description: conflict_description(conflict_type, item_a, item_b),
            item_a: item_a.clone(),
            item_b: item_b.clone(),
            suggested_strategy: conflict_type.suggested_strategy(),
            auto_resolvable: conflict_type.is_auto_resolvable(),
        }
    }
}

/// A step of a proposed resolution.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolutionAction {
    /// Unequip this item.
    Unequip(ItemInstance),
    /// Stack onto this item.
    Stack(ItemInstance),
    /// The operation must not proceed.
    Block(String),
}

/// Proposed resolution for a group of conflicts.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictResolution {
    /// Strategy actually applied.
    pub strategy: ResolutionStrategy,
    /// Ordered actions.
    pub actions: Vec<ResolutionAction>,
    /// False when the caller must block or ask.
    pub resolvable: bool,
    /// Human readable description.
    pub description: String,
}

/// Set bonus status for one registered set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetBonusInfo {
    /// Set tag.
    pub set_tag: Tag,
    /// Distinct set members present.
    pub equipped_count: usize,
    /// Members needed for the bonus.
    pub required_count: usize,
    /// Members in the set.
    pub total_pieces: usize,
    /// `equipped_count >= required_count`.
    pub bonus_active: bool,
    /// Human readable status.
    pub description: String,
}

/// Members of an item set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemSet {
    /// Member item ids.
    pub items: Vec<ItemId>,
    /// Members needed for the bonus.
    pub required_count: usize,
}

impl ItemSet {
    fn contains(&self, item_id: &ItemId) -> bool {
        self.items.contains(item_id)
    }

    fn count_in<'a>(&self, items: impl IntoIterator<Item = &'a ItemInstance>) -> usize {
        items
            .into_iter()
            .map(|i| &i.item_id)
            .filter(|id| self.contains(id))
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Immutable conflict rule registry.
#[derive(Clone, Debug, Default)]
pub struct ConflictRules {
    mutual_exclusions: HashMap<Tag, TagSet>,
    required_companions: HashMap<Tag, TagSet>,
    item_sets: BTreeMap<Tag, ItemSet>,
}

impl ConflictRules {
    fn excludes(&self, a: &ItemDefinition, b: &ItemDefinition) -> bool {
        self.mutual_exclusions
            .iter()
            .any(|(key, excluded)| a.has_tag(key) && excluded.iter().any(|t| b.has_tag(t)))
    }

    fn missing_companions(&self, definition: &ItemDefinition, present: &[ItemDefinition]) -> Vec<Tag> {
        self.required_companions
            .iter()
            .filter(|(key, _)| definition.has_tag(key))
            .flat_map(|(_, companions)| companions.iter())
            .filter(|companion| !present.iter().any(|d| d.has_tag(companion)))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn classify(&self, a: &ItemDefinition, b: &ItemDefinition) -> ConflictType {
        if (requires_both_hands(a) && is_shield(b)) || (requires_both_hands(b) && is_shield(a)) {
            ConflictType::TypeIncompatibility
        } else if self.excludes(a, b) {
            ConflictType::MutualExclusion
        } else if !a.equipment_slot.is_empty()
            && a.equipment_slot == b.equipment_slot
            && (a.has_tag_named(names::ITEM_UNIQUE) || b.has_tag_named(names::ITEM_UNIQUE))
        {
            ConflictType::SlotConflict
        } else {
            ConflictType::None
        }
    }

    fn sets_containing<'a>(&'a self, item_id: &'a ItemId) -> impl Iterator<Item = (&'a Tag, &'a ItemSet)> {
        self.item_sets.iter().filter(move |(_, set)| set.contains(item_id))
    }

    fn same_set(&self, a: &ItemId, b: &ItemId) -> bool {
        self.item_sets
            .values()
            .any(|set| set.contains(a) && set.contains(b))
    }

    fn breaks_set(&self, item: &ItemInstance, items: &[ItemInstance]) -> bool {
        let removed = items
            .iter()
            .position(|i| i.instance_id == item.instance_id)
            .or_else(|| items.iter().position(|i| i.item_id == item.item_id));
        let remaining: Vec<&ItemInstance> = items
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != removed)
            .map(|(_, i)| i)
            .collect();

        self.sets_containing(&item.item_id).any(|(_, set)| {
            set.count_in(items) >= set.required_count
                && set.count_in(remaining.iter().copied()) < set.required_count
        })
    }
}

/// Item set section of [`ConflictConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSetConfig {
    /// Set tag.
    pub set_tag: Tag,
    /// Member item ids.
    pub items: Vec<ItemId>,
    /// Members needed for the bonus. Defaults to `min(2, members)`.
    #[serde(default)]
    pub required_count: Option<usize>,
}

/// Required companion section of [`ConflictConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionConfig {
    /// Items carrying this tag need the companions.
    pub tag: Tag,
    /// Tags that must be present among equipped items.
    pub companions: Vec<Tag>,
}

/// Conflict engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Register the built-in exclusions and the Knight set.
    pub load_defaults: bool,
    /// Compatibility scores below this produce a warning.
    pub low_compatibility_threshold: f32,
    /// Extra mutual exclusion pairs.
    pub mutual_exclusions: Vec<(Tag, Tag)>,
    /// Extra item sets.
    pub item_sets: Vec<ItemSetConfig>,
    /// Extra companion requirements.
    pub required_companions: Vec<CompanionConfig>,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            load_defaults: true,
            low_compatibility_threshold: 0.3,
            mutual_exclusions: Vec::new(),
            item_sets: Vec::new(),
            required_companions: Vec::new(),
        }
    }
}

/// Mutual exclusion, slot semantic and set bonus rules.
pub struct ConflictRulesEngine {
    catalog: Arc<dyn ItemDataProvider>,
    rules: RwLock<Arc<ConflictRules>>,
    low_compatibility_threshold: f32,
}

impl ConflictRulesEngine {
    /// Creates an engine with an empty registry.
    #[must_use]
    pub fn new(catalog: Arc<dyn ItemDataProvider>) -> Self {
        Self {
            catalog,
            rules: RwLock::new(Arc::new(ConflictRules::default())),
            low_compatibility_threshold: ConflictConfig::default().low_compatibility_threshold,
        }
    }

    /// Creates an engine and registers everything in `config`.
    ///
    /// # Errors
    ///
    /// Returns the first registration error.
    pub fn from_config(config: &ConflictConfig, catalog: Arc<dyn ItemDataProvider>) -> RulesResult<Self> {
        let mut engine = Self::new(catalog);
        engine.low_compatibility_threshold = config.low_compatibility_threshold.clamp(0.0, 1.0);
        if config.load_defaults {
            engine.load_default_rules();
        }
        for (a, b) in &config.mutual_exclusions {
            engine.register_mutual_exclusion(a.clone(), b.clone())?;
        }
        for set in &config.item_sets {
            engine.register_item_set(set.set_tag.clone(), set.items.clone(), set.required_count)?;
        }
        for companion in &config.required_companions {
            engine.register_required_companions(companion.tag.clone(), companion.companions.iter().cloned())?;
        }
        Ok(engine)
    }

    /// Current registry snapshot.
    #[must_use]
    pub fn rules(&self) -> Arc<ConflictRules> {
        Arc::clone(&self.rules.read())
    }

    fn update(&self, f: impl FnOnce(&mut ConflictRules)) {
        let mut guard = self.rules.write();
        let mut next = ConflictRules::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers `a` and `b` as mutually exclusive, in both directions.
    ///
    /// # Errors
    ///
    /// Rejects empty tags and self exclusion.
    pub fn register_mutual_exclusion(&self, a: impl Into<Tag>, b: impl Into<Tag>) -> RulesResult<()> {
        let (a, b) = (a.into(), b.into());
        if a.is_empty() || b.is_empty() {
            return Err(RulesError::EmptyTag);
        }
        if a == b {
            return Err(RulesError::SelfExclusion(a));
        }
        tracing::debug!(%a, %b, "mutual exclusion registered");
        self.update(|rules| {
            rules.mutual_exclusions.entry(a.clone()).or_default().insert(b.clone());
            rules.mutual_exclusions.entry(b).or_default().insert(a);
        });
        Ok(())
    }

    /// Registers an item set. `required_count` defaults to `min(2, members)`.
    ///
    /// # Errors
    ///
    /// Rejects empty tags, empty sets and out-of-range counts.
    pub fn register_item_set(
        &self,
        set_tag: impl Into<Tag>,
        items: impl IntoIterator<Item = ItemId>,
        required_count: Option<usize>,
    ) -> RulesResult<()> {
        let set_tag = set_tag.into();
        if set_tag.is_empty() {
            return Err(RulesError::EmptyTag);
        }
        let mut members: Vec<ItemId> = Vec::new();
        for item in items {
            if !members.contains(&item) {
                members.push(item);
            }
        }
        if members.is_empty() {
            return Err(RulesError::EmptyItemSet(set_tag));
        }
        let required = required_count.unwrap_or_else(|| members.len().min(2));
        if required == 0 || required > members.len() {
            return Err(RulesError::InvalidRequiredCount {
                set: set_tag,
                required,
                members: members.len(),
            });
        }
        tracing::debug!(set = %set_tag, pieces = members.len(), required, "item set registered");
        self.update(|rules| {
            rules.item_sets.insert(
                set_tag,
                ItemSet {
                    items: members,
                    required_count: required,
                },
            );
        });
        Ok(())
    }

    /// Items carrying `tag` need an equipped item for each companion tag.
    ///
    /// # Errors
    ///
    /// Rejects empty tags.
    pub fn register_required_companions(
        &self,
        tag: impl Into<Tag>,
        companions: impl IntoIterator<Item = Tag>,
    ) -> RulesResult<()> {
        let tag = tag.into();
        let companions: TagSet = companions.into_iter().collect();
        if tag.is_empty() || companions.iter().any(Tag::is_empty) {
            return Err(RulesError::EmptyTag);
        }
        self.update(|rules| {
            let entry = rules.required_companions.entry(tag).or_default();
            for companion in companions.iter() {
                entry.insert(companion.clone());
            }
        });
        Ok(())
    }

    /// Empties the registry.
    pub fn clear_all_rules(&self) {
        *self.rules.write() = Arc::new(ConflictRules::default());
        tracing::info!("conflict rules cleared");
    }

    /// Registers the built-in exclusions and the Knight set.
    pub fn load_default_rules(&self) {
        let pairs = [
            (names::ARMOR_HEAVY, names::ARMOR_LIGHT),
            (names::WEAPON_TWO_HANDED, names::SHIELD),
        ];
        for (a, b) in pairs {
            if let Err(err) = self.register_mutual_exclusion(a, b) {
                tracing::warn!(%err, "default exclusion rejected");
            }
        }
        let knight = ["Knight_Helmet", "Knight_Chestplate", "Knight_Gauntlets", "Knight_Boots"]
            .into_iter()
            .map(ItemId::new);
        if let Err(err) = self.register_item_set(KNIGHT_SET, knight, Some(4)) {
            tracing::warn!(%err, "default item set rejected");
        }
    }

    /// Tags excluded by `tag`.
    #[must_use]
    pub fn mutual_exclusions_for(&self, tag: &Tag) -> Vec<Tag> {
        self.rules()
            .mutual_exclusions
            .get(tag)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    fn definition(&self, item: &ItemInstance) -> Option<ItemDefinition> {
        self.catalog.item_definition(&item.item_id)
    }

    /// Conflict between two items. Type incompatibility wins over every
    /// other classification.
    #[must_use]
    pub fn get_conflict_type(&self, a: &ItemInstance, b: &ItemInstance) -> ConflictType {
        match (self.definition(a), self.definition(b)) {
            (Some(da), Some(db)) => self.rules().classify(&da, &db),
            _ => ConflictType::None,
        }
    }

    /// Checks `new_item` against every equipped item. Stops at the first
    /// hard conflict.
    #[must_use]
    pub fn check_item_conflicts(&self, new_item: &ItemInstance, existing: &[ItemInstance]) -> RuleCheckResult {
        let Some(new_def) = self.definition(new_item) else {
            return RuleCheckResult::pass(RuleType::Conflict, "No item data; conflicts not evaluated")
                .with_confidence(0.8)
                .with_tag(RULE_CONFLICT_TYPE);
        };
        let rules = self.rules();
        let others: Vec<(&ItemInstance, ItemDefinition)> = existing
            .iter()
            .filter(|e| e.instance_id != new_item.instance_id)
            .filter_map(|e| self.definition(e).map(|d| (e, d)))
            .collect();

        if let Some((other, _)) = others.iter().find(|(_, d)| rules.excludes(&new_def, d)) {
            return RuleCheckResult::fail(
                RuleType::Conflict,
                RuleSeverity::Error,
                conflict_description(ConflictType::MutualExclusion, new_item, other),
            )
            .with_tag(RULE_MUTUAL_EXCLUSION)
            .with_context("ConflictType", ConflictType::MutualExclusion)
            .with_context("ConflictingItem", &other.item_id);
        }

        for (other, other_def) in &others {
            let conflict = rules.classify(&new_def, other_def);
            if conflict != ConflictType::None {
                return RuleCheckResult::fail(
                    RuleType::Conflict,
                    RuleSeverity::Error,
                    conflict_description(conflict, new_item, other),
                )
                .with_tag(RULE_CONFLICT_TYPE)
                .with_context("ConflictType", conflict)
                .with_context("ConflictingItem", &other.item_id);
            }
        }

        let present: Vec<ItemDefinition> = others.iter().map(|(_, d)| d.clone()).collect();
        let missing = rules.missing_companions(&new_def, &present);
        if !missing.is_empty() {
            let list = missing.iter().map(Tag::as_str).collect::<Vec<_>>().join(", ");
            return RuleCheckResult::fail(
                RuleType::Conflict,
                RuleSeverity::Warning,
                format!("{} works best with: {list}", new_item.item_id),
            )
            .with_confidence(0.5)
            .with_tag(RULE_COMPANIONS)
            .with_context("MissingCompanions", list);
        }

        let carried: Vec<ItemInstance> = others.iter().map(|(i, _)| (*i).clone()).collect();
        if let Some((other, _)) = others
            .iter()
            .find(|(other, other_def)| self.interferes(&rules, new_item, &new_def, other, other_def, &carried))
        {
            return RuleCheckResult::fail(
                RuleType::Conflict,
                RuleSeverity::Warning,
                conflict_description(ConflictType::SetInterference, new_item, other),
            )
            .with_confidence(0.7)
            .with_tag(RULE_SET_INTERFERENCE)
            .with_context("ConflictType", ConflictType::SetInterference)
            .with_context("ConflictingItem", &other.item_id);
        }

        RuleCheckResult::pass(RuleType::Conflict, "No conflicts detected").with_tag(RULE_CONFLICT_TYPE)
    }

    fn interferes(
        &self,
        rules: &ConflictRules,
        new_item: &ItemInstance,
        new_def: &ItemDefinition,
        other: &ItemInstance,
        other_def: &ItemDefinition,
        carried: &[ItemInstance],
    ) -> bool {
        !new_def.equipment_slot.is_empty()
            && new_def.equipment_slot == other_def.equipment_slot
            && rules
                .sets_containing(&other.item_id)
                .any(|(_, set)| !set.contains(&new_item.item_id))
            && rules.breaks_set(other, carried)
    }

    /// Slot semantic checks against the real slot layout.
    #[must_use]
    pub fn check_slot_conflicts(
        &self,
        new_item: &ItemInstance,
        target_slot: usize,
        slots: &[SlotSnapshot],
    ) -> RuleCheckResult {
        let Some(new_def) = self.definition(new_item) else {
            return RuleCheckResult::pass(RuleType::Conflict, "No item data; slot conflicts not evaluated")
                .with_confidence(0.8)
                .with_tag(RULE_SLOT);
        };

        let occupant = slots
            .iter()
            .find(|s| s.index == target_slot)
            .and_then(|s| s.item.as_ref())
            .filter(|item| item.instance_id != new_item.instance_id);
        if let Some(existing) = occupant {
            let both_primary = new_def.has_tag_named(names::WEAPON_PRIMARY)
                && self
                    .definition(existing)
                    .is_some_and(|d| d.has_tag_named(names::WEAPON_PRIMARY));
            if both_primary {
                return RuleCheckResult::fail(
                    RuleType::Conflict,
                    RuleSeverity::Error,
                    "Cannot equip multiple primary weapons in the same slot",
                )
                .with_tag(RULE_SLOT)
                .with_context("SlotIndex", target_slot)
                .with_context("ConflictingItem", &existing.item_id);
            }
        }

        if requires_both_hands(&new_def) {
            let blocking = slots.iter().find(|s| {
                s.index != target_slot
                    && is_hand_slot(&s.config.slot_tag)
                    && s.item
                        .as_ref()
                        .is_some_and(|item| item.instance_id != new_item.instance_id)
            });
            if let Some(slot) = blocking {
                return RuleCheckResult::fail(
                    RuleType::Conflict,
                    RuleSeverity::Error,
                    format!(
                        "RequiresBothHands: {} needs both hands but {} is occupied",
                        new_item.item_id, slot.config.slot_tag
                    ),
                )
                .with_tag(names::REQUIRES_BOTH_HANDS)
                .with_context("RequiredSlots", "BothHands")
                .with_context("BlockingSlot", slot.index);
            }
        }

        RuleCheckResult::pass(RuleType::Conflict, "Item is compatible with target slot").with_tag(RULE_SLOT)
    }

    /// Average pairwise synergy in `[0, 1]`. 1.0 with nothing equipped,
    /// 0.5 when the new item is not in the catalog. Equipped items missing
    /// from the catalog are left out of the average.
    #[must_use]
    pub fn calculate_compatibility_score(&self, new_item: &ItemInstance, existing: &[ItemInstance]) -> f32 {
        let others: Vec<&ItemInstance> = existing
            .iter()
            .filter(|e| e.instance_id != new_item.instance_id)
            .collect();
        if others.is_empty() {
            return 1.0;
        }
        let Some(new_def) = self.definition(new_item) else {
            return UNKNOWN_COMPATIBILITY;
        };
        let rules = self.rules();
        let factors: Vec<f32> = others
            .into_iter()
            .filter_map(|other| {
                let other_def = self.definition(other)?;
                Some(pair_factor(&rules, new_item, &new_def, other, &other_def))
            })
            .collect();
        if factors.is_empty() {
            return 1.0;
        }
        (factors.iter().sum::<f32>() / factors.len() as f32).clamp(0.0, 1.0)
    }

    /// Every conflict between `new_item` and `existing`, without early exit.
    #[must_use]
    pub fn find_all_conflicts(&self, new_item: &ItemInstance, existing: &[ItemInstance]) -> Vec<ConflictInfo> {
        let Some(new_def) = self.definition(new_item) else {
            return Vec::new();
        };
        let rules = self.rules();
        let carried: Vec<ItemInstance> = existing
            .iter()
            .filter(|e| e.instance_id != new_item.instance_id)
            .cloned()
            .collect();

        carried
            .iter()
            .filter_map(|other| {
                let other_def = self.definition(other)?;
                let conflict = match rules.classify(&new_def, &other_def) {
                    ConflictType::None
                        if self.interferes(&rules, new_item, &new_def, other, &other_def, &carried) =>
                    {
                        ConflictType::SetInterference
                    }
                    conflict => conflict,
                };
                (conflict != ConflictType::None).then(|| ConflictInfo::new(conflict, new_item, other))
            })
            .collect()
    }

    /// All-pairs conflict scan over a planned loadout.
    #[must_use]
    pub fn predict_conflicts(&self, planned: &[ItemInstance]) -> Vec<ConflictInfo> {
        let rules = self.rules();
        let defs: Vec<Option<ItemDefinition>> = planned.iter().map(|i| self.definition(i)).collect();
        let mut conflicts = Vec::new();

        for (i, a) in planned.iter().enumerate() {
            for (j, b) in planned.iter().enumerate().skip(i + 1) {
                let (Some(da), Some(db)) = (&defs[i], &defs[j]) else {
                    continue;
                };
                let conflict = match rules.classify(da, db) {
                    ConflictType::None if competing_sets(&rules, a, da, b, db) => ConflictType::SetInterference,
                    conflict => conflict,
                };
                if conflict != ConflictType::None {
                    conflicts.push(ConflictInfo::new(conflict, a, b));
                }
            }
        }
        tracing::debug!(items = planned.len(), conflicts = conflicts.len(), "conflicts predicted");
        conflicts
    }

    /// Status of every registered set with at least one member present.
    #[must_use]
    pub fn detect_set_bonuses(&self, items: &[ItemInstance]) -> Vec<SetBonusInfo> {
        self.rules()
            .item_sets
            .iter()
            .filter_map(|(tag, set)| {
                let count = set.count_in(items);
                (count > 0).then(|| set_bonus_info(tag, set, count))
            })
            .collect()
    }

    /// True iff removing `item` drops an active set below its requirement.
    #[must_use]
    pub fn would_break_set_bonus(&self, item: &ItemInstance, items: &[ItemInstance]) -> bool {
        self.rules().breaks_set(item, items)
    }

    /// Members of `set_tag` not present in `items`.
    #[must_use]
    pub fn get_missing_set_items(&self, set_tag: &Tag, items: &[ItemInstance]) -> Vec<ItemId> {
        let rules = self.rules();
        let Some(set) = rules.item_sets.get(set_tag) else {
            return Vec::new();
        };
        set.items
            .iter()
            .filter(|id| !items.iter().any(|i| &i.item_id == *id))
            .cloned()
            .collect()
    }

    /// Strategy for a group of conflicts.
    #[must_use]
    pub fn suggest_resolution_strategy(&self, conflicts: &[ConflictInfo]) -> ResolutionStrategy {
        if conflicts.is_empty() {
            return ResolutionStrategy::Auto;
        }
        let replaceable = conflicts.iter().all(|c| {
            c.auto_resolvable
                && matches!(c.conflict_type, ConflictType::MutualExclusion | ConflictType::SlotConflict)
        });
        if replaceable {
            ResolutionStrategy::Replace
        } else {
            ResolutionStrategy::Prompt
        }
    }

    /// Concrete actions for `conflicts` under `strategy`.
    #[must_use]
    pub fn suggest_resolutions(&self, conflicts: &[ConflictInfo], strategy: ResolutionStrategy) -> ConflictResolution {
        let strategy = match strategy {
            ResolutionStrategy::Auto => match self.suggest_resolution_strategy(conflicts) {
                ResolutionStrategy::Auto => ResolutionStrategy::Prompt,
                chosen => chosen,
            },
            explicit => explicit,
        };
        if conflicts.is_empty() {
            return ConflictResolution {
                strategy,
                actions: Vec::new(),
                resolvable: true,
                description: "No conflicts to resolve".to_string(),
            };
        }

        match strategy {
            ResolutionStrategy::Replace => {
                let mut seen = BTreeSet::new();
                let actions: Vec<_> = conflicts
                    .iter()
                    .filter(|c| seen.insert(c.item_b.instance_id))
                    .map(|c| ResolutionAction::Unequip(c.item_b.clone()))
                    .collect();
                ConflictResolution {
                    strategy,
                    description: format!("Unequip {} conflicting item(s)", actions.len()),
                    actions,
                    resolvable: true,
                }
            }
            ResolutionStrategy::Stack => ConflictResolution {
                strategy,
                actions: conflicts
                    .iter()
                    .map(|c| ResolutionAction::Stack(c.item_b.clone()))
                    .collect(),
                resolvable: true,
                description: "Stack with existing items".to_string(),
            },
            ResolutionStrategy::Reject | ResolutionStrategy::Prompt | ResolutionStrategy::Auto => {
                let reason = conflicts
                    .iter()
                    .map(|c| c.description.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                ConflictResolution {
                    strategy,
                    actions: vec![ResolutionAction::Block(reason.clone())],
                    resolvable: false,
                    description: reason,
                }
            }
        }
    }

    /// Full conflict pipeline for one evaluation.
    #[must_use]
    pub fn evaluate_with_slots(&self, ctx: &RuleContext, slots: &[SlotSnapshot]) -> AggregatedRuleResult {
        let mut aggregated = AggregatedRuleResult::new();
        let Some(item) = ctx.item.as_ref() else {
            aggregated.push(RuleCheckResult::pass(RuleType::Conflict, "No item to evaluate"));
            return aggregated;
        };

        let existing: Vec<ItemInstance> = slots
            .iter()
            .filter(|s| Some(s.index) != ctx.target_slot && Some(s.index) != ctx.source_slot)
            .filter_map(|s| s.item.clone())
            .collect();

        let item_result = self.check_item_conflicts(item, &existing);
        let stop = item_result.is_hard_failure();
        aggregated.push(item_result);
        if stop {
            return aggregated;
        }

        if let Some(target) = ctx.target_slot {
            let slot_result = self.check_slot_conflicts(item, target, slots);
            let stop = slot_result.is_hard_failure();
            aggregated.push(slot_result);
            if stop {
                return aggregated;
            }
        }

        aggregated.push(self.score_result(item, &existing));
        aggregated
    }

    /// Item conflicts and score against `ctx.current_items`, without slot
    /// semantics.
    #[must_use]
    pub fn evaluate(&self, ctx: &RuleContext) -> AggregatedRuleResult {
        let mut aggregated = AggregatedRuleResult::new();
        let Some(item) = ctx.item.as_ref() else {
            return aggregated;
        };
        let item_result = self.check_item_conflicts(item, &ctx.current_items);
        let stop = item_result.is_hard_failure();
        aggregated.push(item_result);
        if !stop {
            aggregated.push(self.score_result(item, &ctx.current_items));
        }
        aggregated
    }

    fn score_result(&self, item: &ItemInstance, existing: &[ItemInstance]) -> RuleCheckResult {
        let score = self.calculate_compatibility_score(item, existing);
        let result = if score < self.low_compatibility_threshold {
            RuleCheckResult::fail(
                RuleType::Conflict,
                RuleSeverity::Warning,
                format!("Low compatibility with equipped items ({score:.2})"),
            )
        } else {
            RuleCheckResult::pass(RuleType::Conflict, format!("Compatibility score {score:.2}"))
        };
        result
            .with_confidence(score)
            .with_tag(RULE_SCORE)
            .with_context("Score", format!("{score:.2}"))
    }
}

impl fmt::Debug for ConflictRulesEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules = self.rules();
        f.debug_struct("ConflictRulesEngine")
            .field("mutual_exclusions", &rules.mutual_exclusions.len())
            .field("required_companions", &rules.required_companions.len())
            .field("item_sets", &rules.item_sets.len())
            .finish_non_exhaustive()
    }
}

/// Human readable description of a conflict between `a` and `b`.
#[must_use]
pub fn conflict_description(conflict: ConflictType, a: &ItemInstance, b: &ItemInstance) -> String {
    let (a, b) = (&a.item_id, &b.item_id);
    match conflict {
        ConflictType::None => format!("{a} and {b} do not conflict"),
        ConflictType::MutualExclusion => format!("{a} cannot be equipped together with {b}"),
        ConflictType::SlotConflict => format!("{a} and {b} both claim the same unique slot"),
        ConflictType::TypeIncompatibility => format!("{a} is incompatible with {b}"),
        ConflictType::SetInterference => format!("Equipping {a} would break the set bonus of {b}"),
    }
}

fn requires_both_hands(definition: &ItemDefinition) -> bool {
    definition.has_tag_named(names::REQUIRES_BOTH_HANDS) || definition.has_tag_named(names::WEAPON_TWO_HANDED)
}

fn is_shield(definition: &ItemDefinition) -> bool {
    definition.has_tag_named(names::SHIELD)
}

fn is_hand_slot(slot_tag: &Tag) -> bool {
    slot_tag.matches(&Tag::new(names::SLOT_HAND_MAIN)) || slot_tag.matches(&Tag::new(names::SLOT_HAND_OFF))
}

fn armor_class(definition: &ItemDefinition) -> Option<&'static str> {
    [names::ARMOR_HEAVY, names::ARMOR_MEDIUM, names::ARMOR_LIGHT]
        .into_iter()
        .find(|class| definition.has_tag_named(class))
}

fn pair_factor(
    rules: &ConflictRules,
    a: &ItemInstance,
    da: &ItemDefinition,
    b: &ItemInstance,
    db: &ItemDefinition,
) -> f32 {
    let melee_and_shield = |x: &ItemDefinition, y: &ItemDefinition| x.has_tag_named(names::WEAPON_MELEE) && is_shield(y);

    if rules.classify(da, db) != ConflictType::None {
        0.0
    } else if rules.same_set(&a.item_id, &b.item_id) {
        1.5
    } else if melee_and_shield(da, db) || melee_and_shield(db, da) {
        1.3
    } else if armor_class(da).is_some() && armor_class(da) == armor_class(db) {
        1.2
    } else {
        1.0
    }
}

fn competing_sets(
    rules: &ConflictRules,
    a: &ItemInstance,
    da: &ItemDefinition,
    b: &ItemInstance,
    db: &ItemDefinition,
) -> bool {
    if da.equipment_slot.is_empty() || da.equipment_slot != db.equipment_slot {
        return false;
    }
    let sets_a: BTreeSet<&Tag> = rules.sets_containing(&a.item_id).map(|(t, _)| t).collect();
    let sets_b: BTreeSet<&Tag> = rules.sets_containing(&b.item_id).map(|(t, _)| t).collect();
    !sets_a.is_empty() && !sets_b.is_empty() && sets_a.is_disjoint(&sets_b)
}

fn set_bonus_info(tag: &Tag, set: &ItemSet, count: usize) -> SetBonusInfo {
    let bonus_active = count >= set.required_count;
    let description = if bonus_active {
        format!("{tag} Set Bonus Active ({count}/{} pieces)", set.required_count)
    } else {
        format!("{tag} Set ({count}/{} pieces)", set.required_count)
    };
    SetBonusInfo {
        set_tag: tag.clone(),
        equipped_count: count,
        required_count: set.required_count,
        total_pieces: set.items.len(),
        bonus_active,
        description,
    }
}
