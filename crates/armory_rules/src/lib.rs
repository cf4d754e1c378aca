//! # ARMORY Rules
//!
//! Business rules that gate every equipment mutation.
//!
//! ## Engines
//!
//! | Engine | Question |
//! |--------|----------|
//! | [`SlotValidator`] | Can item X go in slot Y? |
//! | [`ConflictRulesEngine`] | Can item X coexist with what is equipped? |
//! | [`CompatibilityRulesEngine`] | Is item X in a usable condition? |
//! | [`WeightRulesEngine`] | Can the character carry it? |
//! | [`RulesCoordinator`] | All of the above, in order |
//!
//! ## Design Principles
//!
//! 1. **Results are data** - engines never return errors for rule outcomes
//! 2. **Snapshots in, verdicts out** - no engine touches live storage
//! 3. **Immutable registries** - writers swap an `Arc`, readers never block on evaluation
//!
//! ## Example
//!
//! ```rust,ignore
//! use armory_rules::{RuleContext, RulesCoordinator};
//!
//! let ctx = RuleContext::equip(item, 0).with_level(12);
//! let verdict = coordinator.evaluate_with_slots(&ctx, &snapshot.slots);
//! if !verdict.can_proceed(ctx.allow_override) {
//!     println!("{}", verdict.summary());
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod compatibility;
pub mod conflict;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod result;
pub mod validator;
pub mod weight;

pub use compatibility::{CompatibilityRulesEngine, LOW_DURABILITY_THRESHOLD};
pub use conflict::{
    conflict_description, CompanionConfig, ConflictConfig, ConflictInfo, ConflictResolution,
    ConflictRules, ConflictRulesEngine, ConflictType, ItemSet, ItemSetConfig, ResolutionAction,
    ResolutionStrategy, SetBonusInfo, KNIGHT_SET,
};
pub use context::{PlacementContext, RuleContext};
pub use coordinator::{
    CoordinatorConfig, CoordinatorStatistics, EngineMetrics, RuleEngine, RulesCoordinator,
};
pub use error::{RulesError, RulesResult};
pub use result::{AggregatedRuleResult, RuleCheckResult, RuleSeverity, RuleType};
pub use validator::{
    find_operation_conflicts, item_unit_weight, BatchValidationResult, SlotRestriction, SlotValidator,
    ValidationResult, ValidationRule, ValidatorConfig, ValidatorStatistics,
};
pub use weight::{EncumbranceLevel, WeightConfig, WeightRulesEngine};
