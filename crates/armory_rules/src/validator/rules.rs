//! # Validation Rule Registry
//!
//! Built-in rules always run first, in a fixed order. Custom rules run after
//! them, highest priority first. Any rule can be disabled by tag.
//!
//! ```text
//!   ItemType (100) ─> Level (90) ─> Weight (80) ─> Unique (70) ─> custom...
//! ```

use crate::context::PlacementContext;
use crate::error::{RulesError, RulesResult};
use armory_core::{ItemInstance, SlotConfig, Tag, ValidationFailure};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Tag of the built-in item type rule.
pub const RULE_ITEM_TYPE: &str = "Validation.Rule.ItemType";
/// Tag of the built-in level rule.
pub const RULE_LEVEL: &str = "Validation.Rule.Level";
/// Tag of the built-in weight rule.
pub const RULE_WEIGHT: &str = "Validation.Rule.Weight";
/// Tag of the built-in unique group rule.
pub const RULE_UNIQUE: &str = "Validation.Rule.Unique";

/// Built-in rule tags in execution order.
pub const BUILT_IN_RULES: [&str; 4] = [RULE_ITEM_TYPE, RULE_LEVEL, RULE_WEIGHT, RULE_UNIQUE];

/// Predicate of a custom rule. Must be pure and must not take external locks.
pub type RuleFn = Arc<dyn Fn(&ItemInstance, &SlotConfig, &PlacementContext) -> bool + Send + Sync>;

/// Per-slot-tag restrictions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotRestriction {
    /// Maximum item weight. Zero means unlimited.
    pub max_weight: f32,
    /// At most one equipped item may belong to this group.
    pub unique_group: Option<Tag>,
}

/// A custom validation rule.
#[derive(Clone)]
pub struct ValidationRule {
    /// Unique tag.
    pub tag: Tag,
    /// Higher runs first.
    pub priority: i32,
    /// Failure reported when the predicate returns false.
    pub failure: ValidationFailure,
    /// Message reported on failure.
    pub message: String,
    check: RuleFn,
}

impl ValidationRule {
    /// Creates a rule.
    pub fn new(
        tag: impl Into<Tag>,
        priority: i32,
        failure: ValidationFailure,
        message: impl Into<String>,
        check: impl Fn(&ItemInstance, &SlotConfig, &PlacementContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            tag: tag.into(),
            priority,
            failure,
            message: message.into(),
            check: Arc::new(check),
        }
    }

    /// Runs the predicate.
    #[must_use]
    pub fn check(&self, item: &ItemInstance, slot: &SlotConfig, ctx: &PlacementContext) -> bool {
        (self.check)(item, slot, ctx)
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("tag", &self.tag)
            .field("priority", &self.priority)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// Immutable set of custom rules plus disabled tags.
#[derive(Clone, Debug, Default)]
pub(crate) struct RuleRegistry {
    custom: Vec<ValidationRule>,
    disabled: HashSet<Tag>,
}

impl RuleRegistry {
    pub(crate) fn is_enabled(&self, tag: &str) -> bool {
        !self.disabled.iter().any(|t| t.as_str() == tag)
    }

    pub(crate) fn enabled_custom_rules(&self) -> impl Iterator<Item = &ValidationRule> {
        self.custom.iter().filter(|r| !self.disabled.contains(&r.tag))
    }

    pub(crate) fn with_rule(&self, rule: ValidationRule) -> RulesResult<Self> {
        if rule.tag.is_empty() {
            return Err(RulesError::EmptyTag);
        }
        let builtin = BUILT_IN_RULES.contains(&rule.tag.as_str());
        if builtin || self.custom.iter().any(|r| r.tag == rule.tag) {
            return Err(RulesError::DuplicateRule(rule.tag));
        }
        let mut next = self.clone();
        next.custom.push(rule);
        // Stable sort keeps registration order among equal priorities.
        next.custom.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(next)
    }

    pub(crate) fn without_rule(&self, tag: &Tag) -> Option<Self> {
        let position = self.custom.iter().position(|r| &r.tag == tag)?;
        let mut next = self.clone();
        next.custom.remove(position);
        next.disabled.remove(tag);
        Some(next)
    }

    pub(crate) fn with_enabled(&self, tag: &Tag, enabled: bool) -> Self {
        let mut next = self.clone();
        if enabled {
            next.disabled.remove(tag);
        } else {
            next.disabled.insert(tag.clone());
        }
        next
    }

    pub(crate) fn tags(&self) -> Vec<Tag> {
        BUILT_IN_RULES
            .iter()
            .map(|t| Tag::new(*t))
            .chain(self.custom.iter().map(|r| r.tag.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always(tag: &str, priority: i32) -> ValidationRule {
        ValidationRule::new(tag, priority, ValidationFailure::RequirementsNotMet, "x", |_, _, _| true)
    }

    #[test]
    fn test_custom_rules_sorted_by_priority() {
        let reg = RuleRegistry::default()
            .with_rule(always("Rule.Low", 1))
            .unwrap()
            .with_rule(always("Rule.High", 50))
            .unwrap();
        let order: Vec<_> = reg.enabled_custom_rules().map(|r| r.tag.as_str().to_string()).collect();
        assert_eq!(order, vec!["Rule.High", "Rule.Low"]);
        assert_eq!(reg.tags().len(), 6);
    }

    #[test]
    fn test_duplicate_and_builtin_tags_rejected() {
        let reg = RuleRegistry::default().with_rule(always("Rule.A", 1)).unwrap();
        assert!(matches!(reg.with_rule(always("Rule.A", 2)), Err(RulesError::DuplicateRule(_))));
        assert!(matches!(
            reg.with_rule(always(RULE_LEVEL, 2)),
            Err(RulesError::DuplicateRule(_))
        ));
        assert_eq!(reg.with_rule(always("", 2)).unwrap_err(), RulesError::EmptyTag);
    }

    #[test]
    fn test_disable_and_remove() {
        let tag = Tag::new("Rule.A");
        let reg = RuleRegistry::default().with_rule(always("Rule.A", 1)).unwrap();
        let disabled = reg.with_enabled(&tag, false);
        assert_eq!(disabled.enabled_custom_rules().count(), 0);
        assert!(disabled.with_enabled(&tag, true).enabled_custom_rules().next().is_some());

        let builtin_off = reg.with_enabled(&Tag::new(RULE_WEIGHT), false);
        assert!(!builtin_off.is_enabled(RULE_WEIGHT));
        assert!(builtin_off.is_enabled(RULE_LEVEL));

        assert!(reg.without_rule(&tag).is_some());
        assert!(reg.without_rule(&Tag::new("Rule.Missing")).is_none());
    }
}
