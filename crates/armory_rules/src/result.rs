//! # Rule Results
//!
//! **Every engine answers with data, never with an error.**
//!
//! ## Override Semantics
//!
//! ```text
//!   Info / Warning   ──> overridable   (caller may proceed)
//!   Error / Critical ──> blocking      (never overridable)
//! ```
//!
//! An [`AggregatedRuleResult`] passes iff none of its results is a
//! non-overridable failure.

use armory_core::Tag;
use std::collections::BTreeMap;
use std::fmt;

/// Blocking strength of a result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleSeverity {
    /// Informational.
    #[default]
    Info,
    /// Advisory, overridable.
    Warning,
    /// Blocks the operation.
    Error,
    /// Blocks the operation; data is invalid.
    Critical,
}

impl RuleSeverity {
    /// Returns true for Error and Critical.
    #[inline]
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

/// Which engine produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleType {
    /// Slot validator.
    SlotValidation,
    /// Conflict engine.
    Conflict,
    /// Compatibility engine.
    Compatibility,
    /// Weight engine.
    Weight,
    /// Loadout-level checks run by the coordinator.
    Loadout,
}

impl RuleType {
    /// Name used in logs and metrics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SlotValidation => "SlotValidation",
            Self::Conflict => "Conflict",
            Self::Compatibility => "Compatibility",
            Self::Weight => "Weight",
            Self::Loadout => "Loadout",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single rule check.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleCheckResult {
    /// Whether the check passed.
    pub passed: bool,
    /// Blocking strength.
    pub severity: RuleSeverity,
    /// Human readable message.
    pub message: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Whether the caller may proceed anyway. Derived from severity.
    pub overridable: bool,
    /// Free-form details.
    pub context: BTreeMap<String, String>,
    /// Producing engine.
    pub rule_type: RuleType,
    /// Specific rule.
    pub rule_tag: Tag,
}

impl RuleCheckResult {
    fn new(rule_type: RuleType, passed: bool, severity: RuleSeverity, message: String) -> Self {
        Self {
            passed,
            severity,
            message,
            confidence: if passed { 1.0 } else { 0.0 },
            overridable: !severity.is_blocking(),
            context: BTreeMap::new(),
            rule_type,
            rule_tag: Tag::none(),
        }
    }

    /// A passing Info result with full confidence.
    #[must_use]
    pub fn pass(rule_type: RuleType, message: impl Into<String>) -> Self {
        Self::new(rule_type, true, RuleSeverity::Info, message.into())
    }

    /// A passing result that still carries a warning.
    #[must_use]
    pub fn pass_with_warning(rule_type: RuleType, message: impl Into<String>) -> Self {
        Self::new(rule_type, true, RuleSeverity::Warning, message.into())
    }

    /// A failing result. Overridability follows the severity.
    #[must_use]
    pub fn fail(rule_type: RuleType, severity: RuleSeverity, message: impl Into<String>) -> Self {
        Self::new(rule_type, false, severity, message.into())
    }

    /// Sets the confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets the rule tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.rule_tag = tag.into();
        self
    }

    /// Failed and cannot be overridden.
    #[inline]
    #[must_use]
    pub const fn is_hard_failure(&self) -> bool {
        !self.passed && !self.overridable
    }

    /// Context value by key.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

/// Ordered results of a pipeline run.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedRuleResult {
    /// Results in evaluation order.
    pub results: Vec<RuleCheckResult>,
    /// False iff any non-overridable failure is present.
    pub all_passed: bool,
}

impl Default for AggregatedRuleResult {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatedRuleResult {
    /// Empty, passing aggregate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            results: Vec::new(),
            all_passed: true,
        }
    }

    /// Appends a result.
    pub fn push(&mut self, result: RuleCheckResult) {
        if result.is_hard_failure() {
            self.all_passed = false;
        }
        self.results.push(result);
    }

    /// Appends every result of another aggregate.
    pub fn merge(&mut self, other: Self) {
        for result in other.results {
            self.push(result);
        }
    }

    /// Number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if no rule ran.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// First non-overridable failure.
    #[must_use]
    pub fn first_hard_failure(&self) -> Option<&RuleCheckResult> {
        self.results.iter().find(|r| r.is_hard_failure())
    }

    /// Results with Warning severity.
    pub fn warnings(&self) -> impl Iterator<Item = &RuleCheckResult> {
        self.results
            .iter()
            .filter(|r| r.severity == RuleSeverity::Warning)
    }

    /// Returns true if any result is a warning.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    /// Highest severity present.
    #[must_use]
    pub fn max_severity(&self) -> RuleSeverity {
        self.results
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or_default()
    }

    /// Mean confidence, 1.0 when empty.
    #[must_use]
    pub fn mean_confidence(&self) -> f32 {
        if self.results.is_empty() {
            return 1.0;
        }
        self.results.iter().map(|r| r.confidence).sum::<f32>() / self.results.len() as f32
    }

    /// Returns true if the operation may proceed.
    ///
    /// Overridable failures only block when `allow_override` is false.
    #[must_use]
    pub fn can_proceed(&self, allow_override: bool) -> bool {
        self.all_passed && (allow_override || self.results.iter().all(|r| r.passed))
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.first_hard_failure() {
            Some(failure) => format!("blocked by {}: {}", failure.rule_type, failure.message),
            None => format!(
                "{} checks, {} failed (overridable), {} warnings",
                self.results.len(),
                self.results.iter().filter(|r| !r.passed).count(),
                self.warnings().count()
            ),
        }
    }
}
