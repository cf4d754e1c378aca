//! # Rule Registry Errors
//!
//! Rule *results* are data (see [`crate::result`]). These errors cover
//! malformed registrations only.

use armory_core::Tag;
use thiserror::Error;

/// Errors raised when registering rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    /// A tag cannot be mutually exclusive with itself.
    #[error("tag {0} cannot exclude itself")]
    SelfExclusion(Tag),

    /// Rule or set tag is empty.
    #[error("rule tag must not be empty")]
    EmptyTag,

    /// Item set registered without members.
    #[error("item set {0} has no members")]
    EmptyItemSet(Tag),

    /// Required piece count is zero or larger than the set.
    #[error("item set {set} requires {required} pieces but has {members}")]
    InvalidRequiredCount {
        /// Set tag.
        set: Tag,
        /// Requested count.
        required: usize,
        /// Number of members.
        members: usize,
    },

    /// A validation rule with this tag already exists.
    #[error("validation rule {0} is already registered")]
    DuplicateRule(Tag),
}

/// Result type for rule registration.
pub type RulesResult<T> = Result<T, RulesError>;
