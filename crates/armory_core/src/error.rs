//! # Core Error Types
//!
//! Errors raised by slot storage and snapshot manipulation, plus the
//! failure taxonomy reported by slot validation.

use crate::item::InstanceId;
use crate::operation::OperationType;
use thiserror::Error;

/// Errors that can occur in the equipment data model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArmoryError {
    /// Slot index is outside the configured layout.
    #[error("invalid slot index {index} (slot count {slot_count})")]
    InvalidSlot {
        /// The offending index.
        index: usize,
        /// Number of configured slots.
        slot_count: usize,
    },

    /// The operation needs an item in a slot that is empty.
    #[error("slot {0} is empty")]
    SlotEmpty(usize),

    /// The operation needs an empty slot but it is occupied.
    #[error("slot {0} is occupied")]
    SlotOccupied(usize),

    /// The operation type cannot be applied to equipment slots.
    #[error("unsupported operation type: {0}")]
    UnsupportedOperation(OperationType),

    /// The operation is missing a field it needs.
    #[error("malformed {operation} operation: {reason}")]
    MalformedOperation {
        /// Operation type.
        operation: OperationType,
        /// What was missing.
        reason: String,
    },

    /// Storage refused a write.
    #[error("store rejected write to slot {index}: {reason}")]
    StoreRejected {
        /// Slot being written.
        index: usize,
        /// Reason given by the store.
        reason: String,
    },

    /// A snapshot does not match the store layout.
    #[error("snapshot layout mismatch: expected {expected} slots, got {actual}")]
    SnapshotMismatch {
        /// Slots in the store.
        expected: usize,
        /// Slots in the snapshot.
        actual: usize,
    },

    /// The same item instance appears in more than one slot.
    #[error("item instance {0} is equipped in more than one slot")]
    DuplicateInstance(InstanceId),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for core operations.
pub type ArmoryResult<T> = Result<T, ArmoryError>;

/// Why a slot validation failed.
///
/// Each failure carries a stable numeric code for logs and client messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationFailure {
    /// Slot does not exist or item is unusable.
    InvalidSlot,
    /// Item type not accepted by the slot.
    TypeIncompatible,
    /// Item heavier than the slot allows.
    WeightExceeded,
    /// Character level below the item's requirement.
    LevelRequirement,
    /// Another item of the same unique group is equipped.
    UniqueConstraint,
    /// A custom or size requirement failed.
    RequirementsNotMet,
    /// Conflicts with another operation of the same batch.
    ConflictingItem,
}

impl ValidationFailure {
    /// Stable numeric code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::InvalidSlot => 1001,
            Self::TypeIncompatible => 2001,
            Self::LevelRequirement => 3001,
            Self::WeightExceeded => 4001,
            Self::RequirementsNotMet => 6001,
            Self::ConflictingItem => 7001,
            Self::UniqueConstraint => 7100,
        }
    }

    /// Short name used in result context maps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidSlot => "InvalidSlot",
            Self::TypeIncompatible => "TypeIncompatible",
            Self::WeightExceeded => "WeightExceeded",
            Self::LevelRequirement => "LevelRequirement",
            Self::UniqueConstraint => "UniqueConstraint",
            Self::RequirementsNotMet => "RequirementsNotMet",
            Self::ConflictingItem => "ConflictingItem",
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
