//! # Operations
//!
//! The unit of mutation recorded inside a transaction, and the request a
//! caller hands to the rules pipeline before anything is recorded.

use crate::item::ItemInstance;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Identifier of a recorded operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of equipment mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Put an item into a slot.
    Equip,
    /// Remove the item from a slot.
    Unequip,
    /// Exchange the contents of two slots.
    Swap,
    /// Move an item from one slot into an empty slot.
    Move,
    /// Split a stack.
    Split,
    /// Merge two stacks.
    Merge,
    /// Restore durability of an equipped item.
    Repair,
    /// Replace an equipped item with its upgraded form.
    Upgrade,
    /// Change runtime properties of an equipped item.
    Modify,
}

impl OperationType {
    /// Returns true if the type can be applied to equipment slots.
    #[must_use]
    pub const fn is_slot_operation(self) -> bool {
        !matches!(self, Self::Split | Self::Merge)
    }

    /// Returns true if the operation needs a secondary slot.
    #[must_use]
    pub const fn needs_secondary_slot(self) -> bool {
        matches!(self, Self::Swap | Self::Move)
    }

    /// Returns true if the operation writes an item into its primary slot.
    #[must_use]
    pub const fn writes_item(self) -> bool {
        matches!(self, Self::Equip | Self::Repair | Self::Upgrade | Self::Modify)
    }

    /// Name used in logs and delta metadata.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Equip => "Equip",
            Self::Unequip => "Unequip",
            Self::Swap => "Swap",
            Self::Move => "Move",
            Self::Split => "Split",
            Self::Merge => "Merge",
            Self::Repair => "Repair",
            Self::Upgrade => "Upgrade",
            Self::Modify => "Modify",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduling priority of an operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationPriority {
    /// Background work.
    Low,
    /// Regular gameplay.
    #[default]
    Normal,
    /// Player initiated.
    High,
    /// Must not be starved.
    Critical,
    /// Jumps every queue.
    Emergency,
}

/// A recorded equipment mutation.
///
/// `slot_index` is the primary slot (the source for `Move`, the first slot
/// for `Swap`); `secondary_slot_index` is the move target or the other swap
/// slot.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionOperation {
    /// Unique id.
    pub operation_id: OperationId,
    /// Mutation kind.
    pub operation_type: OperationType,
    /// Scheduling priority.
    pub priority: OperationPriority,
    /// Primary slot.
    pub slot_index: Option<usize>,
    /// Secondary slot.
    pub secondary_slot_index: Option<usize>,
    /// Primary slot content before.
    pub item_before: Option<ItemInstance>,
    /// Primary slot content after.
    pub item_after: Option<ItemInstance>,
    /// Secondary slot content before.
    pub secondary_item_before: Option<ItemInstance>,
    /// Secondary slot content after.
    pub secondary_item_after: Option<ItemInstance>,
    /// Who registered the operation (UI, AI, server, ...).
    pub source: Option<String>,
    /// Free-form metadata. `Reason` is copied into deltas.
    pub metadata: BTreeMap<String, String>,
    /// Whether the operation can be undone.
    pub reversible: bool,
    /// Whether the operation has been applied to a working snapshot.
    pub executed: bool,
    /// Creation time.
    pub created_at: SystemTime,
}

impl TransactionOperation {
    /// Creates an operation of the given type.
    #[must_use]
    pub fn new(operation_type: OperationType) -> Self {
        Self {
            operation_id: OperationId::generate(),
            operation_type,
            priority: OperationPriority::Normal,
            slot_index: None,
            secondary_slot_index: None,
            item_before: None,
            item_after: None,
            secondary_item_before: None,
            secondary_item_after: None,
            source: None,
            metadata: BTreeMap::new(),
            reversible: true,
            executed: false,
            created_at: SystemTime::now(),
        }
    }

    /// Equip `item` into `slot`.
    #[must_use]
    pub fn equip(slot: usize, item: ItemInstance) -> Self {
        let mut op = Self::new(OperationType::Equip);
        op.slot_index = Some(slot);
        op.item_after = Some(item);
        op
    }

    /// Clear `slot`.
    #[must_use]
    pub fn unequip(slot: usize) -> Self {
        let mut op = Self::new(OperationType::Unequip);
        op.slot_index = Some(slot);
        op
    }

    /// Swap the contents of two slots.
    #[must_use]
    pub fn swap(slot_a: usize, slot_b: usize) -> Self {
        let mut op = Self::new(OperationType::Swap);
        op.slot_index = Some(slot_a);
        op.secondary_slot_index = Some(slot_b);
        op
    }

    /// Move the item in `from` into the empty slot `to`.
    #[must_use]
    pub fn move_item(from: usize, to: usize) -> Self {
        let mut op = Self::new(OperationType::Move);
        op.slot_index = Some(from);
        op.secondary_slot_index = Some(to);
        op
    }

    /// Replace the item in `slot` with an updated copy (repair/upgrade/modify).
    #[must_use]
    pub fn update(operation_type: OperationType, slot: usize, item: ItemInstance) -> Self {
        let mut op = Self::new(operation_type);
        op.slot_index = Some(slot);
        op.item_after = Some(item);
        op
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: OperationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the registration source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Slots this operation touches.
    #[must_use]
    pub fn touched_slots(&self) -> Vec<usize> {
        self.slot_index
            .into_iter()
            .chain(self.secondary_slot_index)
            .collect()
    }

    /// Returns true if the operation touches `slot`.
    #[must_use]
    pub fn touches(&self, slot: usize) -> bool {
        self.slot_index == Some(slot) || self.secondary_slot_index == Some(slot)
    }

    /// Copy of this operation with a fresh id, not yet executed.
    #[must_use]
    pub fn replayed(&self) -> Self {
        let mut op = self.clone();
        op.operation_id = OperationId::generate();
        op.executed = false;
        op.created_at = SystemTime::now();
        op
    }
}

/// Orders by priority (highest first), then by creation time (oldest first).
///
/// Note: only `priority` and `created_at` take part, so two different
/// operations can compare `Equal`.
pub fn execution_order(a: &TransactionOperation, b: &TransactionOperation) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// What a caller asks the engine to do, before it is validated.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationRequest {
    /// Mutation kind.
    pub operation_type: OperationType,
    /// Incoming item (equip) or updated item (repair/upgrade/modify).
    pub item: Option<ItemInstance>,
    /// Source slot (move, swap, unequip).
    pub source_slot: Option<usize>,
    /// Target slot (equip, move, swap).
    pub target_slot: Option<usize>,
    /// Who issued the request.
    pub source: Option<String>,
    /// Proceed past overridable warnings.
    pub allow_override: bool,
    /// Priority for the recorded operation.
    pub priority: OperationPriority,
}

impl OperationRequest {
    /// Equip `item` into `slot`.
    #[must_use]
    pub fn equip(item: ItemInstance, slot: usize) -> Self {
        Self::new(OperationType::Equip, Some(item), None, Some(slot))
    }

    /// Clear `slot`.
    #[must_use]
    pub fn unequip(slot: usize) -> Self {
        Self::new(OperationType::Unequip, None, Some(slot), None)
    }

    /// Move the item in `from` to `to`.
    #[must_use]
    pub fn move_item(from: usize, to: usize) -> Self {
        Self::new(OperationType::Move, None, Some(from), Some(to))
    }

    /// Swap `a` and `b`.
    #[must_use]
    pub fn swap(a: usize, b: usize) -> Self {
        Self::new(OperationType::Swap, None, Some(a), Some(b))
    }

    fn new(
        operation_type: OperationType,
        item: Option<ItemInstance>,
        source_slot: Option<usize>,
        target_slot: Option<usize>,
    ) -> Self {
        Self {
            operation_type,
            item,
            source_slot,
            target_slot,
            source: None,
            allow_override: false,
            priority: OperationPriority::Normal,
        }
    }

    /// Allows proceeding past overridable warnings.
    #[must_use]
    pub const fn with_override(mut self) -> Self {
        self.allow_override = true;
        self
    }

    /// Sets the issuing source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the priority of the recorded operation.
    #[must_use]
    pub const fn with_priority(mut self, priority: OperationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Slot the request evaluates against: the target if any, else the source.
    #[must_use]
    pub fn primary_slot(&self) -> Option<usize> {
        self.target_slot.or(self.source_slot)
    }

    /// Converts the request into a recordable operation.
    #[must_use]
    pub fn to_operation(&self) -> TransactionOperation {
        let mut op = TransactionOperation::new(self.operation_type);
        op.priority = self.priority;
        op.source.clone_from(&self.source);
        match self.operation_type {
            OperationType::Move | OperationType::Swap => {
                op.slot_index = self.source_slot;
                op.secondary_slot_index = self.target_slot;
            }
            OperationType::Unequip => {
                op.slot_index = self.source_slot.or(self.target_slot);
            }
            _ => {
                op.slot_index = self.target_slot.or(self.source_slot);
                op.item_after.clone_from(&self.item);
            }
        }
        op
    }
}
