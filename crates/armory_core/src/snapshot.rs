//! # Equipment State Snapshots
//!
//! **Plain values, cloned freely, never aliased.**
//!
//! A snapshot is used three ways:
//!
//! ```text
//!   store.create_snapshot() ──> initial snapshot  (rollback target)
//!                          └──> working snapshot  (transaction preview)
//!   state.clone()          ──> shadow snapshot   (batch trial evaluation)
//! ```
//!
//! ## Guarantees
//!
//! - `apply_operation` either applies fully or leaves the snapshot untouched
//! - `version` only ever increases, including on restore

use crate::error::{ArmoryError, ArmoryResult};
use crate::item::{InstanceId, ItemInstance};
use crate::operation::{OperationType, TransactionOperation};
use crate::slot::SlotSnapshot;
use crate::tag::{names, Tag};
use std::collections::HashSet;
use std::time::SystemTime;

/// Full equipment state at one point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct EquipmentStateSnapshot {
    /// Slots in layout order.
    pub slots: Vec<SlotSnapshot>,
    /// Slot index of the active weapon.
    pub active_weapon_slot: Option<usize>,
    /// Equipment state tag.
    pub state_tag: Tag,
    /// Monotonic version.
    pub version: u64,
    /// Capture time.
    pub timestamp: SystemTime,
}

impl EquipmentStateSnapshot {
    /// Creates a snapshot from slots at version 0.
    #[must_use]
    pub fn new(slots: Vec<SlotSnapshot>) -> Self {
        Self {
            slots,
            active_weapon_slot: None,
            state_tag: Tag::new(names::STATE_IDLE),
            version: 0,
            timestamp: SystemTime::now(),
        }
    }

    /// Looks up a slot by its real index.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&SlotSnapshot> {
        self.slots.iter().find(|s| s.index == index)
    }

    fn slot_mut(&mut self, index: usize) -> ArmoryResult<&mut SlotSnapshot> {
        let slot_count = self.slots.len();
        self.slots
            .iter_mut()
            .find(|s| s.index == index)
            .ok_or(ArmoryError::InvalidSlot { index, slot_count })
    }

    /// Returns true if `index` names a slot in this snapshot.
    #[inline]
    #[must_use]
    pub fn has_slot(&self, index: usize) -> bool {
        self.slot(index).is_some()
    }

    /// Item in a slot.
    #[must_use]
    pub fn item_at(&self, index: usize) -> Option<&ItemInstance> {
        self.slot(index).and_then(|s| s.item.as_ref())
    }

    /// All equipped items in layout order.
    #[must_use]
    pub fn equipped_items(&self) -> Vec<&ItemInstance> {
        self.slots.iter().filter_map(|s| s.item.as_ref()).collect()
    }

    /// Returns true if both snapshots hold identical items in identical slots.
    #[must_use]
    pub fn same_contents(&self, other: &Self) -> bool {
        self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(&other.slots)
                .all(|(a, b)| a.index == b.index && a.item == b.item)
    }

    /// Returns the first instance id equipped in more than one slot.
    #[must_use]
    pub fn find_duplicate_instance(&self) -> Option<InstanceId> {
        let mut seen = HashSet::new();
        self.slots
            .iter()
            .filter_map(|s| s.item.as_ref())
            .map(|item| item.instance_id)
            .find(|id| !seen.insert(*id))
    }

    /// Copies item contents from `source` and advances the version past both.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotMismatch` if the layouts differ.
    pub fn restore_contents_from(&mut self, source: &Self) -> ArmoryResult<()> {
        if source.slots.len() != self.slots.len() {
            return Err(ArmoryError::SnapshotMismatch {
                expected: self.slots.len(),
                actual: source.slots.len(),
            });
        }
        for (dst, src) in self.slots.iter_mut().zip(&source.slots) {
            dst.item.clone_from(&src.item);
        }
        self.active_weapon_slot = source.active_weapon_slot;
        self.state_tag = source.state_tag.clone();
        self.version = self.version.max(source.version) + 1;
        self.timestamp = SystemTime::now();
        Ok(())
    }

    /// Applies an operation in place and bumps the version.
    ///
    /// Nothing changes if the operation is rejected.
    ///
    /// # Errors
    ///
    /// - `UnsupportedOperation` for split/merge
    /// - `MalformedOperation` if a required slot or item is missing
    /// - `InvalidSlot` if a slot index is unknown
    /// - `SlotEmpty` / `SlotOccupied` if slot occupancy forbids the operation
    pub fn apply_operation(&mut self, op: &TransactionOperation) -> ArmoryResult<()> {
        let kind = op.operation_type;
        if !kind.is_slot_operation() {
            return Err(ArmoryError::UnsupportedOperation(kind));
        }
        let primary = op.slot_index.ok_or_else(|| malformed(kind, "missing slot index"))?;
        if !self.has_slot(primary) {
            return Err(self.invalid(primary));
        }

        match kind {
            OperationType::Equip => {
                let item = op
                    .item_after
                    .clone()
                    .ok_or_else(|| malformed(kind, "missing item"))?;
                self.slot_mut(primary)?.item = Some(item);
            }
            OperationType::Unequip => {
                self.slot_mut(primary)?.item = None;
            }
            OperationType::Repair | OperationType::Upgrade | OperationType::Modify => {
                let item = op
                    .item_after
                    .clone()
                    .ok_or_else(|| malformed(kind, "missing item"))?;
                let slot = self.slot_mut(primary)?;
                if slot.item.is_none() {
                    return Err(ArmoryError::SlotEmpty(primary));
                }
                slot.item = Some(item);
            }
            OperationType::Swap | OperationType::Move => {
                let secondary = op
                    .secondary_slot_index
                    .ok_or_else(|| malformed(kind, "missing secondary slot index"))?;
                if !self.has_slot(secondary) {
                    return Err(self.invalid(secondary));
                }
                let a = self.slot_mut(primary)?.item.take();
                let b = self.slot_mut(secondary)?.item.take();
                let (new_a, new_b) = if kind == OperationType::Swap {
                    (b, a)
                } else if a.is_none() {
                    self.slot_mut(primary)?.item = a;
                    self.slot_mut(secondary)?.item = b;
                    return Err(ArmoryError::SlotEmpty(primary));
                } else if b.is_some() {
                    self.slot_mut(primary)?.item = a;
                    self.slot_mut(secondary)?.item = b;
                    return Err(ArmoryError::SlotOccupied(secondary));
                } else {
                    (None, a)
                };
                self.slot_mut(primary)?.item = new_a;
                self.slot_mut(secondary)?.item = new_b;
            }
            OperationType::Split | OperationType::Merge => {
                return Err(ArmoryError::UnsupportedOperation(kind));
            }
        }

        self.version += 1;
        self.timestamp = SystemTime::now();
        Ok(())
    }

    fn invalid(&self, index: usize) -> ArmoryError {
        ArmoryError::InvalidSlot {
            index,
            slot_count: self.slots.len(),
        }
    }
}

fn malformed(operation: OperationType, reason: &str) -> ArmoryError {
    ArmoryError::MalformedOperation {
        operation,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::{SlotConfig, SlotType};

    fn layout() -> EquipmentStateSnapshot {
        EquipmentStateSnapshot::new(vec![
            SlotSnapshot::empty(SlotConfig::new(0, SlotType::PrimaryWeapon, names::SLOT_HAND_MAIN)),
            SlotSnapshot::empty(SlotConfig::new(1, SlotType::OffHand, names::SLOT_HAND_OFF)),
            SlotSnapshot::empty(SlotConfig::new(5, SlotType::Headwear, "Equipment.Slot.Head")),
        ])
    }

    #[test]
    fn test_equip_uses_real_slot_index() {
        let mut state = layout();
        let helmet = ItemInstance::new("Knight_Helmet");
        state
            .apply_operation(&TransactionOperation::equip(5, helmet.clone()))
            .unwrap();
        assert_eq!(state.item_at(5), Some(&helmet));
        assert_eq!(state.version, 1);

        let err = state
            .apply_operation(&TransactionOperation::equip(2, helmet))
            .unwrap_err();
        assert!(matches!(err, ArmoryError::InvalidSlot { index: 2, .. }));
        assert_eq!(state.version, 1);
    }

    #[test]
    fn test_move_and_swap() {
        let mut state = layout();
        let sword = ItemInstance::new("Sword");
        let shield = ItemInstance::new("Shield");
        state.apply_operation(&TransactionOperation::equip(0, sword.clone())).unwrap();

        state.apply_operation(&TransactionOperation::move_item(0, 1)).unwrap();
        assert_eq!(state.item_at(0), None);
        assert_eq!(state.item_at(1), Some(&sword));

        state.apply_operation(&TransactionOperation::equip(0, shield.clone())).unwrap();
        state.apply_operation(&TransactionOperation::swap(0, 1)).unwrap();
        assert_eq!(state.item_at(0), Some(&sword));
        assert_eq!(state.item_at(1), Some(&shield));
    }

    #[test]
    fn test_rejected_move_leaves_state_untouched() {
        let mut state = layout();
        state.apply_operation(&TransactionOperation::equip(0, ItemInstance::new("A"))).unwrap();
        state.apply_operation(&TransactionOperation::equip(1, ItemInstance::new("B"))).unwrap();
        let before = state.clone();

        let err = state.apply_operation(&TransactionOperation::move_item(0, 1)).unwrap_err();
        assert_eq!(err, ArmoryError::SlotOccupied(1));
        assert_eq!(state, before);

        let err = state.apply_operation(&TransactionOperation::move_item(5, 0)).unwrap_err();
        assert_eq!(err, ArmoryError::SlotEmpty(5));
        assert_eq!(state, before);
    }

    #[test]
    fn test_split_merge_unsupported() {
        let mut state = layout();
        let mut op = TransactionOperation::new(OperationType::Split);
        op.slot_index = Some(0);
        assert_eq!(
            state.apply_operation(&op).unwrap_err(),
            ArmoryError::UnsupportedOperation(OperationType::Split)
        );
    }

    #[test]
    fn test_restore_contents_keeps_version_monotonic() {
        let mut state = layout();
        let initial = state.clone();
        state.apply_operation(&TransactionOperation::equip(0, ItemInstance::new("A"))).unwrap();
        state.apply_operation(&TransactionOperation::equip(1, ItemInstance::new("B"))).unwrap();
        let version = state.version;

        state.restore_contents_from(&initial).unwrap();
        assert!(state.same_contents(&initial));
        assert!(state.version > version);
    }

    #[test]
    fn test_duplicate_instance_detection() {
        let mut state = layout();
        let ring = ItemInstance::new("Ring");
        state.apply_operation(&TransactionOperation::equip(0, ring.clone())).unwrap();
        assert_eq!(state.find_duplicate_instance(), None);
        state.apply_operation(&TransactionOperation::equip(1, ring.clone())).unwrap();
        assert_eq!(state.find_duplicate_instance(), Some(ring.instance_id));
    }
}
