//! # Slot Storage Contract
//!
//! The only shared mutable resource the engine touches. Everything above
//! this trait works on snapshots.
//!
//! ## Lock Ordering
//!
//! Implementations own their lock. Callers holding an engine lock must never
//! call into a store; the transaction processor releases its own lock first.

use crate::error::ArmoryResult;
use crate::item::ItemInstance;
use crate::slot::SlotConfig;
use crate::snapshot::EquipmentStateSnapshot;
use crossbeam_channel::Receiver;
use std::collections::BTreeMap;

/// Change notification emitted by a store.
#[derive(Clone, Debug, PartialEq)]
pub enum SlotEvent {
    /// A slot changed.
    SlotDataChanged {
        /// Slot index.
        index: usize,
        /// New content.
        item: Option<ItemInstance>,
    },
    /// The whole state was replaced.
    Reset,
}

/// Storage of equipped items.
pub trait SlotStore: Send + Sync {
    /// Number of configured slots.
    fn slot_count(&self) -> usize;

    /// Returns true if `index` names a configured slot.
    fn is_valid_slot(&self, index: usize) -> bool {
        self.slot_configuration(index).is_some()
    }

    /// Current content of a slot.
    fn get_slot_item(&self, index: usize) -> Option<ItemInstance>;

    /// Writes an item into a slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist or the store refuses the write.
    fn set_slot_item(&self, index: usize, item: ItemInstance, notify: bool) -> ArmoryResult<()>;

    /// Empties a slot and returns what it held.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist or the store refuses the write.
    fn clear_slot(&self, index: usize, notify: bool) -> ArmoryResult<Option<ItemInstance>>;

    /// Configuration of one slot.
    fn slot_configuration(&self, index: usize) -> Option<SlotConfig>;

    /// Configuration of every slot in layout order.
    fn get_all_slot_configurations(&self) -> Vec<SlotConfig>;

    /// Every occupied slot.
    fn get_all_equipped_items(&self) -> BTreeMap<usize, ItemInstance>;

    /// Captures the full state.
    fn create_snapshot(&self) -> EquipmentStateSnapshot;

    /// Replaces item contents with those of `snapshot`.
    ///
    /// The store version keeps increasing.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot layout does not match.
    fn restore_snapshot(&self, snapshot: &EquipmentStateSnapshot) -> ArmoryResult<()>;

    /// Opens a channel of change notifications.
    fn subscribe(&self) -> Receiver<SlotEvent>;
}

/// Writes `item` into `index`, clearing the slot when `item` is `None`.
///
/// # Errors
///
/// Propagates the store error.
pub fn write_slot(
    store: &dyn SlotStore,
    index: usize,
    item: Option<ItemInstance>,
    notify: bool,
) -> ArmoryResult<()> {
    match item {
        Some(item) => store.set_slot_item(index, item, notify),
        None => store.clear_slot(index, notify).map(|_| ()),
    }
}
