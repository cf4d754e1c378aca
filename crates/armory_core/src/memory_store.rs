//! # In-Memory Slot Store
//!
//! **Reference [`SlotStore`] backed by a single equipment snapshot.**
//!
//! ## Design
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RwLock<EquipmentStateSnapshot>               │
//! │   slot 0  slot 1  ...  slot N   version: u64 │
//! └──────────────────────────────────────────────┘
//!            │ write + version bump
//!            ▼
//!     lock released ──> SlotEvent to subscribers
//! ```
//!
//! - The slot layout is fixed at construction
//! - Every successful write bumps the version, restores included
//! - Notifications go out after the lock is dropped

use crate::error::{ArmoryError, ArmoryResult};
use crate::item::ItemInstance;
use crate::slot::{SlotConfig, SlotSnapshot};
use crate::snapshot::EquipmentStateSnapshot;
use crate::store::{SlotEvent, SlotStore};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Thread-safe in-memory equipment storage.
#[derive(Debug)]
pub struct InMemorySlotStore {
    state: RwLock<EquipmentStateSnapshot>,
    subscribers: Mutex<Vec<Sender<SlotEvent>>>,
}

impl InMemorySlotStore {
    /// Creates an empty store with the given slot layout.
    #[must_use]
    pub fn new(configs: Vec<SlotConfig>) -> Self {
        let slots = configs.into_iter().map(SlotSnapshot::empty).collect();
        Self {
            state: RwLock::new(EquipmentStateSnapshot::new(slots)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current store version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    fn write(&self, index: usize, item: Option<ItemInstance>) -> ArmoryResult<Option<ItemInstance>> {
        let mut state = self.state.write();
        let slot_count = state.slots.len();
        let slot = state
            .slots
            .iter_mut()
            .find(|s| s.index == index)
            .ok_or(ArmoryError::InvalidSlot { index, slot_count })?;
        let previous = std::mem::replace(&mut slot.item, item);
        state.version += 1;
        state.timestamp = SystemTime::now();
        Ok(previous)
    }

    fn notify(&self, event: &SlotEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl SlotStore for InMemorySlotStore {
    fn slot_count(&self) -> usize {
        self.state.read().slots.len()
    }

    fn get_slot_item(&self, index: usize) -> Option<ItemInstance> {
        self.state.read().item_at(index).cloned()
    }

    fn set_slot_item(&self, index: usize, item: ItemInstance, notify: bool) -> ArmoryResult<()> {
        let event = notify.then(|| SlotEvent::SlotDataChanged {
            index,
            item: Some(item.clone()),
        });
        self.write(index, Some(item))?;
        if let Some(event) = event {
            self.notify(&event);
        }
        Ok(())
    }

    fn clear_slot(&self, index: usize, notify: bool) -> ArmoryResult<Option<ItemInstance>> {
        let previous = self.write(index, None)?;
        if notify {
            self.notify(&SlotEvent::SlotDataChanged { index, item: None });
        }
        Ok(previous)
    }

    fn slot_configuration(&self, index: usize) -> Option<SlotConfig> {
        self.state.read().slot(index).map(|s| s.config.clone())
    }

    fn get_all_slot_configurations(&self) -> Vec<SlotConfig> {
        self.state.read().slots.iter().map(|s| s.config.clone()).collect()
    }

    fn get_all_equipped_items(&self) -> BTreeMap<usize, ItemInstance> {
        self.state
            .read()
            .slots
            .iter()
            .filter_map(|s| s.item.clone().map(|item| (s.index, item)))
            .collect()
    }

    fn create_snapshot(&self) -> EquipmentStateSnapshot {
        let mut snapshot = self.state.read().clone();
        snapshot.timestamp = SystemTime::now();
        snapshot
    }

    fn restore_snapshot(&self, snapshot: &EquipmentStateSnapshot) -> ArmoryResult<()> {
        {
            let mut state = self.state.write();
            state.restore_contents_from(snapshot)?;
        }
        tracing::debug!(version = snapshot.version, "store restored from snapshot");
        self.notify(&SlotEvent::Reset);
        Ok(())
    }

    fn subscribe(&self) -> Receiver<SlotEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotType;
    use crate::tag::names;

    fn store() -> InMemorySlotStore {
        InMemorySlotStore::new(vec![
            SlotConfig::new(0, SlotType::PrimaryWeapon, names::SLOT_HAND_MAIN),
            SlotConfig::new(1, SlotType::OffHand, names::SLOT_HAND_OFF),
            SlotConfig::new(2, SlotType::Headwear, "Equipment.Slot.Head"),
        ])
    }

    #[test]
    fn test_set_and_clear() {
        let store = store();
        let sword = ItemInstance::new("Sword");
        store.set_slot_item(0, sword.clone(), false).unwrap();
        assert_eq!(store.get_slot_item(0), Some(sword.clone()));
        assert_eq!(store.get_all_equipped_items().len(), 1);

        assert_eq!(store.clear_slot(0, false).unwrap(), Some(sword));
        assert_eq!(store.get_slot_item(0), None);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_invalid_slot() {
        let store = store();
        let err = store.set_slot_item(9, ItemInstance::new("Sword"), false).unwrap_err();
        assert_eq!(err, ArmoryError::InvalidSlot { index: 9, slot_count: 3 });
        assert!(!store.is_valid_slot(9));
        assert!(store.is_valid_slot(2));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let store = store();
        store.set_slot_item(2, ItemInstance::new("Cap"), false).unwrap();
        let snapshot = store.create_snapshot();

        store.set_slot_item(0, ItemInstance::new("Axe"), false).unwrap();
        store.clear_slot(2, false).unwrap();
        let before_restore = store.version();

        store.restore_snapshot(&snapshot).unwrap();
        assert!(store.create_snapshot().same_contents(&snapshot));
        assert!(store.version() > before_restore);
    }

    #[test]
    fn test_notifications() {
        let store = store();
        let rx = store.subscribe();
        let cap = ItemInstance::new("Cap");

        store.set_slot_item(2, cap.clone(), true).unwrap();
        store.set_slot_item(1, ItemInstance::new("Buckler"), false).unwrap();
        store.restore_snapshot(&store.create_snapshot()).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            SlotEvent::SlotDataChanged { index: 2, item: Some(cap) }
        );
        assert_eq!(rx.try_recv().unwrap(), SlotEvent::Reset);
        assert!(rx.try_recv().is_err());
    }
}
