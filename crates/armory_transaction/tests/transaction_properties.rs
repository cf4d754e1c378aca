//! Integration test for transaction atomicity, nesting and delta publication.
//!
//! Uses a store wrapper that rejects writes on demand to exercise the
//! failure paths of the commit pipeline.

use armory_core::{
    ArmoryError, ArmoryResult, Delta, DeltaObserver, EquipmentStateSnapshot, InMemorySlotStore, ItemInstance,
    SlotConfig, SlotEvent, SlotStore, SlotType, TransactionOperation,
};
use armory_transaction::{
    TransactionConfig, TransactionError, TransactionProcessor, TransactionState, TransactionStatistics,
};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

const SLOTS: usize = 4;

/// Store that rejects the write numbered `fail_at` (0-based).
///
/// With `sticky` every later write is rejected as well.
struct FlakyStore {
    inner: InMemorySlotStore,
    writes: AtomicUsize,
    fail_at: AtomicUsize,
    sticky: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemorySlotStore::new(layout()),
            writes: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(usize::MAX),
            sticky: AtomicBool::new(false),
        }
    }

    fn fail_at(&self, write: usize, sticky: bool) {
        self.writes.store(0, Ordering::SeqCst);
        self.fail_at.store(write, Ordering::SeqCst);
        self.sticky.store(sticky, Ordering::SeqCst);
    }

    fn heal(&self) {
        self.fail_at(usize::MAX, false);
    }

    fn check(&self, index: usize) -> ArmoryResult<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        let at = self.fail_at.load(Ordering::SeqCst);
        let fails = n == at || (self.sticky.load(Ordering::SeqCst) && n >= at);
        if fails {
            Err(ArmoryError::StoreRejected {
                index,
                reason: format!("injected failure on write {n}"),
            })
        } else {
            Ok(())
        }
    }
}

impl SlotStore for FlakyStore {
    fn slot_count(&self) -> usize {
        self.inner.slot_count()
    }

    fn get_slot_item(&self, index: usize) -> Option<ItemInstance> {
        self.inner.get_slot_item(index)
    }

    fn set_slot_item(&self, index: usize, item: ItemInstance, notify: bool) -> ArmoryResult<()> {
        self.check(index)?;
        self.inner.set_slot_item(index, item, notify)
    }

    fn clear_slot(&self, index: usize, notify: bool) -> ArmoryResult<Option<ItemInstance>> {
        self.check(index)?;
        self.inner.clear_slot(index, notify)
    }

    fn slot_configuration(&self, index: usize) -> Option<SlotConfig> {
        self.inner.slot_configuration(index)
    }

    fn get_all_slot_configurations(&self) -> Vec<SlotConfig> {
        self.inner.get_all_slot_configurations()
    }

    fn get_all_equipped_items(&self) -> BTreeMap<usize, ItemInstance> {
        self.inner.get_all_equipped_items()
    }

    fn create_snapshot(&self) -> EquipmentStateSnapshot {
        self.inner.create_snapshot()
    }

    fn restore_snapshot(&self, snapshot: &EquipmentStateSnapshot) -> ArmoryResult<()> {
        self.inner.restore_snapshot(snapshot)
    }

    fn subscribe(&self) -> Receiver<SlotEvent> {
        self.inner.subscribe()
    }
}

fn layout() -> Vec<SlotConfig> {
    vec![
        SlotConfig::new(0, SlotType::PrimaryWeapon, "Equipment.Slot.Hand.Main"),
        SlotConfig::new(1, SlotType::OffHand, "Equipment.Slot.Hand.Off"),
        SlotConfig::new(2, SlotType::Headwear, "Equipment.Slot.Head"),
        SlotConfig::new(3, SlotType::BodyArmor, "Equipment.Slot.Body"),
    ]
}

fn setup() -> (Arc<FlakyStore>, TransactionProcessor) {
    let store = Arc::new(FlakyStore::new());
    let processor = TransactionProcessor::new(TransactionConfig::default(), store.clone());
    (store, processor)
}

fn item_name(store: &dyn SlotStore, slot: usize) -> Option<String> {
    store.get_slot_item(slot).map(|i| i.item_id.as_str().to_string())
}

#[test]
fn test_failed_commit_is_undone() {
    let (store, processor) = setup();
    store.set_slot_item(0, ItemInstance::new("Sword"), false).unwrap();
    let before = store.create_snapshot();

    let tx = processor.begin("outfit").unwrap();
    for (slot, name) in [(1, "Shield"), (2, "Helm"), (3, "Mail")] {
        processor
            .register_operation(tx, TransactionOperation::equip(slot, ItemInstance::new(name)))
            .unwrap();
    }
    store.fail_at(2, false);
    let err = processor.commit(tx).unwrap_err();
    assert!(matches!(err, TransactionError::ApplyFailed { .. }));
    assert!(store.create_snapshot().same_contents(&before));
    assert_eq!(processor.transaction_state(tx), Some(TransactionState::Failed));

    store.heal();
    processor.rollback(tx).unwrap();
    assert!(store.create_snapshot().same_contents(&before));
}

#[test]
fn test_failed_undo_falls_back_to_initial_snapshot() {
    let (store, processor) = setup();
    let before = store.create_snapshot();

    let tx = processor.begin("outfit").unwrap();
    processor
        .register_operation(tx, TransactionOperation::equip(0, ItemInstance::new("Axe")))
        .unwrap();
    processor
        .register_operation(tx, TransactionOperation::equip(1, ItemInstance::new("Buckler")))
        .unwrap();
    store.fail_at(1, true);

    assert!(processor.commit(tx).is_err());
    assert!(store.create_snapshot().same_contents(&before));
    let record = processor.transaction(tx).unwrap();
    assert!(record.store_touched);
    assert!(record.last_error.is_some());
}

#[test]
fn test_parent_rollback_undoes_committed_child() {
    let (store, processor) = setup();
    let parent = processor.begin("parent").unwrap();
    processor
        .register_operation(parent, TransactionOperation::equip(2, ItemInstance::new("Helm")))
        .unwrap();

    let child = processor.begin_nested("child").unwrap();
    processor
        .register_operation(child, TransactionOperation::equip(0, ItemInstance::new("Sword")))
        .unwrap();
    processor.commit(child).unwrap();
    assert_eq!(item_name(store.as_ref(), 0).as_deref(), Some("Sword"));
    assert_eq!(processor.transaction(parent).unwrap().committed_children, vec![child]);

    processor.rollback(parent).unwrap();
    assert!(store.get_all_equipped_items().is_empty());
    assert_eq!(processor.depth(), 0);
}

#[test]
fn test_rollback_takes_active_children_down() {
    let (_store, processor) = setup();
    let outer = processor.begin("outer").unwrap();
    let middle = processor.begin_nested("middle").unwrap();
    let inner = processor.begin_nested("inner").unwrap();

    processor.rollback(outer).unwrap();
    for id in [outer, middle, inner] {
        assert_eq!(processor.transaction_state(id), Some(TransactionState::RolledBack));
    }
    assert_eq!(processor.statistics().rolled_back, 3);
}

#[test]
fn test_savepoint_round_trip_then_commit() {
    let (store, processor) = setup();
    let tx = processor.begin("outfit").unwrap();
    processor
        .apply_operation(tx, TransactionOperation::equip(0, ItemInstance::new("Sword")))
        .unwrap();
    let mark = processor.create_savepoint("armed").unwrap();
    processor
        .apply_operation(tx, TransactionOperation::move_item(0, 1))
        .unwrap();
    let moved = processor.working_snapshot(tx).unwrap();
    assert!(moved.item_at(1).is_some());

    processor.rollback_to_savepoint(mark).unwrap();
    let restored = processor.working_snapshot(tx).unwrap();
    assert!(restored.version > moved.version);
    assert!(restored.item_at(1).is_none());

    processor.commit(tx).unwrap();
    assert_eq!(item_name(store.as_ref(), 0).as_deref(), Some("Sword"));
    assert!(store.get_slot_item(1).is_none());
}

#[test]
fn test_savepoint_cannot_undo_committed_child() {
    let (store, processor) = setup();
    let parent = processor.begin("parent").unwrap();
    let mark = processor.create_savepoint("bare").unwrap();

    let child = processor.begin_nested("child").unwrap();
    processor
        .apply_operation(child, TransactionOperation::equip(3, ItemInstance::new("Robe")))
        .unwrap();
    processor.commit(child).unwrap();

    let err = processor.rollback_to_savepoint(mark).unwrap_err();
    assert!(matches!(err, TransactionError::SavepointCrossesCommit { children: 1, .. }));

    // working view and store still agree
    let working = processor.working_snapshot(parent).unwrap();
    assert!(working.same_contents(&store.create_snapshot()));

    processor.commit(parent).unwrap();
    assert_eq!(item_name(store.as_ref(), 3).as_deref(), Some("Robe"));
}

#[test]
fn test_savepoint_after_committed_child_still_works() {
    let (store, processor) = setup();
    let parent = processor.begin("parent").unwrap();
    let child = processor.begin_nested("child").unwrap();
    processor
        .apply_operation(child, TransactionOperation::equip(3, ItemInstance::new("Robe")))
        .unwrap();
    processor.commit(child).unwrap();

    let mark = processor.create_savepoint("robed").unwrap();
    processor
        .apply_operation(parent, TransactionOperation::equip(2, ItemInstance::new("Helm")))
        .unwrap();
    assert_eq!(processor.rollback_to_savepoint(mark).unwrap(), 1);

    processor.commit(parent).unwrap();
    assert_eq!(item_name(store.as_ref(), 3).as_deref(), Some("Robe"));
    assert!(store.get_slot_item(2).is_none());
}

#[test]
fn test_commit_all_and_rollback_all() {
    let (store, processor) = setup();
    for (slot, name) in [(0, "Sword"), (1, "Shield"), (2, "Helm")] {
        let tx = processor.begin(name).unwrap();
        processor
            .register_operation(tx, TransactionOperation::equip(slot, ItemInstance::new(name)))
            .unwrap();
    }
    assert_eq!(processor.commit_all().unwrap(), 3);
    assert_eq!(store.get_all_equipped_items().len(), 3);

    let outer = processor.begin("strip").unwrap();
    processor.register_operation(outer, TransactionOperation::unequip(0)).unwrap();
    let inner = processor.begin_nested("strip more").unwrap();
    processor.register_operation(inner, TransactionOperation::unequip(1)).unwrap();
    processor.commit(inner).unwrap();
    assert_eq!(store.get_all_equipped_items().len(), 2);

    assert_eq!(processor.rollback_all(), 1);
    assert_eq!(store.get_all_equipped_items().len(), 3);
    assert_eq!(processor.depth(), 0);
}

#[test]
fn test_commit_all_stops_at_first_failure() {
    let (_store, processor) = setup();
    let outer = processor.begin("outer").unwrap();
    let inner = processor.begin_nested("inner").unwrap();
    processor
        .register_operation(inner, TransactionOperation::move_item(3, 2))
        .unwrap();

    assert!(matches!(
        processor.commit_all(),
        Err(TransactionError::ValidationFailed { id, .. }) if id == inner
    ));
    assert_eq!(processor.transaction_state(outer), Some(TransactionState::Active));
    assert_eq!(processor.rollback_all(), 2);
}

/// Observer that reads processor statistics from inside the callback.
struct Reentrant {
    processor: Mutex<Weak<TransactionProcessor>>,
    seen: Mutex<Vec<TransactionStatistics>>,
}

impl DeltaObserver for Reentrant {
    fn on_deltas(&self, _deltas: &[Delta]) {
        if let Some(processor) = self.processor.lock().upgrade() {
            self.seen.lock().push(processor.statistics());
        }
    }
}

#[test]
fn test_observers_run_after_locks_are_released() {
    let store = Arc::new(FlakyStore::new());
    let processor = Arc::new(TransactionProcessor::new(TransactionConfig::default(), store));
    let observer = Arc::new(Reentrant {
        processor: Mutex::new(Arc::downgrade(&processor)),
        seen: Mutex::new(Vec::new()),
    });
    processor.add_observer(observer.clone());
    let rx = processor.subscribe();

    let tx = processor.begin("equip").unwrap();
    processor
        .register_operation(tx, TransactionOperation::equip(0, ItemInstance::new("Sword")))
        .unwrap();
    processor.commit(tx).unwrap();

    let seen = observer.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].committed, 1);
    assert_eq!(seen[0].stack_depth, 0);
    assert_eq!(rx.try_recv().unwrap().len(), 1);
}

#[test]
fn test_generate_deltas_off_still_accepts_explicit() {
    let store = Arc::new(FlakyStore::new());
    let processor = TransactionProcessor::new(
        TransactionConfig {
            generate_deltas: false,
            ..TransactionConfig::default()
        },
        store,
    );
    let rx = processor.subscribe();

    let tx = processor.begin("quiet").unwrap();
    processor
        .register_operation(tx, TransactionOperation::equip(0, ItemInstance::new("Sword")))
        .unwrap();
    assert!(processor.commit(tx).unwrap().is_empty());
    assert!(rx.try_recv().is_err());

    let tx = processor.begin("loud").unwrap();
    let custom = Delta::new(armory_core::OperationType::Modify, None, None, None);
    let published = processor.commit_with_deltas(tx, vec![custom]).unwrap();
    assert_eq!(published[0].source_transaction, Some(tx));
    assert_eq!(rx.try_recv().unwrap().len(), 1);
}

#[derive(Clone, Debug)]
enum Step {
    Equip(usize, u8),
    Unequip(usize),
    Swap(usize, usize),
    Move(usize, usize),
}

impl Step {
    fn operation(&self) -> TransactionOperation {
        match *self {
            Self::Equip(slot, n) => TransactionOperation::equip(slot, ItemInstance::new(format!("Item{n}"))),
            Self::Unequip(slot) => TransactionOperation::unequip(slot),
            Self::Swap(a, b) => TransactionOperation::swap(a, b),
            Self::Move(a, b) => TransactionOperation::move_item(a, b),
        }
    }
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..SLOTS, any::<u8>()).prop_map(|(s, n)| Step::Equip(s, n)),
        (0..SLOTS).prop_map(Step::Unequip),
        (0..SLOTS, 0..SLOTS).prop_map(|(a, b)| Step::Swap(a, b)),
        (0..SLOTS, 0..SLOTS).prop_map(|(a, b)| Step::Move(a, b)),
    ]
}

proptest! {
    #[test]
    fn prop_rollback_after_failed_commit_restores_state(
        seed in proptest::collection::vec(proptest::option::of(any::<u8>()), SLOTS),
        steps in proptest::collection::vec(step(), 1..8),
        fail_at in 0_usize..12,
        sticky in any::<bool>(),
    ) {
        let (store, processor) = setup();
        for (slot, item) in seed.iter().enumerate() {
            if let Some(n) = item {
                store.set_slot_item(slot, ItemInstance::new(format!("Seed{n}")), false).unwrap();
            }
        }
        let before = store.create_snapshot();

        let tx = processor.begin("random").unwrap();
        for step in &steps {
            let _ = processor.register_operation(tx, step.operation());
        }
        store.fail_at(fail_at, sticky);
        let committed = processor.commit(tx);
        store.heal();

        if committed.is_err() {
            prop_assert!(store.create_snapshot().same_contents(&before));
            processor.rollback(tx).unwrap();
            prop_assert!(store.create_snapshot().same_contents(&before));
        }
        prop_assert_eq!(processor.depth(), 0);
    }
}
