//! Integration test for the equipment service against the sample layout.

use armory::core::{ItemInstance, OperationPriority, OperationRequest, OperationType};
use armory::transaction::{CancelToken, TransactionError};
use armory::{ArmoryConfig, EquipmentService, ServiceError, ServiceState};

const SAMPLE: &str = include_str!("../data/armory.toml");

const HAND_MAIN: usize = 0;
const HAND_OFF: usize = 1;
const HEAD: usize = 2;
const BODY: usize = 3;
const HANDS: usize = 4;
const FEET: usize = 5;

fn ready_service() -> EquipmentService {
    let config = ArmoryConfig::from_toml_str(SAMPLE).unwrap();
    let service = EquipmentService::in_memory(config).unwrap();
    service.initialize().unwrap();
    service
}

fn equip(item: &str, slot: usize) -> OperationRequest {
    OperationRequest::equip(ItemInstance::new(item), slot)
}

#[test]
fn test_sample_config_loads() {
    let config = ArmoryConfig::from_toml_str(SAMPLE).unwrap();
    assert_eq!(config.slots.len(), 6);
    assert_eq!(config.catalog().len(), 7);
    assert_eq!(config.character.level, 12);
}

#[test]
fn test_knight_set_in_one_batch() {
    let service = ready_service();
    let events = service.subscribe();

    let requests = [
        equip("Knight_Helmet", HEAD),
        equip("Knight_Chestplate", BODY),
        equip("Knight_Gauntlets", HANDS),
        equip("Knight_Boots", FEET),
    ];
    let deltas = service.execute_batch(&requests, &CancelToken::new()).unwrap();

    assert_eq!(deltas.len(), 4);
    let snapshot = service.snapshot();
    for slot in [HEAD, BODY, HANDS, FEET] {
        assert!(snapshot.item_at(slot).is_some(), "slot {slot} empty");
    }
    let published = events.try_recv().unwrap();
    assert_eq!(published.len(), 4);

    let stats = service.statistics();
    assert_eq!(stats.transactions.committed, 1);
    assert_eq!(stats.rejected, 0);
}

#[test]
fn test_two_hander_refused_while_shield_equipped() {
    let service = ready_service();
    service.execute(&equip("Tower_Shield", HAND_OFF)).unwrap();

    let request = equip("Zweihander", HAND_MAIN);
    let preview = service.preview(&request).unwrap();
    assert!(!preview.can_proceed(false));

    let err = service.execute(&request).unwrap_err();
    assert!(matches!(err, ServiceError::Rejected { index: None, .. }));
    assert!(service.snapshot().item_at(HAND_MAIN).is_none());
    assert_eq!(service.processor().depth(), 0);
}

#[test]
fn test_batch_rejection_reports_index_and_applies_nothing() {
    let service = ready_service();
    let requests = [equip("Tower_Shield", HAND_OFF), equip("Zweihander", HAND_MAIN)];

    let err = service.execute_batch(&requests, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, ServiceError::Rejected { index: Some(1), .. }));

    let snapshot = service.snapshot();
    assert!(snapshot.item_at(HAND_OFF).is_none());
    assert!(snapshot.item_at(HAND_MAIN).is_none());
}

#[test]
fn test_batch_is_judged_in_priority_order() {
    let service = ready_service();
    let requests = [
        equip("Tower_Shield", HAND_OFF).with_priority(OperationPriority::Low),
        OperationRequest::unequip(HAND_OFF).with_priority(OperationPriority::High),
        equip("Zweihander", HAND_MAIN),
    ];

    let err = service.execute_batch(&requests, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, ServiceError::Rejected { .. }));

    let snapshot = service.snapshot();
    assert!(snapshot.item_at(HAND_MAIN).is_none());
    assert!(snapshot.item_at(HAND_OFF).is_none());
}

#[test]
fn test_high_priority_unequip_clears_the_way() {
    let service = ready_service();
    service.execute(&equip("Tower_Shield", HAND_OFF)).unwrap();

    let requests = [
        equip("Zweihander", HAND_MAIN).with_priority(OperationPriority::Low),
        OperationRequest::unequip(HAND_OFF).with_priority(OperationPriority::High),
    ];
    let deltas = service.execute_batch(&requests, &CancelToken::new()).unwrap();

    assert_eq!(deltas.len(), 2);
    assert_eq!(deltas[0].change_type, OperationType::Unequip);
    let snapshot = service.snapshot();
    assert_eq!(snapshot.item_at(HAND_MAIN).unwrap().item_id.as_str(), "Zweihander");
    assert!(snapshot.item_at(HAND_OFF).is_none());
}

#[test]
fn test_wrong_slot_type_is_rejected() {
    let service = ready_service();
    let err = service.execute(&equip("Knight_Boots", HAND_MAIN)).unwrap_err();
    assert!(err.verdict().is_some());
    assert_eq!(service.statistics().rejected, 1);
}

#[test]
fn test_cancelled_batch_leaves_state_untouched() {
    let service = ready_service();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = service
        .execute_batch(&[equip("Arming_Sword", HAND_MAIN)], &cancel)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Transaction(TransactionError::Cancelled(_))));
    assert!(service.snapshot().item_at(HAND_MAIN).is_none());
    assert_eq!(service.processor().depth(), 0);
}

#[test]
fn test_equip_then_unequip() {
    let service = ready_service();
    service.execute(&equip("Arming_Sword", HAND_MAIN)).unwrap();

    let deltas = service.execute(&OperationRequest::unequip(HAND_MAIN)).unwrap();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].change_type, OperationType::Unequip);
    assert!(service.snapshot().item_at(HAND_MAIN).is_none());
}

#[test]
fn test_shutdown_rolls_back_open_work_and_refuses_calls() {
    let service = ready_service();
    let processor = service.processor().clone();
    let id = processor.begin("manual").unwrap();
    processor
        .apply_operation(id, armory::core::TransactionOperation::equip(HEAD, ItemInstance::new("Knight_Helmet")))
        .unwrap();

    service.shutdown().unwrap();
    assert_eq!(service.state(), ServiceState::Shutdown);
    assert_eq!(processor.depth(), 0);
    assert!(service.snapshot().item_at(HEAD).is_none());

    assert!(matches!(
        service.execute(&equip("Knight_Helmet", HEAD)),
        Err(ServiceError::InvalidState { actual: ServiceState::Shutdown, .. })
    ));
    assert!(service.shutdown().is_err());
}
