//! # Cooperative Cancellation
//!
//! Batches check a [`CancelToken`] between operations. A cancelled batch is
//! rolled back before the call returns.

use crate::conflicts::ConflictStrategy;
use crate::error::{TransactionError, TransactionResult};
use crate::processor::TransactionProcessor;
use armory_core::{execution_order, Delta, TransactionId, TransactionOperation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl TransactionProcessor {
    /// Runs `operations` in one transaction, highest priority first.
    ///
    /// The token is checked before each operation and before commit.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if the token fired (the transaction is rolled back)
    /// - `ConflictDetected` if `strategy` is `Abort` and conflicts exist
    /// - any begin, apply or commit error (the transaction is rolled back)
    pub fn execute_operations(
        &self,
        description: impl Into<String>,
        mut operations: Vec<TransactionOperation>,
        strategy: ConflictStrategy,
        cancel: &CancelToken,
    ) -> TransactionResult<Vec<Delta>> {
        operations.sort_by(execution_order);
        self.execute_in_order(description, operations, strategy, cancel)
    }

    /// Runs `operations` in one transaction exactly in the order given.
    ///
    /// For batches whose order was already fixed and validated by the caller.
    ///
    /// # Errors
    ///
    /// As [`execute_operations`](Self::execute_operations).
    pub fn execute_in_order(
        &self,
        description: impl Into<String>,
        operations: Vec<TransactionOperation>,
        strategy: ConflictStrategy,
        cancel: &CancelToken,
    ) -> TransactionResult<Vec<Delta>> {
        let id = self.begin(description)?;

        for op in operations {
            if cancel.is_cancelled() {
                self.abandon(id);
                return Err(TransactionError::Cancelled(id));
            }
            if let Err(err) = self.apply_operation(id, op) {
                self.abandon(id);
                return Err(err);
            }
        }
        if cancel.is_cancelled() {
            self.abandon(id);
            return Err(TransactionError::Cancelled(id));
        }

        let conflicts = match self.check_conflicts(id) {
            Ok(conflicts) => conflicts.len(),
            Err(err) => {
                self.abandon(id);
                return Err(err);
            }
        };
        if conflicts > 0 {
            if strategy == ConflictStrategy::Force {
                self.resolve_conflicts(id, ConflictStrategy::Force)?;
            } else {
                self.abandon(id);
                return Err(TransactionError::ConflictDetected { id, count: conflicts });
            }
        }

        let committed = self.commit(id);
        if committed.is_err() {
            self.abandon(id);
        }
        committed
    }

    fn abandon(&self, id: TransactionId) {
        if let Err(err) = self.rollback(id) {
            tracing::warn!(transaction = %id, %err, "rollback of abandoned batch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactionConfig;
    use armory_core::{InMemorySlotStore, ItemInstance, OperationPriority, SlotConfig, SlotStore, SlotType};

    fn setup() -> (Arc<InMemorySlotStore>, TransactionProcessor) {
        let store = Arc::new(InMemorySlotStore::new(vec![
            SlotConfig::new(0, SlotType::PrimaryWeapon, "Equipment.Slot.Hand.Main"),
            SlotConfig::new(1, SlotType::OffHand, "Equipment.Slot.Hand.Off"),
        ]));
        let processor = TransactionProcessor::new(TransactionConfig::default(), store.clone());
        (store, processor)
    }

    #[test]
    fn test_token_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_batch_runs_by_priority() {
        let (store, processor) = setup();
        let ops = vec![
            TransactionOperation::move_item(0, 1),
            TransactionOperation::equip(0, ItemInstance::new("Spear")).with_priority(OperationPriority::High),
        ];
        let deltas = processor
            .execute_operations("loadout", ops, ConflictStrategy::Abort, &CancelToken::new())
            .unwrap();

        assert_eq!(deltas.len(), 2);
        assert!(store.get_slot_item(0).is_none());
        assert_eq!(store.get_slot_item(1).unwrap().item_id.as_str(), "Spear");
    }

    #[test]
    fn test_cancelled_batch_leaves_store_alone() {
        let (store, processor) = setup();
        let token = CancelToken::new();
        token.cancel();
        let result = processor.execute_operations(
            "loadout",
            vec![TransactionOperation::equip(0, ItemInstance::new("Spear"))],
            ConflictStrategy::Abort,
            &token,
        );
        assert!(matches!(result, Err(TransactionError::Cancelled(_))));
        assert!(store.get_slot_item(0).is_none());
        assert_eq!(processor.depth(), 0);
    }

    #[test]
    fn test_conflicting_batch_aborts_unless_forced() {
        let (store, processor) = setup();
        let ops = || {
            vec![
                TransactionOperation::equip(0, ItemInstance::new("Spear")).with_source("ui"),
                TransactionOperation::equip(0, ItemInstance::new("Club")).with_source("quest"),
            ]
        };
        let aborted = processor.execute_operations("race", ops(), ConflictStrategy::Abort, &CancelToken::new());
        assert!(matches!(aborted, Err(TransactionError::ConflictDetected { count: 2, .. })));
        assert!(store.get_slot_item(0).is_none());

        processor
            .execute_operations("race", ops(), ConflictStrategy::Force, &CancelToken::new())
            .unwrap();
        assert_eq!(store.get_slot_item(0).unwrap().item_id.as_str(), "Club");
    }

    #[test]
    fn test_failed_apply_rolls_back() {
        let (_store, processor) = setup();
        let result = processor.execute_operations(
            "bad",
            vec![TransactionOperation::unequip(7)],
            ConflictStrategy::Abort,
            &CancelToken::new(),
        );
        assert!(result.is_err());
        assert_eq!(processor.depth(), 0);
        assert_eq!(processor.statistics().rolled_back, 1);
    }

    #[test]
    fn test_in_order_batch_ignores_priority() {
        let (store, processor) = setup();
        let ops = vec![
            TransactionOperation::equip(0, ItemInstance::new("Spear")).with_priority(OperationPriority::Low),
            TransactionOperation::move_item(0, 1).with_priority(OperationPriority::High),
        ];
        processor
            .execute_in_order("loadout", ops, ConflictStrategy::Abort, &CancelToken::new())
            .unwrap();

        assert!(store.get_slot_item(0).is_none());
        assert_eq!(store.get_slot_item(1).unwrap().item_id.as_str(), "Spear");
    }
}
