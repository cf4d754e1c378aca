//! # Recovery and Integrity
//!
//! Repair paths for transactions left behind by a failed commit or an
//! abandoned caller, plus read-only integrity reports.

use crate::conflicts::conflicting_operations;
use crate::error::{TransactionError, TransactionResult};
use crate::processor::{execute_into, replay_pending, TransactionProcessor};
use crate::record::TransactionState;
use armory_core::{EquipmentStateSnapshot, TransactionId};

/// Result of [`TransactionProcessor::validate_transaction_integrity`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Problems that would make a commit fail.
    pub errors: Vec<String>,
    /// Problems that would not.
    pub warnings: Vec<String>,
    /// Number of conflicting operations.
    pub conflicts: usize,
    /// No errors.
    pub is_valid: bool,
}

impl TransactionProcessor {
    /// Rebuilds a failed or stale transaction on top of the current store.
    ///
    /// If a failed commit left writes behind, the store is first restored to
    /// the initial snapshot. Operations are then replayed on a fresh working
    /// snapshot; those that no longer apply are dropped. The transaction
    /// ends up Active. Returns the number of operations kept.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the transaction is not Active or Failed
    /// - `OperationRejected` if children already committed under it
    /// - `ApplyFailed` if the store refuses the restore
    pub fn recover_transaction(&self, id: TransactionId) -> TransactionResult<usize> {
        let (initial, touched) = {
            let state = self.inner.lock();
            let tx = state.lookup(id)?;
            if !matches!(tx.state, TransactionState::Active | TransactionState::Failed) {
                return Err(TransactionError::InvalidState { id, state: tx.state });
            }
            if !tx.committed_children.is_empty() {
                return Err(TransactionError::OperationRejected(format!(
                    "transaction {id} has committed children and must be rolled back"
                )));
            }
            (tx.initial_snapshot.clone(), tx.store_touched)
        };

        if touched {
            self.store
                .restore_snapshot(&initial)
                .map_err(|source| TransactionError::ApplyFailed { id, source })?;
        }
        let mut working = self.store.create_snapshot();

        let mut state = self.inner.lock();
        let tx = state.lookup_mut(id)?;
        let mut kept = Vec::with_capacity(tx.operations.len());
        let mut dropped = 0_usize;
        for op in &tx.operations {
            let mut replay = op.replayed();
            replay.item_before = None;
            replay.secondary_item_before = None;
            match execute_into(&mut working, &mut replay) {
                Ok(()) => kept.push(replay),
                Err(err) => {
                    dropped += 1;
                    tracing::debug!(transaction = %id, operation = %op.operation_id, %err, "operation dropped during recovery");
                }
            }
        }

        let count = kept.len();
        tx.operations = kept;
        tx.working_snapshot = working;
        tx.savepoints.clear();
        tx.store_touched = false;
        tx.last_error = None;
        tx.state = TransactionState::Active;
        tracing::info!(transaction = %id, kept = count, dropped, "transaction recovered");
        Ok(count)
    }

    /// Checks a transaction without changing it.
    ///
    /// # Errors
    ///
    /// `NotFound` / `InvalidState` if the transaction is not open.
    pub fn validate_transaction_integrity(&self, id: TransactionId) -> TransactionResult<IntegrityReport> {
        let state = self.inner.lock();
        let tx = state.lookup(id)?;
        let mut report = IntegrityReport::default();

        if tx.state == TransactionState::Failed {
            report.errors.push(format!(
                "transaction failed: {}",
                tx.last_error.as_deref().unwrap_or("unknown error")
            ));
        }
        if let Err(reason) = replay_pending(tx) {
            report.errors.push(reason);
        }
        if let Some(instance) = tx.working_snapshot.find_duplicate_instance() {
            report
                .errors
                .push(format!("instance {instance} is equipped in more than one slot"));
        }
        if tx.store_touched {
            report.errors.push("a failed commit wrote to the store".to_string());
        }

        if tx.operations.is_empty() {
            report.warnings.push("transaction has no operations".to_string());
        }
        if tx.age() > self.config.timeout() {
            report
                .warnings
                .push(format!("transaction exceeded its {}s timeout", self.config.timeout_secs));
        }
        if tx.forced {
            report.warnings.push("conflicts were forced".to_string());
        }
        let irreversible = tx.operations.iter().filter(|op| !op.reversible).count();
        if irreversible > 0 {
            report
                .warnings
                .push(format!("{irreversible} operation(s) are not reversible"));
        }

        report.conflicts = conflicting_operations(&state, id)?.len();
        report.is_valid = report.errors.is_empty();
        Ok(report)
    }

    /// Returns true if `snapshot` fits the store layout and no item
    /// instance is equipped twice.
    #[must_use]
    pub fn validate_state_consistency(&self, snapshot: &EquipmentStateSnapshot) -> bool {
        snapshot.slots.len() == self.store.slot_count() && snapshot.find_duplicate_instance().is_none()
    }

    /// Rolls back every active transaction older than the configured timeout.
    ///
    /// Returns the number rolled back.
    pub fn cleanup_expired_transactions(&self) -> usize {
        let timeout = self.config.timeout();
        let expired: Vec<_> = {
            let state = self.inner.lock();
            state
                .stack
                .iter()
                .filter(|id| {
                    state
                        .transactions
                        .get(*id)
                        .is_some_and(|tx| tx.is_active() && tx.age() > timeout)
                })
                .copied()
                .collect()
        };

        let mut cleaned = 0;
        for id in expired.into_iter().rev() {
            match self.rollback(id) {
                Ok(_) => {
                    cleaned += 1;
                    tracing::warn!(transaction = %id, "expired transaction rolled back");
                }
                // already taken down with an expired ancestor
                Err(TransactionError::InvalidState { .. } | TransactionError::NotFound(_)) => {}
                Err(err) => tracing::warn!(transaction = %id, %err, "expired transaction cleanup failed"),
            }
        }
        cleaned
    }
}
