//! # Savepoints
//!
//! Named marks inside the innermost transaction. Rolling back to one drops
//! every operation recorded after it and restores the item contents of its
//! working snapshot. The store is never involved, so a savepoint cannot be
//! rolled back to once a nested transaction has committed after it.

use crate::error::{TransactionError, TransactionResult};
use crate::processor::{require_active, TransactionProcessor};
use crate::record::{Savepoint, SavepointId};

impl TransactionProcessor {
    /// Marks the current state of the innermost transaction.
    ///
    /// # Errors
    ///
    /// `NoActiveTransaction` if the stack is empty, `InvalidState` if the
    /// innermost transaction is not active.
    pub fn create_savepoint(&self, name: impl Into<String>) -> TransactionResult<SavepointId> {
        let mut state = self.inner.lock();
        let top = state
            .stack
            .last()
            .copied()
            .ok_or(TransactionError::NoActiveTransaction)?;
        let tx = state.active_mut(top)?;

        let savepoint = Savepoint {
            id: SavepointId::generate(),
            name: name.into(),
            snapshot: tx.working_snapshot.clone(),
            operation_index: tx.operations.len(),
            committed_children: tx.committed_children.len(),
        };
        let id = savepoint.id;
        tracing::debug!(transaction = %top, savepoint = %id, name = %savepoint.name, "savepoint created");
        tx.savepoints.push(savepoint);
        Ok(id)
    }

    /// Returns to a savepoint, discarding later operations and savepoints.
    ///
    /// The savepoint itself survives and can be rolled back to again.
    /// Returns the number of operations discarded.
    ///
    /// # Errors
    ///
    /// - `SavepointNotFound` if no open transaction holds it
    /// - `InvalidState` if its transaction is not active
    /// - `SavepointCrossesCommit` if a nested transaction committed after it
    ///   (roll back the whole transaction instead)
    pub fn rollback_to_savepoint(&self, savepoint: SavepointId) -> TransactionResult<usize> {
        let mut state = self.inner.lock();
        let tx = state
            .transactions
            .values_mut()
            .find(|tx| tx.savepoints.iter().any(|sp| sp.id == savepoint))
            .ok_or(TransactionError::SavepointNotFound(savepoint))?;
        require_active(tx)?;

        let position = tx
            .savepoints
            .iter()
            .position(|sp| sp.id == savepoint)
            .ok_or(TransactionError::SavepointNotFound(savepoint))?;
        let children = tx.committed_children.len().saturating_sub(tx.savepoints[position].committed_children);
        if children > 0 {
            return Err(TransactionError::SavepointCrossesCommit { savepoint, children });
        }

        tx.savepoints.truncate(position + 1);
        let mark = &tx.savepoints[position];
        tx.working_snapshot.restore_contents_from(&mark.snapshot)?;
        let discarded = tx.operations.len().saturating_sub(mark.operation_index);
        tx.operations.truncate(mark.operation_index);

        tracing::debug!(transaction = %tx.id, %savepoint, discarded, "rolled back to savepoint");
        Ok(discarded)
    }

    /// Forgets a savepoint without touching any operation.
    ///
    /// # Errors
    ///
    /// `SavepointNotFound` if no open transaction holds it.
    pub fn release_savepoint(&self, savepoint: SavepointId) -> TransactionResult<()> {
        let mut state = self.inner.lock();
        let tx = state
            .transactions
            .values_mut()
            .find(|tx| tx.savepoints.iter().any(|sp| sp.id == savepoint))
            .ok_or(TransactionError::SavepointNotFound(savepoint))?;
        tx.savepoints.retain(|sp| sp.id != savepoint);
        Ok(())
    }
}
