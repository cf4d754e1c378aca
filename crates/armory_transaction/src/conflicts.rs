//! # Conflict Detection
//!
//! Two kinds of conflict are reported for an operation:
//!
//! ```text
//!   internal   same transaction, same slot, different registration source
//!   external   another open transaction (not an ancestor or descendant)
//!              touches the same slot
//! ```
//!
//! Detection is advisory. Nothing is blocked until the caller picks a
//! [`ConflictStrategy`].

use crate::error::TransactionResult;
use crate::processor::{ProcessorState, TransactionProcessor};
use crate::record::TransactionState;
use crate::stats::Counters;
use armory_core::{TransactionId, TransactionOperation};
use serde::{Deserialize, Serialize};

/// What to do about detected conflicts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictStrategy {
    /// Roll the transaction back.
    #[default]
    Abort,
    /// Roll back and start over from fresh store state with the same operations.
    Retry,
    /// Keep going and mark the transaction as forced.
    Force,
}

/// Outcome of [`TransactionProcessor::resolve_conflicts`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Nothing to resolve.
    NoConflicts,
    /// Conflicts overridden.
    Forced {
        /// Conflicting operations.
        conflicts: usize,
    },
    /// Transaction rolled back.
    Aborted {
        /// Conflicting operations.
        conflicts: usize,
    },
    /// Transaction replaced by a fresh one.
    Retried {
        /// The replacement transaction.
        replacement: TransactionId,
        /// Conflicting operations in the original.
        conflicts: usize,
    },
}

pub(crate) fn conflicting_operations(
    state: &ProcessorState,
    id: TransactionId,
) -> TransactionResult<Vec<TransactionOperation>> {
    let tx = state.lookup(id)?;
    let others: Vec<_> = state
        .transactions
        .values()
        .filter(|other| other.id != id)
        .filter(|other| matches!(other.state, TransactionState::Active | TransactionState::Committing))
        .filter(|other| !state.is_ancestor(other.id, id) && !state.is_ancestor(id, other.id))
        .collect();

    let conflicting = tx
        .operations
        .iter()
        .enumerate()
        .filter(|(i, op)| {
            let slots = op.touched_slots();
            let internal = tx.operations.iter().enumerate().any(|(j, other)| {
                *i != j && other.source != op.source && slots.iter().any(|s| other.touches(*s))
            });
            internal || others.iter().any(|other| slots.iter().any(|s| other.touches(*s)))
        })
        .map(|(_, op)| op.clone())
        .collect();
    Ok(conflicting)
}

impl TransactionProcessor {
    /// Operations in `id` that conflict with other work.
    ///
    /// # Errors
    ///
    /// `NotFound` / `InvalidState` if the transaction is not open.
    pub fn check_conflicts(&self, id: TransactionId) -> TransactionResult<Vec<TransactionOperation>> {
        conflicting_operations(&self.inner.lock(), id)
    }

    /// Applies `strategy` to the conflicts of `id`.
    ///
    /// # Errors
    ///
    /// Propagates rollback and begin errors for `Abort` and `Retry`.
    pub fn resolve_conflicts(
        &self,
        id: TransactionId,
        strategy: ConflictStrategy,
    ) -> TransactionResult<ResolutionOutcome> {
        let conflicts = self.check_conflicts(id)?.len();
        if conflicts == 0 {
            return Ok(ResolutionOutcome::NoConflicts);
        }
        tracing::info!(transaction = %id, conflicts, ?strategy, "resolving conflicts");

        let outcome = match strategy {
            ConflictStrategy::Force => {
                let mut state = self.inner.lock();
                state.active_mut(id)?.forced = true;
                ResolutionOutcome::Forced { conflicts }
            }
            ConflictStrategy::Abort => {
                self.rollback(id)?;
                ResolutionOutcome::Aborted { conflicts }
            }
            ConflictStrategy::Retry => {
                let (description, operations) = {
                    let state = self.inner.lock();
                    let tx = state.lookup(id)?;
                    let ops: Vec<_> = tx.operations.iter().map(TransactionOperation::replayed).collect();
                    (tx.description.clone(), ops)
                };
                self.rollback(id)?;
                let replacement = self.begin(description)?;
                for op in operations {
                    self.register_operation(replacement, op)?;
                }
                ResolutionOutcome::Retried {
                    replacement,
                    conflicts,
                }
            }
        };
        Counters::add(&self.counters.conflicts_resolved, conflicts);
        Ok(outcome)
    }
}
