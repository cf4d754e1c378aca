//! # Transaction Processor
//!
//! **All-or-nothing equipment mutations over a [`SlotStore`].**
//!
//! ## Commit Pipeline
//!
//! ```text
//!   Phase 1 (lock held)    Active + innermost? ── replay pending ops ── Committing
//!        │                                      └─ replay fails ──> Failed
//!        ▼
//!   Phase 2 (no lock)      store writes, notify = false, undo log per write
//!        │                  └─ write fails ──> undo in reverse ──> Failed
//!        │                                     └─ undo fails ──> restore initial snapshot
//!        ▼
//!   Phase 3 (lock held)    Committed, pop, fold into parent, archive
//!        │
//!        ▼
//!   all locks released ──> DeltaBus::publish
//! ```
//!
//! ## Guarantees
//!
//! - The processor lock is never held while calling the store
//! - A failed commit leaves the store as it was before phase 2
//! - Rolling back a parent undoes every child that committed under it
//! - Observers never run under a processor lock

use crate::config::TransactionConfig;
use crate::error::{TransactionError, TransactionResult};
use crate::record::{Transaction, TransactionState};
use crate::stats::{Counters, TransactionStatistics};
use armory_core::{
    write_slot, ArmoryError, ArmoryResult, Delta, DeltaBus, DeltaObserver, EquipmentStateSnapshot,
    ItemInstance, OperationId, OperationType, SlotStore, TransactionId, TransactionOperation,
    REASON_ROLLBACK,
};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Previous slot contents, written back in reverse on failure.
type UndoLog = Vec<(usize, Option<ItemInstance>)>;

/// Everything guarded by the processor lock.
#[derive(Debug, Default)]
pub(crate) struct ProcessorState {
    /// Open transactions, including failed ones awaiting rollback.
    pub transactions: HashMap<TransactionId, Transaction>,
    /// Nesting stack, innermost last.
    pub stack: Vec<TransactionId>,
    /// Finished transactions, oldest first.
    pub history: VecDeque<Transaction>,
}

impl ProcessorState {
    fn missing(&self, id: TransactionId) -> TransactionError {
        match self.history.iter().rev().find(|tx| tx.id == id) {
            Some(tx) => TransactionError::InvalidState { id, state: tx.state },
            None => TransactionError::NotFound(id),
        }
    }

    pub fn lookup(&self, id: TransactionId) -> TransactionResult<&Transaction> {
        self.transactions.get(&id).ok_or_else(|| self.missing(id))
    }

    pub fn lookup_mut(&mut self, id: TransactionId) -> TransactionResult<&mut Transaction> {
        if !self.transactions.contains_key(&id) {
            return Err(self.missing(id));
        }
        self.transactions
            .get_mut(&id)
            .ok_or(TransactionError::NotFound(id))
    }

    pub fn active_mut(&mut self, id: TransactionId) -> TransactionResult<&mut Transaction> {
        let tx = self.lookup_mut(id)?;
        require_active(tx)?;
        Ok(tx)
    }

    /// Transactions nested above `id`, innermost first.
    pub fn descendants(&self, id: TransactionId) -> Vec<TransactionId> {
        let Some(position) = self.stack.iter().position(|entry| *entry == id) else {
            return Vec::new();
        };
        self.stack[position + 1..].iter().rev().copied().collect()
    }

    /// Returns true if `ancestor` is on the parent chain of `id`.
    pub fn is_ancestor(&self, ancestor: TransactionId, id: TransactionId) -> bool {
        let mut current = self.transactions.get(&id).and_then(|tx| tx.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.transactions.get(&parent).and_then(|tx| tx.parent);
        }
        false
    }

    /// Removes a transaction from the live set and archives it.
    pub fn retire(&mut self, id: TransactionId, max_history: usize) -> Option<Transaction> {
        self.stack.retain(|entry| *entry != id);
        let tx = self.transactions.remove(&id)?;
        if max_history > 0 {
            self.history.push_back(tx.clone());
            while self.history.len() > max_history {
                self.history.pop_front();
            }
        }
        Some(tx)
    }
}

pub(crate) fn require_active(tx: &Transaction) -> TransactionResult<()> {
    if tx.is_active() {
        Ok(())
    } else {
        Err(TransactionError::InvalidState {
            id: tx.id,
            state: tx.state,
        })
    }
}

fn malformed(op: &TransactionOperation, reason: &str) -> ArmoryError {
    ArmoryError::MalformedOperation {
        operation: op.operation_type,
        reason: reason.to_string(),
    }
}

/// Checks an operation's shape against a snapshot.
///
/// # Errors
///
/// Returns `OperationRejected` for split/merge and missing fields, or a
/// store error for unknown slots.
pub(crate) fn check_operation(
    snapshot: &EquipmentStateSnapshot,
    op: &TransactionOperation,
) -> TransactionResult<()> {
    let kind = op.operation_type;
    if !kind.is_slot_operation() {
        return Err(TransactionError::OperationRejected(format!(
            "{kind} is not supported on equipment slots"
        )));
    }
    let slot_count = snapshot.slots.len();
    let mut slots = Vec::with_capacity(2);
    slots.push(
        op.slot_index
            .ok_or_else(|| TransactionError::OperationRejected(format!("{kind} without a slot index")))?,
    );
    if kind.needs_secondary_slot() {
        slots.push(op.secondary_slot_index.ok_or_else(|| {
            TransactionError::OperationRejected(format!("{kind} without a secondary slot index"))
        })?);
    }
    if slots.len() == 2 && slots[0] == slots[1] {
        return Err(TransactionError::OperationRejected(format!(
            "{kind} needs two different slots, got {} twice",
            slots[0]
        )));
    }
    if let Some(&index) = slots.iter().find(|index| !snapshot.has_slot(**index)) {
        return Err(ArmoryError::InvalidSlot { index, slot_count }.into());
    }
    if kind.writes_item() && op.item_after.is_none() {
        return Err(TransactionError::OperationRejected(format!("{kind} without an item")));
    }
    Ok(())
}

/// Applies `op` to `snapshot`, recording before and after values on the operation.
pub(crate) fn execute_into(
    snapshot: &mut EquipmentStateSnapshot,
    op: &mut TransactionOperation,
) -> ArmoryResult<()> {
    let primary = op.slot_index;
    let secondary = op.secondary_slot_index;
    let item_at = |snapshot: &EquipmentStateSnapshot, slot: Option<usize>| {
        slot.and_then(|index| snapshot.item_at(index).cloned())
    };

    if op.item_before.is_none() {
        op.item_before = item_at(snapshot, primary);
    }
    if op.secondary_item_before.is_none() {
        op.secondary_item_before = item_at(snapshot, secondary);
    }
    snapshot.apply_operation(op)?;
    op.item_after = item_at(snapshot, primary);
    op.secondary_item_after = item_at(snapshot, secondary);
    op.executed = true;
    Ok(())
}

/// Replays pending operations on a copy of the working snapshot.
///
/// Returns the resulting snapshot and operations, or the first problem found.
pub(crate) fn replay_pending(
    tx: &Transaction,
) -> Result<(EquipmentStateSnapshot, Vec<TransactionOperation>), String> {
    let mut snapshot = tx.working_snapshot.clone();
    let mut operations = tx.operations.clone();
    for op in operations.iter_mut().filter(|op| !op.executed) {
        execute_into(&mut snapshot, op)
            .map_err(|err| format!("operation {} ({}): {err}", op.operation_id, op.operation_type))?;
    }
    if let Some(instance) = snapshot.find_duplicate_instance() {
        return Err(ArmoryError::DuplicateInstance(instance).to_string());
    }
    Ok((snapshot, operations))
}

/// Transaction processor.
///
/// Owns the transaction stack and writes committed operations to a
/// shared [`SlotStore`].
pub struct TransactionProcessor {
    pub(crate) config: TransactionConfig,
    pub(crate) store: Arc<dyn SlotStore>,
    pub(crate) inner: Mutex<ProcessorState>,
    pub(crate) deltas: DeltaBus,
    pub(crate) counters: Counters,
}

impl TransactionProcessor {
    /// Creates a processor over `store`.
    #[must_use]
    pub fn new(config: TransactionConfig, store: Arc<dyn SlotStore>) -> Self {
        Self {
            config,
            store,
            inner: Mutex::new(ProcessorState::default()),
            deltas: DeltaBus::new(),
            counters: Counters::default(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SlotStore> {
        &self.store
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts a transaction on top of the stack.
    ///
    /// The new transaction's parent is the current innermost transaction.
    ///
    /// # Errors
    ///
    /// - `MaxDepthExceeded` if the stack is full
    /// - `InvalidState` if the innermost transaction is not active
    pub fn begin(&self, description: impl Into<String>) -> TransactionResult<TransactionId> {
        self.begin_inner(description.into(), false)
    }

    /// Starts a transaction that must nest inside an active one.
    ///
    /// # Errors
    ///
    /// As [`begin`](Self::begin), plus `NoActiveParent` if the stack is empty.
    pub fn begin_nested(&self, description: impl Into<String>) -> TransactionResult<TransactionId> {
        self.begin_inner(description.into(), true)
    }

    fn begin_inner(&self, description: String, nested: bool) -> TransactionResult<TransactionId> {
        let max = self.config.effective_max_depth();
        {
            let state = self.inner.lock();
            if state.stack.len() >= max {
                return Err(TransactionError::MaxDepthExceeded { max });
            }
            if nested && state.stack.is_empty() {
                return Err(TransactionError::NoActiveParent);
            }
        }

        let snapshot = self.store.create_snapshot();
        if snapshot.slots.len() != self.store.slot_count() {
            return Err(TransactionError::BeginFailed(format!(
                "store snapshot has {} slots, store reports {}",
                snapshot.slots.len(),
                self.store.slot_count()
            )));
        }

        let mut state = self.inner.lock();
        if state.stack.len() >= max {
            return Err(TransactionError::MaxDepthExceeded { max });
        }
        let parent = match state.stack.last().copied() {
            Some(top) => {
                require_active(state.lookup(top)?)?;
                Some(top)
            }
            None if nested => return Err(TransactionError::NoActiveParent),
            None => None,
        };

        let tx = Transaction::new(parent, description, snapshot);
        let id = tx.id;
        tracing::debug!(transaction = %id, depth = state.stack.len() + 1, description = %tx.description, "transaction started");
        state.stack.push(id);
        state.transactions.insert(id, tx);
        Counters::bump(&self.counters.started);
        Ok(id)
    }

    /// Records an operation without applying it.
    ///
    /// Missing before-values are filled from the working snapshot.
    ///
    /// # Errors
    ///
    /// - `InvalidState` / `NotFound` if the transaction is not active
    /// - `OperationRejected` for split/merge or missing fields
    /// - `Store(InvalidSlot)` for unknown slots
    pub fn register_operation(
        &self,
        id: TransactionId,
        mut op: TransactionOperation,
    ) -> TransactionResult<OperationId> {
        let mut state = self.inner.lock();
        let tx = state.active_mut(id)?;
        check_operation(&tx.working_snapshot, &op)?;

        if op.item_before.is_none() {
            op.item_before = op.slot_index.and_then(|i| tx.working_snapshot.item_at(i).cloned());
        }
        if op.secondary_item_before.is_none() {
            op.secondary_item_before = op
                .secondary_slot_index
                .and_then(|i| tx.working_snapshot.item_at(i).cloned());
        }
        op.executed = false;
        let op_id = op.operation_id;
        tx.operations.push(op);
        Ok(op_id)
    }

    /// Applies an operation to the working snapshot and marks it executed.
    ///
    /// `op` may be one already registered (matched by id) or a new one,
    /// which is recorded. The store is not touched.
    ///
    /// # Errors
    ///
    /// - `AlreadyExecuted` if the registered operation was already applied
    /// - `Store` if the working snapshot rejects the operation
    /// - the errors of [`register_operation`](Self::register_operation)
    pub fn apply_operation(&self, id: TransactionId, op: TransactionOperation) -> TransactionResult<()> {
        let mut state = self.inner.lock();
        let tx = state.active_mut(id)?;
        let Transaction {
            working_snapshot,
            operations,
            ..
        } = tx;

        if let Some(registered) = operations.iter_mut().find(|o| o.operation_id == op.operation_id) {
            if registered.executed {
                return Err(TransactionError::AlreadyExecuted(op.operation_id));
            }
            return execute_into(working_snapshot, registered).map_err(TransactionError::from);
        }

        check_operation(working_snapshot, &op)?;
        let mut op = op;
        execute_into(working_snapshot, &mut op)?;
        operations.push(op);
        Ok(())
    }

    /// Returns true if the transaction's pending operations replay cleanly.
    #[must_use]
    pub fn validate(&self, id: TransactionId) -> bool {
        let state = self.inner.lock();
        state
            .lookup(id)
            .is_ok_and(|tx| tx.is_active() && replay_pending(tx).is_ok())
    }

    /// Commits the innermost transaction, generating deltas from the store.
    ///
    /// # Errors
    ///
    /// - `NotTopOfStack` unless `id` is the innermost transaction
    /// - `ValidationFailed` if pending operations do not replay (marks it Failed)
    /// - `ApplyFailed` if the store rejects a write (marks it Failed)
    pub fn commit(&self, id: TransactionId) -> TransactionResult<Vec<Delta>> {
        self.commit_inner(id, None)
    }

    /// Commits, publishing `deltas` instead of generated ones.
    ///
    /// # Errors
    ///
    /// As [`commit`](Self::commit).
    pub fn commit_with_deltas(&self, id: TransactionId, deltas: Vec<Delta>) -> TransactionResult<Vec<Delta>> {
        self.commit_inner(id, Some(deltas))
    }

    fn commit_inner(&self, id: TransactionId, explicit: Option<Vec<Delta>>) -> TransactionResult<Vec<Delta>> {
        // Phase 1
        let (operations, initial) = {
            let mut state = self.inner.lock();
            let is_top = state.stack.last() == Some(&id);
            let tx = state.active_mut(id)?;
            if !is_top {
                return Err(TransactionError::NotTopOfStack(id));
            }
            match replay_pending(tx) {
                Ok((snapshot, operations)) => {
                    tx.working_snapshot = snapshot;
                    tx.operations = operations;
                }
                Err(reason) => {
                    tx.state = TransactionState::Failed;
                    tx.last_error = Some(reason.clone());
                    Counters::bump(&self.counters.failed);
                    tracing::warn!(transaction = %id, %reason, "commit validation failed");
                    return Err(TransactionError::ValidationFailed { id, reason });
                }
            }
            tx.state = TransactionState::Committing;
            (tx.operations.clone(), tx.initial_snapshot.clone())
        };

        // Phase 2
        let mut undo = UndoLog::new();
        let mut generated = Vec::with_capacity(operations.len());
        let written = operations.iter().try_for_each(|op| {
            let delta = self.write_operation(id, op, &mut undo)?;
            if delta.is_valid() {
                generated.push(delta);
            }
            Ok::<_, ArmoryError>(())
        });

        if let Err(source) = written {
            return Err(self.fail_commit(id, source, &undo, &initial));
        }

        // Phase 3
        let deltas = match explicit {
            Some(mut deltas) => {
                for delta in &mut deltas {
                    delta.source_transaction.get_or_insert(id);
                }
                deltas
            }
            None if self.config.generate_deltas => generated,
            None => Vec::new(),
        };
        {
            let mut state = self.inner.lock();
            if let Some(tx) = state.transactions.get_mut(&id) {
                tx.state = TransactionState::Committed;
                tx.deltas.clone_from(&deltas);
            }
            let parent = state.transactions.get(&id).and_then(|tx| tx.parent);
            if let Some(parent) = parent.and_then(|p| state.transactions.get_mut(&p)) {
                parent.committed_children.push(id);
                for op in &operations {
                    if let Err(err) = parent.working_snapshot.apply_operation(op) {
                        tracing::warn!(transaction = %parent.id, child = %id, %err, "child operation does not fold into parent view");
                    }
                }
            }
            state.retire(id, self.config.max_history);
        }

        Counters::bump(&self.counters.committed);
        Counters::add(&self.counters.operations_processed, operations.len());
        Counters::add(&self.counters.deltas_generated, deltas.len());
        tracing::info!(transaction = %id, operations = operations.len(), deltas = deltas.len(), "transaction committed");

        self.deltas.publish(&deltas);
        Ok(deltas)
    }

    fn fail_commit(
        &self,
        id: TransactionId,
        source: ArmoryError,
        undo: &UndoLog,
        initial: &EquipmentStateSnapshot,
    ) -> TransactionError {
        tracing::warn!(transaction = %id, err = %source, writes = undo.len(), "store write failed, undoing");
        let mut consistent = self.undo_writes(undo).is_ok();
        if !consistent && self.config.auto_recovery {
            match self.store.restore_snapshot(initial) {
                Ok(()) => consistent = true,
                Err(err) => tracing::warn!(transaction = %id, %err, "initial snapshot restore failed"),
            }
        }

        let mut state = self.inner.lock();
        if let Some(tx) = state.transactions.get_mut(&id) {
            tx.state = TransactionState::Failed;
            tx.store_touched |= !undo.is_empty();
            tx.last_error = Some(if consistent {
                source.to_string()
            } else {
                format!("{source} (store left inconsistent)")
            });
        }
        Counters::bump(&self.counters.failed);
        TransactionError::ApplyFailed { id, source }
    }

    fn write_operation(
        &self,
        id: TransactionId,
        op: &TransactionOperation,
        undo: &mut UndoLog,
    ) -> ArmoryResult<Delta> {
        let store = self.store.as_ref();
        let kind = op.operation_type;
        let primary = op.slot_index.ok_or_else(|| malformed(op, "missing slot index"))?;
        let before = store.get_slot_item(primary);

        let mut delta = match kind {
            OperationType::Equip | OperationType::Repair | OperationType::Upgrade | OperationType::Modify => {
                let item = op.item_after.clone().ok_or_else(|| malformed(op, "missing item"))?;
                write_logged(store, undo, primary, before.clone(), Some(item.clone()))?;
                Delta::new(kind, Some(primary), before, Some(item))
            }
            OperationType::Unequip => {
                write_logged(store, undo, primary, before.clone(), None)?;
                Delta::new(kind, Some(primary), before, None)
            }
            OperationType::Swap | OperationType::Move => {
                let secondary = op
                    .secondary_slot_index
                    .ok_or_else(|| malformed(op, "missing secondary slot index"))?;
                let other = store.get_slot_item(secondary);
                let (new_primary, new_secondary) = if kind == OperationType::Swap {
                    (other.clone(), before.clone())
                } else if before.is_none() {
                    return Err(ArmoryError::SlotEmpty(primary));
                } else if other.is_some() {
                    return Err(ArmoryError::SlotOccupied(secondary));
                } else {
                    (None, before.clone())
                };
                write_logged(store, undo, secondary, other.clone(), new_secondary.clone())?;
                write_logged(store, undo, primary, before.clone(), new_primary.clone())?;

                let mut delta = Delta::new(kind, Some(primary), before, new_primary);
                delta.metadata.insert("SecondarySlot".into(), secondary.to_string());
                delta.metadata.insert("SecondaryItemBefore".into(), describe(other.as_ref()));
                delta.metadata.insert("SecondaryItemAfter".into(), describe(new_secondary.as_ref()));
                delta
            }
            OperationType::Split | OperationType::Merge => {
                return Err(ArmoryError::UnsupportedOperation(kind));
            }
        };

        delta.source_transaction = Some(id);
        delta.operation_id = Some(op.operation_id);
        delta.metadata.extend(op.metadata.clone());
        if let Some(source) = &op.source {
            delta.metadata.insert("Source".into(), source.clone());
        }
        Ok(delta)
    }

    fn undo_writes(&self, undo: &UndoLog) -> ArmoryResult<()> {
        for (index, previous) in undo.iter().rev() {
            write_slot(self.store.as_ref(), *index, previous.clone(), false)?;
        }
        Ok(())
    }

    /// Rolls back a transaction and every active transaction nested in it.
    ///
    /// The store is restored from the initial snapshot only if a child
    /// committed into it or a failed commit touched it.
    ///
    /// # Errors
    ///
    /// - `InvalidState` for committed, rolled back or committing transactions
    /// - `ApplyFailed` if the store refuses the restore (the transaction stays Failed)
    pub fn rollback(&self, id: TransactionId) -> TransactionResult<Vec<Delta>> {
        let descendants = {
            let state = self.inner.lock();
            let tx = state.lookup(id)?;
            if !matches!(tx.state, TransactionState::Active | TransactionState::Failed) {
                return Err(TransactionError::InvalidState { id, state: tx.state });
            }
            state.descendants(id)
        };

        for child in descendants {
            match self.rollback_single(child) {
                Ok(_) | Err(TransactionError::NotFound(_) | TransactionError::InvalidState { .. }) => {}
                Err(err) => tracing::warn!(transaction = %child, %err, "nested rollback failed"),
            }
        }
        self.rollback_single(id)
    }

    pub(crate) fn rollback_single(&self, id: TransactionId) -> TransactionResult<Vec<Delta>> {
        let (initial, needs_restore) = {
            let mut state = self.inner.lock();
            let tx = state.lookup_mut(id)?;
            if !matches!(tx.state, TransactionState::Active | TransactionState::Failed) {
                return Err(TransactionError::InvalidState { id, state: tx.state });
            }
            tx.state = TransactionState::RollingBack;
            (
                tx.initial_snapshot.clone(),
                !tx.committed_children.is_empty() || tx.store_touched,
            )
        };

        let mut deltas = Vec::new();
        if needs_restore {
            let before = self.store.create_snapshot();
            if let Err(source) = self.store.restore_snapshot(&initial) {
                let mut state = self.inner.lock();
                if let Some(tx) = state.transactions.get_mut(&id) {
                    tx.state = TransactionState::Failed;
                    tx.last_error = Some(source.to_string());
                }
                tracing::warn!(transaction = %id, err = %source, "rollback restore failed");
                return Err(TransactionError::ApplyFailed { id, source });
            }
            if self.config.generate_deltas {
                deltas = revert_deltas(id, &before, &self.store.create_snapshot());
            }
        }

        {
            let mut state = self.inner.lock();
            if let Some(tx) = state.transactions.get_mut(&id) {
                tx.state = TransactionState::RolledBack;
                tx.savepoints.clear();
                tx.deltas.clone_from(&deltas);
            }
            state.retire(id, self.config.max_history);
        }

        Counters::bump(&self.counters.rolled_back);
        Counters::add(&self.counters.deltas_generated, deltas.len());
        tracing::info!(transaction = %id, restored = needs_restore, "transaction rolled back");

        self.deltas.publish(&deltas);
        Ok(deltas)
    }

    /// Commits every open transaction, innermost first.
    ///
    /// Returns the number committed.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first failure.
    pub fn commit_all(&self) -> TransactionResult<usize> {
        let ids: Vec<_> = self.inner.lock().stack.iter().rev().copied().collect();
        let mut committed = 0;
        for id in ids {
            self.commit(id)?;
            committed += 1;
        }
        Ok(committed)
    }

    /// Rolls back every open transaction, innermost first.
    ///
    /// Anything that refuses to roll back is removed by force. Returns the
    /// number rolled back cleanly.
    pub fn rollback_all(&self) -> usize {
        let ids: Vec<_> = self.inner.lock().stack.iter().rev().copied().collect();
        let mut rolled_back = 0;
        for id in ids {
            match self.rollback_single(id) {
                Ok(_) => rolled_back += 1,
                Err(TransactionError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(transaction = %id, %err, "rollback refused, forcing cleanup");
                    self.force_clean(id, &err.to_string());
                }
            }
        }
        rolled_back
    }

    fn force_clean(&self, id: TransactionId, reason: &str) {
        let mut state = self.inner.lock();
        if let Some(tx) = state.transactions.get_mut(&id) {
            tx.state = TransactionState::Failed;
            tx.last_error = Some(format!("force cleaned: {reason}"));
        }
        state.retire(id, self.config.max_history);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Copy of a live or archived transaction.
    #[must_use]
    pub fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        let state = self.inner.lock();
        state
            .transactions
            .get(&id)
            .or_else(|| state.history.iter().rev().find(|tx| tx.id == id))
            .cloned()
    }

    /// State of a live or archived transaction.
    #[must_use]
    pub fn transaction_state(&self, id: TransactionId) -> Option<TransactionState> {
        let state = self.inner.lock();
        state
            .transactions
            .get(&id)
            .or_else(|| state.history.iter().rev().find(|tx| tx.id == id))
            .map(|tx| tx.state)
    }

    /// Finished transactions, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Transaction> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Innermost open transaction.
    #[must_use]
    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.inner.lock().stack.last().copied()
    }

    /// Open transactions, outermost first.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.inner.lock().stack.clone()
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.lock().stack.len()
    }

    /// Working snapshot of an open transaction.
    ///
    /// # Errors
    ///
    /// `NotFound` / `InvalidState` if the transaction is not open.
    pub fn working_snapshot(&self, id: TransactionId) -> TransactionResult<EquipmentStateSnapshot> {
        let state = self.inner.lock();
        Ok(state.lookup(id)?.working_snapshot.clone())
    }

    /// Registers a delta callback.
    pub fn add_observer(&self, observer: Arc<dyn DeltaObserver>) {
        self.deltas.add_observer(observer);
    }

    /// Opens a channel receiving every published delta batch.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<Arc<[Delta]>> {
        self.deltas.subscribe()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn statistics(&self) -> TransactionStatistics {
        let state = self.inner.lock();
        self.counters
            .snapshot(state.transactions.len(), state.stack.len(), state.history.len())
    }

    /// Zeroes every counter.
    pub fn reset_statistics(&self) {
        self.counters.reset();
    }

    /// Human readable dump of the stack, for diagnostics.
    #[must_use]
    pub fn dump_state(&self) -> String {
        let state = self.inner.lock();
        let mut out = format!(
            "transactions: {} open, depth {}, {} archived\n",
            state.transactions.len(),
            state.stack.len(),
            state.history.len()
        );
        for (depth, id) in state.stack.iter().enumerate() {
            if let Some(tx) = state.transactions.get(id) {
                let _ = writeln!(
                    out,
                    "{:indent$}[{depth}] {id} {} \"{}\" ops={} savepoints={} children={} age={:?}",
                    "",
                    tx.state,
                    tx.description,
                    tx.operations.len(),
                    tx.savepoints.len(),
                    tx.committed_children.len(),
                    tx.age(),
                    indent = depth * 2,
                );
                if let Some(err) = &tx.last_error {
                    let _ = writeln!(out, "{:indent$}  last error: {err}", "", indent = depth * 2);
                }
            }
        }
        out
    }
}

impl fmt::Debug for TransactionProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TransactionProcessor")
            .field("config", &self.config)
            .field("depth", &state.stack.len())
            .field("open", &state.transactions.len())
            .field("history", &state.history.len())
            .field("deltas", &self.deltas)
            .finish_non_exhaustive()
    }
}

fn write_logged(
    store: &dyn SlotStore,
    undo: &mut UndoLog,
    index: usize,
    previous: Option<ItemInstance>,
    item: Option<ItemInstance>,
) -> ArmoryResult<()> {
    undo.push((index, previous));
    write_slot(store, index, item, false)
}

fn describe(item: Option<&ItemInstance>) -> String {
    item.map_or_else(|| "None".to_string(), |item| item.item_id.as_str().to_string())
}

/// Deltas describing how a restore moved the store from `before` to `after`.
fn revert_deltas(
    id: TransactionId,
    before: &EquipmentStateSnapshot,
    after: &EquipmentStateSnapshot,
) -> Vec<Delta> {
    before
        .slots
        .iter()
        .zip(&after.slots)
        .filter(|(was, now)| was.item != now.item)
        .map(|(was, now)| {
            let change_type = match (&was.item, &now.item) {
                (None, Some(_)) => OperationType::Equip,
                (Some(_), None) => OperationType::Unequip,
                _ => OperationType::Modify,
            };
            let mut delta = Delta::new(change_type, Some(now.index), was.item.clone(), now.item.clone());
            delta.reason = REASON_ROLLBACK.to_string();
            delta.source_transaction = Some(id);
            delta
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use armory_core::{InMemorySlotStore, SlotConfig, SlotType};

    fn store() -> Arc<InMemorySlotStore> {
        Arc::new(InMemorySlotStore::new(vec![
            SlotConfig::new(0, SlotType::PrimaryWeapon, "Equipment.Slot.Hand.Main"),
            SlotConfig::new(1, SlotType::OffHand, "Equipment.Slot.Hand.Off"),
            SlotConfig::new(2, SlotType::Headwear, "Equipment.Slot.Head"),
        ]))
    }

    fn processor(store: &Arc<InMemorySlotStore>) -> TransactionProcessor {
        TransactionProcessor::new(TransactionConfig::default(), store.clone())
    }

    #[test]
    fn test_commit_writes_store_and_generates_deltas() {
        let store = store();
        let processor = processor(&store);
        let rx = processor.subscribe();

        let tx = processor.begin("equip sword").unwrap();
        processor
            .register_operation(tx, TransactionOperation::equip(0, ItemInstance::new("Sword")))
            .unwrap();
        assert!(store.get_slot_item(0).is_none());

        let deltas = processor.commit(tx).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].slot_index, Some(0));
        assert_eq!(deltas[0].source_transaction, Some(tx));
        assert_eq!(store.get_slot_item(0).map(|i| i.item_id.as_str().to_string()), Some("Sword".into()));

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(processor.transaction_state(tx), Some(TransactionState::Committed));
        assert_eq!(processor.depth(), 0);
    }

    #[test]
    fn test_apply_operation_only_touches_working_snapshot() {
        let store = store();
        let processor = processor(&store);
        let tx = processor.begin("preview").unwrap();

        let op = TransactionOperation::equip(2, ItemInstance::new("Helmet"));
        let op_id = processor.register_operation(tx, op.clone()).unwrap();
        processor.apply_operation(tx, op.clone()).unwrap();
        assert_eq!(
            processor.apply_operation(tx, op),
            Err(TransactionError::AlreadyExecuted(op_id))
        );

        let working = processor.working_snapshot(tx).unwrap();
        assert!(working.item_at(2).is_some());
        assert!(store.get_slot_item(2).is_none());
    }

    #[test]
    fn test_split_and_bad_slots_are_rejected() {
        let store = store();
        let processor = processor(&store);
        let tx = processor.begin("bad").unwrap();

        let mut split = TransactionOperation::new(OperationType::Split);
        split.slot_index = Some(0);
        assert!(matches!(
            processor.register_operation(tx, split),
            Err(TransactionError::OperationRejected(_))
        ));
        assert!(matches!(
            processor.register_operation(tx, TransactionOperation::unequip(9)),
            Err(TransactionError::Store(ArmoryError::InvalidSlot { index: 9, .. }))
        ));
    }

    #[test]
    fn test_failed_validation_marks_failed() {
        let store = store();
        let processor = processor(&store);
        let tx = processor.begin("move from empty").unwrap();
        processor
            .register_operation(tx, TransactionOperation::move_item(0, 1))
            .unwrap();

        assert!(!processor.validate(tx));
        assert!(matches!(
            processor.commit(tx),
            Err(TransactionError::ValidationFailed { .. })
        ));
        assert_eq!(processor.transaction_state(tx), Some(TransactionState::Failed));

        processor.rollback(tx).unwrap();
        assert_eq!(processor.transaction_state(tx), Some(TransactionState::RolledBack));
        assert_eq!(processor.statistics().failed, 1);
    }

    #[test]
    fn test_only_innermost_commits() {
        let store = store();
        let processor = processor(&store);
        let outer = processor.begin("outer").unwrap();
        let inner = processor.begin_nested("inner").unwrap();

        assert_eq!(processor.commit(outer), Err(TransactionError::NotTopOfStack(outer)));
        processor.commit(inner).unwrap();
        processor.commit(outer).unwrap();
        assert_eq!(processor.depth(), 0);
    }

    #[test]
    fn test_rollback_unwinds_open_children_innermost_first() {
        let store = store();
        let processor = processor(&store);
        let outer = processor.begin("outer").unwrap();
        let middle = processor.begin_nested("middle").unwrap();
        let inner = processor.begin_nested("inner").unwrap();

        assert_eq!(processor.inner.lock().descendants(outer), vec![inner, middle]);
        assert_eq!(processor.inner.lock().descendants(inner), Vec::<TransactionId>::new());

        processor
            .apply_operation(inner, TransactionOperation::equip(2, ItemInstance::new("Helm")))
            .unwrap();
        processor.rollback(outer).unwrap();
        assert_eq!(processor.depth(), 0);
        assert!(store.get_slot_item(2).is_none());
    }

    #[test]
    fn test_begin_nested_without_parent() {
        let store = store();
        let processor = processor(&store);
        assert_eq!(processor.begin_nested("orphan"), Err(TransactionError::NoActiveParent));
    }

    #[test]
    fn test_depth_limit() {
        let store = store();
        let processor = TransactionProcessor::new(
            TransactionConfig {
                max_nested_depth: 2,
                ..TransactionConfig::default()
            },
            store,
        );
        processor.begin("a").unwrap();
        processor.begin("b").unwrap();
        assert_eq!(processor.begin("c"), Err(TransactionError::MaxDepthExceeded { max: 2 }));
    }

    #[test]
    fn test_rollback_of_committed_child_restores_parent_initial() {
        let store = store();
        let processor = processor(&store);
        let parent = processor.begin("parent").unwrap();
        let child = processor.begin_nested("child").unwrap();
        processor
            .register_operation(child, TransactionOperation::equip(1, ItemInstance::new("Shield")))
            .unwrap();
        processor.commit(child).unwrap();
        assert!(store.get_slot_item(1).is_some());
        assert!(processor.working_snapshot(parent).unwrap().item_at(1).is_some());

        let reverts = processor.rollback(parent).unwrap();
        assert!(store.get_slot_item(1).is_none());
        assert_eq!(reverts.len(), 1);
        assert_eq!(reverts[0].reason, REASON_ROLLBACK);
        assert_eq!(reverts[0].change_type, OperationType::Unequip);
    }

    #[test]
    fn test_rollback_rejects_committed() {
        let store = store();
        let processor = processor(&store);
        let tx = processor.begin("done").unwrap();
        processor.commit(tx).unwrap();
        assert_eq!(
            processor.rollback(tx),
            Err(TransactionError::InvalidState {
                id: tx,
                state: TransactionState::Committed
            })
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let store = store();
        let processor = TransactionProcessor::new(
            TransactionConfig {
                max_history: 2,
                ..TransactionConfig::default()
            },
            store,
        );
        for _ in 0..5 {
            let tx = processor.begin("noop").unwrap();
            processor.commit(tx).unwrap();
        }
        assert_eq!(processor.history().len(), 2);
        assert_eq!(processor.statistics().committed, 5);
    }

    #[test]
    fn test_swap_delta_carries_secondary_slot() {
        let store = store();
        store.set_slot_item(0, ItemInstance::new("Sword"), false).unwrap();
        store.set_slot_item(1, ItemInstance::new("Dagger"), false).unwrap();
        let processor = processor(&store);

        let tx = processor.begin("swap").unwrap();
        processor.register_operation(tx, TransactionOperation::swap(0, 1)).unwrap();
        let deltas = processor.commit(tx).unwrap();

        assert_eq!(deltas[0].metadata.get("SecondarySlot").map(String::as_str), Some("1"));
        assert_eq!(deltas[0].metadata.get("SecondaryItemAfter").map(String::as_str), Some("Sword"));
        assert_eq!(store.get_slot_item(0).unwrap().item_id.as_str(), "Dagger");
    }

    #[test]
    fn test_dump_state_lists_stack() {
        let store = store();
        let processor = processor(&store);
        processor.begin("outer").unwrap();
        processor.begin_nested("inner").unwrap();
        let dump = processor.dump_state();
        assert!(dump.contains("depth 2"));
        assert!(dump.contains("\"inner\""));
    }
}
