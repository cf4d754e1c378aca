//! # Transaction Records
//!
//! The bookkeeping kept for every transaction from `begin` until it falls
//! out of history.

use armory_core::{Delta, EquipmentStateSnapshot, TransactionId, TransactionOperation};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle of a transaction.
///
/// ```text
///   Active ──> Committing ──> Committed
///     │            │
///     │            └──> Failed ──> RolledBack
///     └──> RollingBack ──> RolledBack
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Accepting operations.
    Active,
    /// Writing to the store.
    Committing,
    /// Finished successfully.
    Committed,
    /// Being undone.
    RollingBack,
    /// Undone.
    RolledBack,
    /// Validation or the store rejected the commit.
    Failed,
}

impl TransactionState {
    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Committing => "Committing",
            Self::Committed => "Committed",
            Self::RollingBack => "RollingBack",
            Self::RolledBack => "RolledBack",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of a savepoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SavepointId(Uuid);

impl SavepointId {
    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SavepointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named point inside a transaction that can be rolled back to.
#[derive(Clone, Debug)]
pub struct Savepoint {
    /// Savepoint id.
    pub id: SavepointId,
    /// Caller-supplied name.
    pub name: String,
    /// Working snapshot when the savepoint was taken.
    pub snapshot: EquipmentStateSnapshot,
    /// Number of operations recorded at that moment.
    pub operation_index: usize,
    /// Number of committed children at that moment.
    pub committed_children: usize,
}

/// One transaction.
#[derive(Clone, Debug)]
pub struct Transaction {
    /// Transaction id.
    pub id: TransactionId,
    /// Enclosing transaction, if nested.
    pub parent: Option<TransactionId>,
    /// Free-form description.
    pub description: String,
    /// Current state.
    pub state: TransactionState,
    /// Operations in registration order.
    pub operations: Vec<TransactionOperation>,
    /// Savepoints in creation order.
    pub savepoints: Vec<Savepoint>,
    /// Store state at `begin`. Rollback target.
    pub initial_snapshot: EquipmentStateSnapshot,
    /// Store state with this transaction's operations applied.
    pub working_snapshot: EquipmentStateSnapshot,
    /// When the transaction began.
    pub started_at: Instant,
    /// Children that committed into the store while this one was open.
    pub committed_children: Vec<TransactionId>,
    /// Deltas produced by the commit.
    pub deltas: Vec<Delta>,
    /// Conflicts were overridden with `Force`.
    pub forced: bool,
    /// A failed commit wrote to the store at some point.
    pub store_touched: bool,
    /// Last error message, for diagnostics.
    pub last_error: Option<String>,
}

impl Transaction {
    pub(crate) fn new(
        parent: Option<TransactionId>,
        description: String,
        snapshot: EquipmentStateSnapshot,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            parent,
            description,
            state: TransactionState::Active,
            operations: Vec::new(),
            savepoints: Vec::new(),
            working_snapshot: snapshot.clone(),
            initial_snapshot: snapshot,
            started_at: Instant::now(),
            committed_children: Vec::new(),
            deltas: Vec::new(),
            forced: false,
            store_touched: false,
            last_error: None,
        }
    }

    /// Returns true while operations can be added.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Time since `begin`.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Operations not yet applied to the working snapshot.
    pub fn pending_operations(&self) -> impl Iterator<Item = &TransactionOperation> {
        self.operations.iter().filter(|op| !op.executed)
    }

    /// Returns true if any operation touches `slot`.
    #[must_use]
    pub fn touches(&self, slot: usize) -> bool {
        self.operations.iter().any(|op| op.touches(slot))
    }
}
