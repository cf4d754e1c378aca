//! # Transaction Errors
//!
//! Every way a transaction call can be refused. Store failures are wrapped,
//! never swallowed.

use crate::record::{SavepointId, TransactionState};
use armory_core::{ArmoryError, OperationId, TransactionId};
use thiserror::Error;

/// Errors raised by the transaction processor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// The transaction could not be started.
    #[error("failed to begin transaction: {0}")]
    BeginFailed(String),

    /// Opening another level would exceed the nesting limit.
    #[error("maximum nesting depth {max} exceeded")]
    MaxDepthExceeded {
        /// Configured limit.
        max: usize,
    },

    /// Unknown transaction id.
    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    /// The transaction is not in a state that allows the call.
    #[error("transaction {id} is {state}")]
    InvalidState {
        /// Transaction id.
        id: TransactionId,
        /// State it is in.
        state: TransactionState,
    },

    /// Only the innermost transaction may commit.
    #[error("transaction {0} is not the innermost active transaction")]
    NotTopOfStack(TransactionId),

    /// `begin_nested` was called with nothing to nest under.
    #[error("no active parent transaction")]
    NoActiveParent,

    /// The call needs an open transaction and the stack is empty.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Pending operations do not replay cleanly on the working snapshot.
    #[error("transaction {id} failed validation: {reason}")]
    ValidationFailed {
        /// Transaction id.
        id: TransactionId,
        /// First problem found.
        reason: String,
    },

    /// The store rejected a write during commit.
    #[error("transaction {id} failed to apply: {source}")]
    ApplyFailed {
        /// Transaction id.
        id: TransactionId,
        /// Underlying store error.
        source: ArmoryError,
    },

    /// Conflicting operations were found and the strategy was to abort.
    #[error("transaction {id} has {count} conflicting operation(s)")]
    ConflictDetected {
        /// Transaction id.
        id: TransactionId,
        /// Number of conflicting operations.
        count: usize,
    },

    /// Unknown savepoint id.
    #[error("savepoint {0} not found")]
    SavepointNotFound(SavepointId),

    /// A nested transaction committed to the store after the savepoint was
    /// taken, so rolling back to it cannot be done on the working snapshot alone.
    #[error("savepoint {savepoint} predates {children} committed child transaction(s)")]
    SavepointCrossesCommit {
        /// Savepoint requested.
        savepoint: SavepointId,
        /// Children committed since the savepoint.
        children: usize,
    },

    /// A cancellation token fired mid-batch.
    #[error("transaction {0} was cancelled")]
    Cancelled(TransactionId),

    /// The operation cannot be recorded.
    #[error("operation rejected: {0}")]
    OperationRejected(String),

    /// The operation was already applied to the working snapshot.
    #[error("operation {0} was already executed")]
    AlreadyExecuted(OperationId),

    /// Store error outside a commit.
    #[error("store error: {0}")]
    Store(#[from] ArmoryError),
}

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;
