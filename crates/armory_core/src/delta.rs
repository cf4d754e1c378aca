//! # Deltas
//!
//! One record per committed change, fanned out to observers after every
//! internal lock has been released.
//!
//! ```text
//!   commit ──> [deltas] ──> DeltaBus::publish ──┬──> observer callbacks
//!                                                └──> crossbeam subscribers
//! ```

use crate::item::ItemInstance;
use crate::operation::{OperationId, OperationType};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// Default delta reason for committed operations.
pub const REASON_TRANSACTION: &str = "Transaction";
/// Delta reason for rollback reverts.
pub const REASON_ROLLBACK: &str = "Rollback";

/// Identifier of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A committed change to equipped-item state.
#[derive(Clone, Debug, PartialEq)]
pub struct Delta {
    /// What kind of change.
    pub change_type: OperationType,
    /// Slot affected, `None` for global changes.
    pub slot_index: Option<usize>,
    /// Content before.
    pub item_before: Option<ItemInstance>,
    /// Content after.
    pub item_after: Option<ItemInstance>,
    /// Why the change happened.
    pub reason: String,
    /// Transaction that produced it.
    pub source_transaction: Option<TransactionId>,
    /// Operation that produced it.
    pub operation_id: Option<OperationId>,
    /// Creation time.
    pub timestamp: SystemTime,
    /// Extra data.
    pub metadata: BTreeMap<String, String>,
}

impl Delta {
    /// Creates a delta for one slot.
    #[must_use]
    pub fn new(
        change_type: OperationType,
        slot_index: Option<usize>,
        item_before: Option<ItemInstance>,
        item_after: Option<ItemInstance>,
    ) -> Self {
        Self {
            change_type,
            slot_index,
            item_before,
            item_after,
            reason: REASON_TRANSACTION.to_string(),
            source_transaction: None,
            operation_id: None,
            timestamp: SystemTime::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// A delta is worth publishing iff something changed or it is global.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.slot_index.is_none() || self.item_before != self.item_after
    }

    /// Same change, backwards.
    #[must_use]
    pub fn reverted(&self, reason: &str) -> Self {
        let mut delta = self.clone();
        std::mem::swap(&mut delta.item_before, &mut delta.item_after);
        delta.reason = reason.to_string();
        delta.timestamp = SystemTime::now();
        delta
    }
}

/// Receives published deltas.
///
/// Called with no engine lock held. Implementations must not block for long.
pub trait DeltaObserver: Send + Sync {
    /// Handles one batch of deltas from a single transaction.
    fn on_deltas(&self, deltas: &[Delta]);
}

/// Fan-out point for deltas.
#[derive(Default)]
pub struct DeltaBus {
    observers: RwLock<Vec<Arc<dyn DeltaObserver>>>,
    subscribers: RwLock<Vec<Sender<Arc<[Delta]>>>>,
}

impl DeltaBus {
    /// Creates a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback observer.
    pub fn add_observer(&self, observer: Arc<dyn DeltaObserver>) {
        self.observers.write().push(observer);
    }

    /// Opens an unbounded channel receiving every published batch.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<Arc<[Delta]>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.write().push(tx);
        rx
    }

    /// Number of registered observers and live subscribers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.observers.read().len() + self.subscribers.read().len()
    }

    /// Publishes a batch. Empty batches are dropped.
    ///
    /// Listener lists are copied out first, so no bus lock is held while
    /// observers run. Disconnected subscribers are pruned.
    pub fn publish(&self, deltas: &[Delta]) {
        if deltas.is_empty() {
            return;
        }
        let observers: Vec<_> = self.observers.read().clone();
        let subscribers: Vec<_> = self.subscribers.read().clone();

        for observer in &observers {
            observer.on_deltas(deltas);
        }

        if subscribers.is_empty() {
            return;
        }
        let batch: Arc<[Delta]> = Arc::from(deltas.to_vec());
        let dead: Vec<_> = subscribers
            .into_iter()
            .filter(|tx| tx.send(Arc::clone(&batch)).is_err())
            .collect();
        if !dead.is_empty() {
            self.subscribers
                .write()
                .retain(|tx| !dead.iter().any(|d| d.same_channel(tx)));
        }
    }
}

impl fmt::Debug for DeltaBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaBus")
            .field("observers", &self.observers.read().len())
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
