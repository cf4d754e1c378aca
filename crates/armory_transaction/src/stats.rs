//! # Transaction Statistics
//!
//! Lock-free counters, read into a plain snapshot on demand.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of processor activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionStatistics {
    /// Transactions started.
    pub started: u64,
    /// Transactions committed.
    pub committed: u64,
    /// Transactions rolled back.
    pub rolled_back: u64,
    /// Commits that failed.
    pub failed: u64,
    /// Operations written to the store.
    pub operations_processed: u64,
    /// Conflicts resolved by `resolve_conflicts`.
    pub conflicts_resolved: u64,
    /// Deltas published.
    pub deltas_generated: u64,
    /// Transactions currently open.
    pub active: usize,
    /// Current nesting depth.
    pub stack_depth: usize,
    /// Finished transactions retained.
    pub history_len: usize,
}

impl TransactionStatistics {
    /// Fraction of finished transactions that committed.
    #[must_use]
    pub fn commit_rate(&self) -> f64 {
        let finished = self.committed + self.rolled_back + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.committed as f64 / finished as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub started: AtomicU64,
    pub committed: AtomicU64,
    pub rolled_back: AtomicU64,
    pub failed: AtomicU64,
    pub operations_processed: AtomicU64,
    pub conflicts_resolved: AtomicU64,
    pub deltas_generated: AtomicU64,
}

impl Counters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active: usize, stack_depth: usize, history_len: usize) -> TransactionStatistics {
        TransactionStatistics {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            operations_processed: self.operations_processed.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            deltas_generated: self.deltas_generated.load(Ordering::Relaxed),
            active,
            stack_depth,
            history_len,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.started,
            &self.committed,
            &self.rolled_back,
            &self.failed,
            &self.operations_processed,
            &self.conflicts_resolved,
            &self.deltas_generated,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
