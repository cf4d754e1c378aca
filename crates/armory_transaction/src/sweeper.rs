//! # Timeout Sweeper
//!
//! Background thread that periodically rolls back expired transactions.
//!
//! ```text
//!   ┌─────────── sweeper thread ───────────┐
//!   │ wait_for(interval) or wake on stop   │
//!   │ upgrade Weak<processor> ── gone? exit│
//!   │ cleanup_expired_transactions()       │
//!   └──────────────────────────────────────┘
//! ```
//!
//! The thread holds only a weak reference, so dropping the last processor
//! handle also ends the sweeper.

use crate::processor::TransactionProcessor;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct SweepSignal {
    stop: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl SweepSignal {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    fn signal(&self) {
        let _guard = self.mutex.lock();
        self.stop.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    /// Sleeps up to `interval`. Returns true if stop was requested.
    fn wait(&self, interval: Duration) -> bool {
        let mut guard = self.mutex.lock();
        if !self.stop.load(Ordering::Acquire) {
            self.condvar.wait_for(&mut guard, interval);
        }
        self.stop.load(Ordering::Acquire)
    }
}

/// Handle to the background sweeper.
///
/// Stops and joins the thread on drop.
pub struct TransactionSweeper {
    signal: Arc<SweepSignal>,
    sweeps: Arc<AtomicU64>,
    cleaned: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl TransactionSweeper {
    /// Starts a sweeper using the processor's configured interval.
    #[must_use]
    pub fn spawn(processor: &Arc<TransactionProcessor>) -> Self {
        let interval = processor.config().cleanup_interval();
        Self::with_interval(processor, interval)
    }

    /// Starts a sweeper with an explicit interval.
    #[must_use]
    pub fn with_interval(processor: &Arc<TransactionProcessor>, interval: Duration) -> Self {
        let signal = Arc::new(SweepSignal::new());
        let sweeps = Arc::new(AtomicU64::new(0));
        let cleaned = Arc::new(AtomicU64::new(0));

        let weak = Arc::downgrade(processor);
        let thread_signal = Arc::clone(&signal);
        let thread_sweeps = Arc::clone(&sweeps);
        let thread_cleaned = Arc::clone(&cleaned);
        let handle = thread::spawn(move || {
            Self::sweep_loop(&weak, &thread_signal, &thread_sweeps, &thread_cleaned, interval);
        });

        tracing::debug!(interval_ms = interval.as_millis(), "transaction sweeper started");
        Self {
            signal,
            sweeps,
            cleaned,
            handle: Some(handle),
        }
    }

    fn sweep_loop(
        processor: &Weak<TransactionProcessor>,
        signal: &SweepSignal,
        sweeps: &AtomicU64,
        cleaned: &AtomicU64,
        interval: Duration,
    ) {
        while !signal.wait(interval) {
            let Some(processor) = processor.upgrade() else {
                break;
            };
            let expired = processor.cleanup_expired_transactions();
            sweeps.fetch_add(1, Ordering::Relaxed);
            if expired > 0 {
                cleaned.fetch_add(expired as u64, Ordering::Relaxed);
                tracing::info!(expired, "sweeper rolled back expired transactions");
            }
        }
        tracing::debug!("transaction sweeper stopped");
    }

    /// Completed sweep passes.
    #[must_use]
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Transactions rolled back by this sweeper.
    #[must_use]
    pub fn cleaned(&self) -> u64 {
        self.cleaned.load(Ordering::Relaxed)
    }

    /// Returns true while the thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the thread and waits for it.
    pub fn stop(&mut self) {
        self.signal.signal();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("transaction sweeper panicked");
            }
        }
    }
}

impl Drop for TransactionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TransactionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSweeper")
            .field("sweeps", &self.sweeps())
            .field("cleaned", &self.cleaned())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactionConfig;
    use armory_core::{InMemorySlotStore, SlotConfig, SlotType};
    use std::time::Instant;

    fn processor(timeout_secs: u64) -> Arc<TransactionProcessor> {
        let store = Arc::new(InMemorySlotStore::new(vec![SlotConfig::new(
            0,
            SlotType::Headwear,
            "Equipment.Slot.Head",
        )]));
        Arc::new(TransactionProcessor::new(
            TransactionConfig {
                timeout_secs,
                ..TransactionConfig::default()
            },
            store,
        ))
    }

    #[test]
    fn test_sweeper_rolls_back_expired() {
        let processor = processor(0);
        processor.begin("abandoned").unwrap();

        let mut sweeper = TransactionSweeper::with_interval(&processor, Duration::from_millis(5));
        let deadline = Instant::now() + Duration::from_secs(5);
        while processor.depth() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        sweeper.stop();

        assert_eq!(processor.depth(), 0);
        assert_eq!(sweeper.cleaned(), 1);
        assert!(sweeper.sweeps() >= 1);
        assert!(!sweeper.is_running());
    }

    #[test]
    fn test_stop_wakes_long_interval() {
        let processor = processor(30);
        let mut sweeper = TransactionSweeper::with_interval(&processor, Duration::from_secs(3600));
        let started = Instant::now();
        sweeper.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sweeper.sweeps(), 0);
    }

    #[test]
    fn test_sweeper_exits_when_processor_dropped() {
        let processor = processor(30);
        let sweeper = TransactionSweeper::with_interval(&processor, Duration::from_millis(5));
        drop(processor);
        let deadline = Instant::now() + Duration::from_secs(5);
        while sweeper.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!sweeper.is_running());
    }
}
