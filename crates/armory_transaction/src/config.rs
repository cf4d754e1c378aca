//! # Transaction Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling on nesting regardless of configuration.
pub const MAX_NESTED_DEPTH_LIMIT: usize = 10;

/// Transaction processor configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Seconds before an active transaction is considered expired.
    pub timeout_secs: u64,
    /// Maximum open transactions on the stack. Clamped to `1..=10`.
    pub max_nested_depth: usize,
    /// Finished transactions kept for inspection.
    pub max_history: usize,
    /// Restore the initial snapshot when an undo log cannot be replayed.
    pub auto_recovery: bool,
    /// Build deltas from committed operations.
    pub generate_deltas: bool,
    /// Sweeper period in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_nested_depth: 5,
            max_history: 100,
            auto_recovery: true,
            generate_deltas: true,
            cleanup_interval_secs: 60,
        }
    }
}

impl TransactionConfig {
    /// Server preset: shorter timeouts, deeper history.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            timeout_secs: 10,
            max_nested_depth: 5,
            max_history: 1_000,
            auto_recovery: true,
            generate_deltas: true,
            cleanup_interval_secs: 15,
        }
    }

    /// Nesting limit actually enforced.
    #[must_use]
    pub fn effective_max_depth(&self) -> usize {
        self.max_nested_depth.clamp(1, MAX_NESTED_DEPTH_LIMIT)
    }

    /// Timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Sweeper period as a duration, never zero.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}
