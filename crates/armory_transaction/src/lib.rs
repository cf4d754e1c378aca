//! # ARMORY Transaction
//!
//! All-or-nothing equipment mutations.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                   TransactionProcessor                     │
//! │  stack: [outer] ─> [nested] ─> [innermost]                 │
//! │     each: initial snapshot, working snapshot, operations   │
//! └───────────────┬───────────────────────────────┬────────────┘
//!                 │ commit (no lock held)          │ after unlock
//!                 ▼                                ▼
//!          Arc<dyn SlotStore>                  DeltaBus
//!                                         observers / channels
//! ```
//!
//! ## Features
//!
//! - Nested transactions up to a configurable depth
//! - Savepoints inside the innermost transaction
//! - Undo-logged commits with full rollback on store failure
//! - Conflict detection with abort, retry and force strategies
//! - Recovery, integrity reports and a timeout sweeper
//!
//! ## Example
//!
//! ```rust,ignore
//! use armory_transaction::{TransactionConfig, TransactionProcessor};
//! use armory_core::{ItemInstance, TransactionOperation};
//!
//! let processor = TransactionProcessor::new(TransactionConfig::default(), store);
//! let tx = processor.begin("equip helmet")?;
//! processor.register_operation(tx, TransactionOperation::equip(2, ItemInstance::new("Helmet")))?;
//! let deltas = processor.commit(tx)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod cancel;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod processor;
pub mod record;
pub mod recovery;
pub mod savepoint;
pub mod stats;
pub mod sweeper;

pub use cancel::CancelToken;
pub use config::{TransactionConfig, MAX_NESTED_DEPTH_LIMIT};
pub use conflicts::{ConflictStrategy, ResolutionOutcome};
pub use error::{TransactionError, TransactionResult};
pub use processor::TransactionProcessor;
pub use record::{Savepoint, SavepointId, Transaction, TransactionState};
pub use recovery::IntegrityReport;
pub use stats::TransactionStatistics;
pub use sweeper::TransactionSweeper;
