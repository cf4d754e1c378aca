//! # Batch Validation
//!
//! ```text
//!   atomic || len <= threshold
//!       ──> sequential over an owned shadow clone
//!           (each operation sees the effects of the previous ones)
//!
//!   !atomic && len > threshold
//!       ──> independent checks on scoped worker threads
//!           + same-slot / duplicate-instance conflict pass
//! ```
//!
//! The caller's snapshot is never mutated.

use super::{SlotValidator, ValidationResult};
use crate::context::PlacementContext;
use armory_core::{
    ArmoryError, EquipmentStateSnapshot, OperationType, TransactionOperation, ValidationFailure,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

const RULE_BATCH: &str = "Validation.Rule.Batch";

/// Outcome of validating a batch of operations.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchValidationResult {
    /// True iff every operation is valid.
    pub all_valid: bool,
    /// One result per operation, in input order.
    pub results: Vec<ValidationResult>,
    /// Operations flagged as conflicting with another operation.
    pub conflicting: Vec<usize>,
    /// Human readable summary.
    pub summary: String,
    /// Whether the parallel path was taken.
    pub parallel: bool,
    /// Wall time spent.
    pub elapsed: Duration,
}

impl BatchValidationResult {
    /// Number of failed operations.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.valid).count()
    }
}

impl SlotValidator {
    /// Validates a batch of operations against `state` with no level information.
    #[must_use]
    pub fn validate_batch(
        &self,
        operations: &[TransactionOperation],
        state: &EquipmentStateSnapshot,
        atomic: bool,
    ) -> BatchValidationResult {
        self.validate_batch_for_level(operations, state, atomic, None)
    }

    /// Validates a batch of operations against `state`.
    ///
    /// Atomic batches stop at the first failure and report every later
    /// operation as skipped.
    #[must_use]
    pub fn validate_batch_for_level(
        &self,
        operations: &[TransactionOperation],
        state: &EquipmentStateSnapshot,
        atomic: bool,
        character_level: Option<u32>,
    ) -> BatchValidationResult {
        let start = Instant::now();
        self.counters.batches.fetch_add(1, Ordering::Relaxed);

        let parallel = !atomic && operations.len() > self.config.parallel_batch_threshold;
        let (results, conflicting) = if parallel {
            let mut results = self.validate_independent(operations, state, character_level);
            let conflicting = find_operation_conflicts(operations);
            for &index in &conflicting {
                results[index] = ValidationResult::failure(
                    ValidationFailure::ConflictingItem,
                    RULE_BATCH,
                    "Conflicts with another operation in the batch",
                )
                .with_context("OperationIndex", index);
            }
            (results, conflicting)
        } else {
            let shadow = state.clone();
            (
                self.validate_sequential(operations, shadow, atomic, character_level),
                Vec::new(),
            )
        };

        let failed = results.iter().filter(|r| !r.valid).count();
        let summary = if failed == 0 {
            format!("Validated {} operations successfully", operations.len())
        } else {
            format!("{failed} of {} operations failed validation", operations.len())
        };
        tracing::debug!(
            operations = operations.len(),
            failed,
            parallel,
            atomic,
            "batch validated"
        );

        BatchValidationResult {
            all_valid: failed == 0,
            results,
            conflicting,
            summary,
            parallel,
            elapsed: start.elapsed(),
        }
    }

    fn validate_sequential(
        &self,
        operations: &[TransactionOperation],
        mut shadow: EquipmentStateSnapshot,
        atomic: bool,
        character_level: Option<u32>,
    ) -> Vec<ValidationResult> {
        let mut results = Vec::with_capacity(operations.len());
        let mut halted = false;

        for (index, op) in operations.iter().enumerate() {
            if halted {
                results.push(
                    ValidationResult::failure(
                        ValidationFailure::RequirementsNotMet,
                        RULE_BATCH,
                        "Skipped: an earlier operation in the atomic batch failed",
                    )
                    .with_context("OperationIndex", index),
                );
                continue;
            }

            let mut result = self.validate_operation(op, &shadow, character_level);
            if result.valid {
                if let Err(err) = shadow.apply_operation(op) {
                    result = ValidationResult::failure(failure_for(&err), RULE_BATCH, err.to_string());
                }
            }
            if !result.valid && atomic {
                halted = true;
            }
            results.push(result.with_context("OperationIndex", index));
        }
        results
    }

    fn validate_independent(
        &self,
        operations: &[TransactionOperation],
        state: &EquipmentStateSnapshot,
        character_level: Option<u32>,
    ) -> Vec<ValidationResult> {
        let workers = self.config.max_parallelism.clamp(1, operations.len().max(1));
        let chunk_size = operations.len().div_ceil(workers).max(1);

        std::thread::scope(|scope| {
            let handles: Vec<_> = operations
                .chunks(chunk_size)
                .enumerate()
                .map(|(chunk, part)| {
                    let handle = scope.spawn(move || {
                        part.iter()
                            .enumerate()
                            .map(|(offset, op)| {
                                self.validate_operation(op, state, character_level)
                                    .with_context("OperationIndex", chunk * chunk_size + offset)
                            })
                            .collect::<Vec<_>>()
                    });
                    (part.len(), handle)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(len, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::warn!("batch validation worker panicked");
                        vec![
                            ValidationResult::failure(
                                ValidationFailure::RequirementsNotMet,
                                RULE_BATCH,
                                "Validation worker failed",
                            );
                            len
                        ]
                    })
                })
                .collect()
        })
    }

    /// Validates a single operation against `state` without applying it.
    #[must_use]
    pub fn validate_operation(
        &self,
        op: &TransactionOperation,
        state: &EquipmentStateSnapshot,
        character_level: Option<u32>,
    ) -> ValidationResult {
        let kind = op.operation_type;
        if !kind.is_slot_operation() {
            return ValidationResult::failure(
                ValidationFailure::RequirementsNotMet,
                RULE_BATCH,
                format!("{kind} is not supported on equipment slots"),
            );
        }
        let Some(primary) = op.slot_index.and_then(|i| state.slot(i)) else {
            return invalid_slot(op.slot_index);
        };
        let ctx = PlacementContext::from_snapshot(state, character_level);

        match kind {
            OperationType::Unequip => ValidationResult::success(),
            OperationType::Move | OperationType::Swap => {
                let Some(secondary) = op.secondary_slot_index.and_then(|i| state.slot(i)) else {
                    return invalid_slot(op.secondary_slot_index);
                };
                if kind == OperationType::Move && primary.item.is_none() {
                    return ValidationResult::failure(
                        ValidationFailure::RequirementsNotMet,
                        RULE_BATCH,
                        format!("Slot {} is empty", primary.index),
                    );
                }
                let incoming = if kind == OperationType::Swap {
                    secondary.item.as_ref()
                } else {
                    None
                };
                self.can_swap(
                    &primary.config,
                    primary.item.as_ref(),
                    &secondary.config,
                    incoming,
                    &ctx,
                )
            }
            _ => match op.item_after.as_ref() {
                Some(item) => self.can_place_in(&primary.config, item, &ctx),
                None => ValidationResult::failure(
                    ValidationFailure::RequirementsNotMet,
                    RULE_BATCH,
                    format!("{kind} operation carries no item"),
                ),
            },
        }
    }
}

/// Indices of operations touching the same slot or placing the same instance.
#[must_use]
pub fn find_operation_conflicts(operations: &[TransactionOperation]) -> Vec<usize> {
    let mut by_slot: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut by_instance: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for (index, op) in operations.iter().enumerate() {
        for slot in op.touched_slots() {
            by_slot.entry(slot).or_default().push(index);
        }
        if let Some(item) = &op.item_after {
            by_instance
                .entry(item.instance_id.to_string())
                .or_default()
                .push(index);
        }
    }

    by_slot
        .into_values()
        .chain(by_instance.into_values())
        .filter(|group| group.len() > 1)
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn invalid_slot(index: Option<usize>) -> ValidationResult {
    let message = match index {
        Some(i) => format!("Invalid slot index {i}"),
        None => "Operation has no slot index".to_string(),
    };
    ValidationResult::failure(ValidationFailure::InvalidSlot, RULE_BATCH, message)
}

fn failure_for(err: &ArmoryError) -> ValidationFailure {
    match err {
        ArmoryError::InvalidSlot { .. } => ValidationFailure::InvalidSlot,
        _ => ValidationFailure::RequirementsNotMet,
    }
}
