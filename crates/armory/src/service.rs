//! # Equipment Service
//!
//! **Rules gate in front of the transaction processor.**
//!
//! ## Request Flow
//!
//! ```text
//!   OperationRequest
//!        │
//!        ▼
//!   store.create_snapshot() ──> RulesCoordinator::evaluate_operation
//!        │                            │ blocked ──> ServiceError::Rejected
//!        ▼                            ▼
//!   TransactionProcessor::execute_in_order ──> deltas to observers
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!   Uninitialized ──> Initializing ──> Ready ──> ShuttingDown ──> Shutdown
//!                          │                          │
//!                          └──────> Failed <──────────┘
//! ```

use crate::config::ArmoryConfig;
use crate::error::{ServiceError, ServiceResult};
use armory_core::{
    Delta, DeltaObserver, EquipmentStateSnapshot, InMemorySlotStore, ItemCatalog, OperationRequest, SlotStore,
    TransactionOperation,
};
use armory_rules::{
    AggregatedRuleResult, ConflictRulesEngine, CoordinatorStatistics, RulesCoordinator, SlotValidator,
    ValidatorStatistics, WeightRulesEngine,
};
use armory_transaction::{
    CancelToken, ConflictStrategy, TransactionProcessor, TransactionStatistics, TransactionSweeper,
};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Constructed, not started.
    Uninitialized,
    /// Checking the store against the configuration.
    Initializing,
    /// Accepting requests.
    Ready,
    /// Rolling back open work.
    ShuttingDown,
    /// Stopped cleanly.
    Shutdown,
    /// Initialization or shutdown failed.
    Failed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::ShuttingDown => "ShuttingDown",
            Self::Shutdown => "Shutdown",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Combined counters from every component.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceStatistics {
    /// Transaction processor.
    pub transactions: TransactionStatistics,
    /// Rules coordinator.
    pub rules: CoordinatorStatistics,
    /// Slot validator.
    pub validator: ValidatorStatistics,
    /// Requests refused by rules.
    pub rejected: u64,
}

/// Equipment engine for one character.
pub struct EquipmentService {
    config: ArmoryConfig,
    store: Arc<dyn SlotStore>,
    coordinator: RulesCoordinator,
    processor: Arc<TransactionProcessor>,
    sweeper: Mutex<Option<TransactionSweeper>>,
    state: RwLock<ServiceState>,
    rejected: std::sync::atomic::AtomicU64,
}

impl EquipmentService {
    /// Wires every engine over `store`. The service starts Uninitialized.
    ///
    /// # Errors
    ///
    /// Returns `Config` or `Rules` if the configuration is invalid.
    pub fn new(config: ArmoryConfig, store: Arc<dyn SlotStore>) -> ServiceResult<Self> {
        config.validate()?;

        let catalog = Arc::new(config.catalog());
        let attributes = Arc::new(config.character.attributes());

        let validator = Arc::new(SlotValidator::new(config.validator.clone(), catalog.clone()));
        for (slot_tag, restriction) in &config.restrictions {
            validator.set_slot_restriction(slot_tag.as_str(), restriction.clone());
        }
        let conflict = Arc::new(ConflictRulesEngine::from_config(&config.conflict, catalog.clone())?);
        let weight = WeightRulesEngine::new(config.weight.clone())
            .with_catalog(catalog)
            .with_attributes(attributes.clone());
        let coordinator = RulesCoordinator::new(config.coordinator.clone(), validator, conflict, weight)
            .with_attributes(attributes);

        let processor = Arc::new(TransactionProcessor::new(config.transaction.clone(), store.clone()));

        Ok(Self {
            config,
            store,
            coordinator,
            processor,
            sweeper: Mutex::new(None),
            state: RwLock::new(ServiceState::Uninitialized),
            rejected: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Builds a service over a fresh in-memory store laid out from `config.slots`.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn in_memory(config: ArmoryConfig) -> ServiceResult<Self> {
        let store: Arc<dyn SlotStore> = Arc::new(InMemorySlotStore::new(config.slots.clone()));
        Self::new(config, store)
    }

    /// Checks the store against the configured layout, starts the timeout
    /// sweeper and moves to Ready.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless Uninitialized
    /// - `Config` if the store does not match the layout (the service becomes Failed)
    pub fn initialize(&self) -> ServiceResult<()> {
        self.transition(ServiceState::Uninitialized, ServiceState::Initializing)?;

        if let Err(err) = self.check_layout() {
            *self.state.write() = ServiceState::Failed;
            tracing::warn!(%err, "equipment service failed to initialize");
            return Err(err);
        }

        *self.sweeper.lock() = Some(TransactionSweeper::spawn(&self.processor));
        *self.state.write() = ServiceState::Ready;
        tracing::info!(slots = self.store.slot_count(), "equipment service ready");
        Ok(())
    }

    fn check_layout(&self) -> ServiceResult<()> {
        for expected in &self.config.slots {
            match self.store.slot_configuration(expected.index) {
                Some(actual) if actual.slot_tag == expected.slot_tag => {}
                Some(actual) => {
                    return Err(ServiceError::Config(format!(
                        "slot {} is {} in the store but {} in the configuration",
                        expected.index, actual.slot_tag, expected.slot_tag
                    )))
                }
                None => {
                    return Err(ServiceError::Config(format!(
                        "slot {} is missing from the store",
                        expected.index
                    )))
                }
            }
        }
        let snapshot = self.store.create_snapshot();
        if !self.processor.validate_state_consistency(&snapshot) {
            return Err(ServiceError::Config(
                "store state is inconsistent (duplicate item instance or layout mismatch)".to_string(),
            ));
        }
        Ok(())
    }

    /// Rolls back open transactions, stops the sweeper and moves to Shutdown.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless Ready.
    pub fn shutdown(&self) -> ServiceResult<()> {
        self.transition(ServiceState::Ready, ServiceState::ShuttingDown)?;

        let open = self.processor.depth();
        let rolled_back = self.processor.rollback_all();
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }

        let next = if self.processor.depth() == 0 {
            ServiceState::Shutdown
        } else {
            ServiceState::Failed
        };
        *self.state.write() = next;
        tracing::info!(open, rolled_back, state = %next, "equipment service stopped");
        Ok(())
    }

    fn transition(&self, from: ServiceState, to: ServiceState) -> ServiceResult<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(ServiceError::InvalidState {
                expected: from,
                actual: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn ensure_ready(&self) -> ServiceResult<()> {
        let state = *self.state.read();
        if state == ServiceState::Ready {
            Ok(())
        } else {
            Err(ServiceError::InvalidState {
                expected: ServiceState::Ready,
                actual: state,
            })
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Signals that data behind the rules changed outside the catalog, such
    /// as character progression or custom rule inputs. Every cached placement
    /// verdict is dropped and the new data version is returned.
    pub fn notify_data_changed(&self) -> u64 {
        let version = self.coordinator.validator().bump_data_version();
        tracing::debug!(version, "rules data changed");
        version
    }

    /// Evaluates a request against the current state without applying it.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless Ready.
    pub fn preview(&self, request: &OperationRequest) -> ServiceResult<AggregatedRuleResult> {
        self.ensure_ready()?;
        let snapshot = self.store.create_snapshot();
        Ok(self.coordinator.evaluate_operation(request, &snapshot.slots))
    }

    /// Validates and applies one request atomically.
    ///
    /// # Errors
    ///
    /// - `Rejected` if the rules pipeline blocks it
    /// - `Transaction` if the commit fails (nothing is applied)
    pub fn execute(&self, request: &OperationRequest) -> ServiceResult<Vec<Delta>> {
        self.execute_batch(std::slice::from_ref(request), &CancelToken::new())
    }

    /// Validates every request against a shadow of the current state, then
    /// applies all of them in one transaction.
    ///
    /// Requests run highest priority first, ties in the order given. The
    /// shadow sees them in that same order, so the rules judge exactly the
    /// sequence that is committed.
    ///
    /// # Errors
    ///
    /// - `Rejected` with the index (into `requests`) of the first blocked request
    /// - `Transaction` if the batch is cancelled or fails to commit
    pub fn execute_batch(&self, requests: &[OperationRequest], cancel: &CancelToken) -> ServiceResult<Vec<Delta>> {
        self.ensure_ready()?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut planned: Vec<(usize, TransactionOperation)> = requests
            .iter()
            .map(OperationRequest::to_operation)
            .enumerate()
            .collect();
        planned.sort_by(|(ia, a), (ib, b)| a.priority.cmp(&b.priority).reverse().then(ia.cmp(ib)));

        let mut shadow = self.store.create_snapshot();
        let mut operations = Vec::with_capacity(planned.len());
        for (index, operation) in planned {
            let request = &requests[index];
            let verdict = self.coordinator.evaluate_operation(request, &shadow.slots);
            if !verdict.can_proceed(request.allow_override) {
                self.rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::debug!(index, summary = %verdict.summary(), "request rejected by rules");
                return Err(ServiceError::Rejected {
                    verdict: Box::new(verdict),
                    index: (requests.len() > 1).then_some(index),
                });
            }
            shadow.apply_operation(&operation)?;
            operations.push(operation);
        }

        let description = match requests {
            [single] => format!("{} via {}", single.operation_type, single.source.as_deref().unwrap_or("service")),
            _ => format!("batch of {}", requests.len()),
        };
        let deltas = self
            .processor
            .execute_in_order(description, operations, ConflictStrategy::Abort, cancel)?;
        Ok(deltas)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ArmoryConfig {
        &self.config
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SlotStore> {
        &self.store
    }

    /// Rules coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &RulesCoordinator {
        &self.coordinator
    }

    /// Transaction processor, for callers that manage transactions directly.
    #[must_use]
    pub fn processor(&self) -> &Arc<TransactionProcessor> {
        &self.processor
    }

    /// Item catalog built from the configuration.
    #[must_use]
    pub fn catalog(&self) -> ItemCatalog {
        self.config.catalog()
    }

    /// Current equipment state.
    #[must_use]
    pub fn snapshot(&self) -> EquipmentStateSnapshot {
        self.store.create_snapshot()
    }

    /// Registers a delta callback.
    pub fn add_observer(&self, observer: Arc<dyn DeltaObserver>) {
        self.processor.add_observer(observer);
    }

    /// Opens a channel receiving every published delta batch.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<Arc<[Delta]>> {
        self.processor.subscribe()
    }

    /// Combined counters.
    #[must_use]
    pub fn statistics(&self) -> ServiceStatistics {
        ServiceStatistics {
            transactions: self.processor.statistics(),
            rules: self.coordinator.statistics(),
            validator: self.coordinator.validator().statistics(),
            rejected: self.rejected.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

impl Drop for EquipmentService {
    fn drop(&mut self) {
        if self.state() == ServiceState::Ready {
            if let Err(err) = self.shutdown() {
                tracing::warn!(%err, "equipment service shutdown on drop failed");
            }
        }
    }
}

impl fmt::Debug for EquipmentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EquipmentService")
            .field("state", &self.state())
            .field("slots", &self.store.slot_count())
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armory_core::{ItemDefinition, ItemInstance, SlotConfig, SlotType};

    fn config() -> ArmoryConfig {
        ArmoryConfig {
            slots: vec![
                SlotConfig::new(0, SlotType::PrimaryWeapon, "Equipment.Slot.Hand.Main").allow("Item.Weapon"),
                SlotConfig::new(1, SlotType::Headwear, "Equipment.Slot.Head").allow("Item.Armor"),
            ],
            items: vec![
                ItemDefinition::new("Dagger", "Item.Weapon.Dagger").with_weight(1.0),
                ItemDefinition::new("Cap", "Item.Armor.Light").with_weight(0.5),
            ],
            ..ArmoryConfig::default()
        }
    }

    #[test]
    fn test_lifecycle() {
        let service = EquipmentService::in_memory(config()).unwrap();
        assert_eq!(service.state(), ServiceState::Uninitialized);
        assert!(matches!(
            service.execute(&OperationRequest::unequip(0)),
            Err(ServiceError::InvalidState { actual: ServiceState::Uninitialized, .. })
        ));

        service.initialize().unwrap();
        assert_eq!(service.state(), ServiceState::Ready);
        assert!(service.initialize().is_err());

        service.shutdown().unwrap();
        assert_eq!(service.state(), ServiceState::Shutdown);
    }

    #[test]
    fn test_layout_mismatch_fails_initialization() {
        let store: Arc<dyn SlotStore> = Arc::new(InMemorySlotStore::new(vec![SlotConfig::new(
            0,
            SlotType::Headwear,
            "Equipment.Slot.Head",
        )]));
        let service = EquipmentService::new(config(), store).unwrap();
        assert!(matches!(service.initialize(), Err(ServiceError::Config(_))));
        assert_eq!(service.state(), ServiceState::Failed);
    }

    #[test]
    fn test_execute_and_reject() {
        let service = EquipmentService::in_memory(config()).unwrap();
        service.initialize().unwrap();

        let deltas = service
            .execute(&OperationRequest::equip(ItemInstance::new("Dagger"), 0))
            .unwrap();
        assert_eq!(deltas.len(), 1);
        assert!(service.snapshot().item_at(0).is_some());

        let err = service
            .execute(&OperationRequest::equip(ItemInstance::new("Dagger"), 1))
            .unwrap_err();
        assert!(err.verdict().is_some_and(|v| !v.all_passed));
        assert!(service.snapshot().item_at(1).is_none());
        assert_eq!(service.statistics().rejected, 1);
    }

    #[test]
    fn test_data_change_invalidates_cached_verdicts() {
        let service = EquipmentService::in_memory(config()).unwrap();
        service.initialize().unwrap();
        let request = OperationRequest::equip(ItemInstance::new("Dagger"), 0);

        service.preview(&request).unwrap();
        service.preview(&request).unwrap();
        let warm = service.statistics().validator;
        assert!(warm.cache_hits >= 1);

        let version = service.notify_data_changed();
        assert_eq!(version, service.coordinator().validator().data_version());
        service.preview(&request).unwrap();
        assert!(service.statistics().validator.cache_misses > warm.cache_misses);
    }
}
