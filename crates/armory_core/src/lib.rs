//! # ARMORY Core
//!
//! Shared vocabulary of the ARMORY equipment engine.
//!
//! ## Design Principles
//!
//! 1. **Snapshots are values** - engines evaluate clones, never live state
//! 2. **One mutable resource** - all writes go through a [`SlotStore`]
//! 3. **Hierarchical tags** - `Item.Weapon.Sword` matches `Item.Weapon`
//! 4. **External configuration** - slot layouts and item catalogs load from TOML
//!
//! ## Example
//!
//! ```rust,ignore
//! use armory_core::{InMemorySlotStore, ItemInstance, SlotConfig, SlotStore, SlotType};
//!
//! let store = InMemorySlotStore::new(vec![
//!     SlotConfig::new(0, SlotType::PrimaryWeapon, "Equipment.Slot.Hand.Main"),
//! ]);
//! store.set_slot_item(0, ItemInstance::new("Longsword"), true)?;
//! let snapshot = store.create_snapshot();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod catalog;
pub mod delta;
pub mod error;
pub mod item;
pub mod memory_store;
pub mod operation;
pub mod slot;
pub mod snapshot;
pub mod store;
pub mod tag;

pub use catalog::{
    AttributeProvider, ItemCatalog, ItemDataProvider, ItemDefinition, StaticAttributes,
    ATTR_LEVEL, ATTR_STRENGTH,
};
pub use delta::{Delta, DeltaBus, DeltaObserver, TransactionId, REASON_ROLLBACK, REASON_TRANSACTION};
pub use error::{ArmoryError, ArmoryResult, ValidationFailure};
pub use item::{InstanceId, ItemId, ItemInstance, PROP_REQUIRED_LEVEL, PROP_WEIGHT};
pub use memory_store::InMemorySlotStore;
pub use operation::{
    execution_order, OperationId, OperationPriority, OperationRequest, OperationType,
    TransactionOperation,
};
pub use slot::{SlotConfig, SlotSnapshot, SlotType};
pub use snapshot::EquipmentStateSnapshot;
pub use store::{write_slot, SlotEvent, SlotStore};
pub use tag::{names, Tag, TagSet};
