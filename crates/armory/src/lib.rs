//! # ARMORY
//!
//! Equipment transactions and rules validation, wired together.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       EquipmentService                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌──────────────────┐         ┌───────────────────────────┐   │
//! │  │  armory_rules    │ verdict │  armory_transaction       │   │
//! │  │                  │────────>│                           │   │
//! │  │  • Validator     │         │  • Nested transactions    │   │
//! │  │  • Conflicts     │         │  • Savepoints             │   │
//! │  │  • Weight        │         │  • Conflict strategies    │   │
//! │  │  • Coordinator   │         │  • Recovery and sweeper   │   │
//! │  └────────┬─────────┘         └─────────────┬─────────────┘   │
//! │           │                                 │                 │
//! │           │      ┌───────────────────┐      │                 │
//! │           └─────>│   armory_core     │<─────┘                 │
//! │                  │ slots, items,     │                        │
//! │                  │ deltas, snapshots │                        │
//! │                  └───────────────────┘                        │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use armory::{ArmoryConfig, EquipmentService};
//! use armory::core::{ItemInstance, OperationRequest};
//!
//! let config = ArmoryConfig::from_file("armory.toml")?;
//! let service = EquipmentService::in_memory(config)?;
//! service.initialize()?;
//!
//! let deltas = service.execute(&OperationRequest::equip(ItemInstance::new("Knight_Helmet"), 2))?;
//! service.shutdown()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod service;

// Re-export the layers
pub use armory_core as core;
pub use armory_rules as rules;
pub use armory_transaction as transaction;

pub use config::{ArmoryConfig, CharacterConfig};
pub use error::{ServiceError, ServiceResult};
pub use service::{EquipmentService, ServiceState, ServiceStatistics};
