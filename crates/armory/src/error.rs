//! # Service Errors

use crate::service::ServiceState;
use armory_core::ArmoryError;
use armory_rules::{AggregatedRuleResult, RulesError};
use armory_transaction::TransactionError;
use thiserror::Error;

/// Errors returned by [`EquipmentService`](crate::EquipmentService).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The rules pipeline refused the request.
    #[error("rejected by rules: {}", .verdict.summary())]
    Rejected {
        /// Full rule verdict.
        verdict: Box<AggregatedRuleResult>,
        /// Index of the offending request in a batch.
        index: Option<usize>,
    },

    /// The transaction processor refused or failed the request.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Rule registration failed.
    #[error(transparent)]
    Rules(#[from] RulesError),

    /// Store or data model error.
    #[error(transparent)]
    Core(#[from] ArmoryError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The call is not allowed in the current lifecycle state.
    #[error("service is {actual}, expected {expected}")]
    InvalidState {
        /// State the call needs.
        expected: ServiceState,
        /// State the service is in.
        actual: ServiceState,
    },
}

impl ServiceError {
    /// Rule verdict if the request was rejected by rules.
    #[must_use]
    pub fn verdict(&self) -> Option<&AggregatedRuleResult> {
        match self {
            Self::Rejected { verdict, .. } => Some(&**verdict),
            _ => None,
        }
    }
}

/// Result type for service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;
