//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::money::CurrencyLevel;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, state transitions, budget headroom). Storage failures belong to
/// the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input. Carries every violated rule, not just the first.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Debits and credits differ at the given currency level.
    #[error("entry not balanced at {level} level (debit {debit}, credit {credit})")]
    NotBalanced {
        level: CurrencyLevel,
        debit: Decimal,
        credit: Decimal,
    },

    /// Operation attempted from a disallowed status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No usable auto-journal mapping for `(source_module, transaction_type)`.
    #[error("auto-journal config not found for {source_module}:{transaction_type}{}", inactive_suffix(.inactive))]
    ConfigNotFound {
        source_module: String,
        transaction_type: String,
        inactive: bool,
    },

    /// A commitment or realization would drive the available budget negative.
    #[error("insufficient budget: requested {requested}, available {available}, shortfall {shortfall}")]
    InsufficientBudget {
        requested: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The commitment is no longer active because it was released.
    #[error("commitment already released: {0}")]
    AlreadyReleased(String),

    /// The commitment is no longer active because it was realized.
    #[error("commitment already realized: {0}")]
    AlreadyRealized(String),

    /// A uniqueness or concurrency conflict (e.g. duplicate entry number).
    #[error("conflict: {0}")]
    Conflict(String),
}

fn inactive_suffix(inactive: &bool) -> &'static str {
    if *inactive { " (inactive)" } else { "" }
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Collapse a list of rule violations into `Ok(())` or a single `Validation` error.
    pub fn from_violations(violations: Vec<String>) -> DomainResult<()> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self::Validation(violations))
        }
    }
}
