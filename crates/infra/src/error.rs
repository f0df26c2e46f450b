//! Infrastructure error model.
//!
//! Store backends return [`StoreError`]; engines surface [`LedgerError`].
//! Business-rule failures detected inside a store transaction travel as
//! `StoreError::Domain` and are unwrapped back into `LedgerError::Domain`.

use thiserror::Error;

use ledgerforge_core::DomainError;

pub type StoreResult<T> = Result<T, StoreError>;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A rule checked under the store's lock or transaction failed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Unique-constraint or concurrent-update conflict.
    #[error("store conflict: {0}")]
    Conflict(String),

    /// Foreign-key or check-constraint violation.
    #[error("store constraint violated: {0}")]
    Constraint(String),

    /// A persisted row could not be mapped back into the domain model.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Connection, pool, lock or driver failure.
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(err) => LedgerError::Domain(err),
            StoreError::Conflict(msg) => LedgerError::Domain(DomainError::Conflict(msg)),
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(err) => Some(err),
            LedgerError::Store(_) => None,
        }
    }
}
