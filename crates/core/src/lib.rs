//! `ledgerforge-core`: shared building blocks of the posting core.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error taxonomy, money rounding and accounting periods.

pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod period;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AccountId, AutoJournalLogId, BudgetId, CommitmentId, CompanyId, JournalEntryId,
    RealizationId, UserId,
};
pub use money::{AMOUNT_SCALE, CurrencyLevel, is_valid_currency_code, round_amount, to_base};
pub use period::AccountingPeriod;
pub use rust_decimal::Decimal;
