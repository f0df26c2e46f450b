//! Auto-journal rules: typed configs, transaction requests and generation logs.
//!
//! Turning a business event into a balanced journal entry is split in two:
//! this crate resolves rules into lines, `ledgerforge-infra` posts and logs.

pub mod config;
pub mod log;
pub mod request;
pub mod template;

pub use config::{AmountSource, AutoJournalConfig, PostingRule};
pub use log::{AutoJournalLog, AutoJournalStatus};
pub use request::{
    AmountField, CashBankKind, CashBankTransaction, InventoryTransaction, MovementType, PaymentMethod,
    PayrollTransaction, PurchaseTransaction, SalesTransaction, TransactionHeader, TransactionRequest, source,
};
pub use template::{PLACEHOLDERS, TemplateContext};
