//! Ledger store boundary.
//!
//! The store is the only shared mutable resource of the ledger. Each trait
//! method is one atomic unit: backends either apply all of its writes or none.
//! Rules that must hold under concurrency (draft-only edits, commit-with-check,
//! single release) are evaluated inside that unit, not by the caller.
//!
//! Reads and writes are company-scoped: passing another company's id behaves
//! exactly like a missing row.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use ledgerforge_autojournal::{AutoJournalConfig, AutoJournalLog, AutoJournalStatus};
use ledgerforge_budget::{
    Budget, BudgetCommitment, BudgetPosition, BudgetRealization, BudgetStatus, ReferenceType,
};
use ledgerforge_core::{
    AccountId, AccountingPeriod, BudgetId, CommitmentId, CompanyId, JournalEntryId, RealizationId, UserId,
};
use ledgerforge_journal::{EntryNumberFormat, JournalEntry, JournalEntryFilter};

use crate::error::StoreResult;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

#[async_trait::async_trait]
pub trait JournalStore: Send + Sync {
    /// Persist a new entry with all its lines.
    ///
    /// An entry without a number gets the next one for its company and period,
    /// allocated in the same unit of work.
    async fn insert_entry(&self, entry: JournalEntry, numbering: &EntryNumberFormat) -> StoreResult<JournalEntry>;

    async fn get_entry(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<Option<JournalEntry>>;

    async fn list_entries(&self, filter: &JournalEntryFilter) -> StoreResult<Vec<JournalEntry>>;

    /// Replace header and lines of a stored draft.
    async fn update_draft(&self, entry: JournalEntry) -> StoreResult<JournalEntry>;

    async fn delete_draft(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<()>;

    /// `Draft -> Posted` after re-checking lines and balance.
    async fn post_entry(
        &self,
        company_id: CompanyId,
        id: JournalEntryId,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<JournalEntry>;

    /// Insert the posted mirror of `id` and mark `id` reversed.
    ///
    /// Returns `(original, reversal)`.
    async fn reverse_entry(
        &self,
        company_id: CompanyId,
        id: JournalEntryId,
        reversal_id: JournalEntryId,
        numbering: &EntryNumberFormat,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<(JournalEntry, JournalEntry)>;

    /// Allocate the next number for `(company, period)`. Strictly increasing.
    async fn next_entry_number(
        &self,
        company_id: CompanyId,
        period: AccountingPeriod,
        numbering: &EntryNumberFormat,
    ) -> StoreResult<String>;
}

#[async_trait::async_trait]
pub trait BudgetStore: Send + Sync {
    async fn insert_budget(&self, budget: Budget) -> StoreResult<Budget>;

    async fn get_budget(&self, company_id: CompanyId, id: BudgetId) -> StoreResult<Option<Budget>>;

    /// Move a budget along its lifecycle; the transition is validated against the stored status.
    async fn set_budget_status(
        &self,
        company_id: CompanyId,
        id: BudgetId,
        to: BudgetStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Budget>;

    /// Mark `revision.revision_of` as `Revised` and insert `revision`, atomically.
    async fn revise_budget(&self, revision: Budget, at: DateTime<Utc>) -> StoreResult<Budget>;

    /// Active budget of `fiscal_year` that has a line for `account_id`.
    async fn find_active_budget(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        fiscal_year: i32,
    ) -> StoreResult<Option<Budget>>;

    /// Sum of `Active` commitments.
    async fn total_committed(&self, budget_id: BudgetId, account_id: AccountId) -> StoreResult<Decimal>;

    /// Sum of all realizations.
    async fn total_realized(&self, budget_id: BudgetId, account_id: AccountId) -> StoreResult<Decimal>;

    /// Insert an `Active` commitment.
    ///
    /// With `enforce`, availability is re-checked under the `(budget, account)`
    /// lock and an oversold request fails with `InsufficientBudget`.
    async fn insert_commitment(&self, commitment: BudgetCommitment, enforce: bool) -> StoreResult<BudgetCommitment>;

    /// Insert a realization; a linked commitment must be active and becomes `Realized`.
    async fn insert_realization(
        &self,
        realization: BudgetRealization,
        enforce: bool,
    ) -> StoreResult<BudgetRealization>;

    async fn release_commitment(
        &self,
        company_id: CompanyId,
        id: CommitmentId,
        by: UserId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<BudgetCommitment>;

    /// Rewrite a realization's amount. Increases are checked against availability.
    async fn adjust_realization(
        &self,
        company_id: CompanyId,
        id: RealizationId,
        new_amount: Decimal,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<BudgetRealization>;

    async fn get_commitment(&self, company_id: CompanyId, id: CommitmentId) -> StoreResult<Option<BudgetCommitment>>;

    async fn get_realization(
        &self,
        company_id: CompanyId,
        id: RealizationId,
    ) -> StoreResult<Option<BudgetRealization>>;

    async fn commitments_by_reference(
        &self,
        company_id: CompanyId,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> StoreResult<Vec<BudgetCommitment>>;

    async fn position(&self, budget: &Budget, account_id: AccountId) -> StoreResult<BudgetPosition> {
        Ok(BudgetPosition::new(
            budget.budgeted_for(account_id).unwrap_or_default(),
            self.total_committed(budget.id, account_id).await?,
            self.total_realized(budget.id, account_id).await?,
        ))
    }
}

#[async_trait::async_trait]
pub trait AutoJournalStore: Send + Sync {
    async fn find_config(&self, source_module: &str, transaction_type: &str) -> StoreResult<Option<AutoJournalConfig>>;

    async fn upsert_config(&self, config: AutoJournalConfig) -> StoreResult<()>;

    /// Insert a `Pending` attempt.
    ///
    /// Fails with `Conflict` while another attempt for the same source is
    /// pending or has succeeded.
    async fn insert_log(&self, log: AutoJournalLog) -> StoreResult<AutoJournalLog>;

    /// Persist the terminal state of a pending attempt.
    async fn complete_log(&self, log: &AutoJournalLog) -> StoreResult<()>;

    /// Newest first.
    async fn logs_by_source(
        &self,
        company_id: CompanyId,
        source_module: &str,
        source_id: &str,
    ) -> StoreResult<Vec<AutoJournalLog>>;

    async fn logs_by_status(
        &self,
        company_id: CompanyId,
        status: AutoJournalStatus,
        limit: usize,
    ) -> StoreResult<Vec<AutoJournalLog>>;
}

/// Everything the engines need from one backend.
pub trait LedgerStore: JournalStore + BudgetStore + AutoJournalStore {}

impl<T> LedgerStore for T where T: JournalStore + BudgetStore + AutoJournalStore {}
