//! Journal posting engine.
//!
//! Builds drafts from [`NewJournalEntry`] input, posts and reverses them
//! through a [`JournalStore`]. Every state change is one store call, so a
//! crash between steps never leaves a half-posted entry behind.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use ledgerforge_core::{AccountingPeriod, CompanyId, DomainError, DomainResult, JournalEntryId, UserId};
use ledgerforge_journal::{
    EntryNumberFormat, EntryTotals, JournalEntry, JournalEntryFilter, NewJournalEntry, validate_new_entry,
};

use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::store::JournalStore;

pub struct PostingEngine<S> {
    store: Arc<S>,
    numbering: EntryNumberFormat,
    base_currency: String,
}

impl<S> Clone for PostingEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            numbering: self.numbering.clone(),
            base_currency: self.base_currency.clone(),
        }
    }
}

impl<S> PostingEngine<S> {
    pub fn new(store: Arc<S>, numbering: EntryNumberFormat, base_currency: impl Into<String>) -> Self {
        Self {
            store,
            numbering,
            base_currency: base_currency.into(),
        }
    }

    pub fn from_config(store: Arc<S>, config: &LedgerConfig) -> Self {
        Self::new(store, config.entry_numbering(), config.base_currency.clone())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn numbering(&self) -> &EntryNumberFormat {
        &self.numbering
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// Creation rules plus the base-currency rule: an entry in the base
    /// currency must carry a rate of exactly 1.
    fn validate(&self, new: &NewJournalEntry) -> DomainResult<()> {
        let mut violations = match validate_new_entry(new) {
            Ok(()) => Vec::new(),
            Err(DomainError::Validation(v)) => v,
            Err(other) => return Err(other),
        };
        if new.currency_code == self.base_currency {
            if let Some(rate) = new.exchange_rate {
                if rate != Decimal::ONE {
                    violations.push(format!(
                        "exchange rate of a {} entry must be 1 (got {rate})",
                        self.base_currency
                    ));
                }
            }
        }
        DomainError::from_violations(violations)
    }

    /// Validate and build an unsaved draft.
    pub fn prepare(&self, new: NewJournalEntry, created_by: UserId) -> LedgerResult<JournalEntry> {
        self.validate(&new)?;
        Ok(JournalEntry::draft(JournalEntryId::new(), new, created_by, Utc::now())?)
    }
}

impl<S> PostingEngine<S>
where
    S: JournalStore,
{
    /// Persist a new `Draft`. The entry number is assigned by the store.
    #[instrument(skip(self, new), fields(company_id = %new.company_id, entry_id, entry_number), err)]
    pub async fn create(&self, new: NewJournalEntry, created_by: UserId) -> LedgerResult<JournalEntry> {
        let draft = self.prepare(new, created_by)?;
        tracing::Span::current().record("entry_id", tracing::field::display(draft.id));
        self.insert(draft).await
    }

    /// Persist a draft built by [`PostingEngine::prepare`].
    pub async fn insert(&self, draft: JournalEntry) -> LedgerResult<JournalEntry> {
        let entry = self.store.insert_entry(draft, &self.numbering).await?;
        if let Some(number) = &entry.entry_number {
            tracing::Span::current().record("entry_number", number.as_str());
        }
        info!(
            entry_id = %entry.id,
            entry_number = entry.entry_number.as_deref().unwrap_or_default(),
            "journal entry created"
        );
        Ok(entry)
    }

    #[instrument(skip(self), fields(company_id = %company_id, entry_id = %id), err)]
    pub async fn post(&self, company_id: CompanyId, id: JournalEntryId, by: UserId) -> LedgerResult<JournalEntry> {
        let entry = self.store.post_entry(company_id, id, by, Utc::now()).await?;
        info!(
            entry_id = %entry.id,
            entry_number = entry.entry_number.as_deref().unwrap_or_default(),
            total = %entry.totals.debit,
            "journal entry posted"
        );
        Ok(entry)
    }

    /// Post the mirrored entry of `id` and mark `id` reversed.
    ///
    /// Returns `(original, reversal)`.
    #[instrument(skip(self), fields(company_id = %company_id, entry_id = %id), err)]
    pub async fn reverse(
        &self,
        company_id: CompanyId,
        id: JournalEntryId,
        by: UserId,
    ) -> LedgerResult<(JournalEntry, JournalEntry)> {
        let (original, reversal) = self
            .store
            .reverse_entry(company_id, id, JournalEntryId::new(), &self.numbering, by, Utc::now())
            .await?;
        info!(
            entry_id = %original.id,
            reversal_id = %reversal.id,
            reversal_number = reversal.entry_number.as_deref().unwrap_or_default(),
            "journal entry reversed"
        );
        Ok((original, reversal))
    }

    /// Allocate the next entry number of the period containing `date`.
    pub async fn next_entry_number(&self, company_id: CompanyId, date: NaiveDate) -> LedgerResult<String> {
        Ok(self
            .store
            .next_entry_number(company_id, AccountingPeriod::of(date), &self.numbering)
            .await?)
    }

    #[instrument(skip(self, new), fields(company_id = %company_id, entry_id = %id), err)]
    pub async fn update(
        &self,
        company_id: CompanyId,
        id: JournalEntryId,
        new: NewJournalEntry,
    ) -> LedgerResult<JournalEntry> {
        self.validate(&new)?;
        let mut entry = self.get(company_id, id).await?;
        entry.revise_draft(new, Utc::now())?;
        Ok(self.store.update_draft(entry).await?)
    }

    #[instrument(skip(self), fields(company_id = %company_id, entry_id = %id), err)]
    pub async fn delete(&self, company_id: CompanyId, id: JournalEntryId) -> LedgerResult<()> {
        self.store.delete_draft(company_id, id).await?;
        info!(entry_id = %id, "draft journal entry deleted");
        Ok(())
    }

    pub async fn get(&self, company_id: CompanyId, id: JournalEntryId) -> LedgerResult<JournalEntry> {
        self.store
            .get_entry(company_id, id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("journal entry {id}")).into())
    }

    pub async fn list(&self, filter: &JournalEntryFilter) -> LedgerResult<Vec<JournalEntry>> {
        Ok(self.store.list_entries(filter).await?)
    }

    /// Totals recomputed from the stored lines; `NotBalanced` when they differ.
    pub async fn check_balance(&self, company_id: CompanyId, id: JournalEntryId) -> LedgerResult<EntryTotals> {
        let entry = self.get(company_id, id).await?;
        entry.check_balance()?;
        Ok(EntryTotals::of(&entry.lines))
    }
}
