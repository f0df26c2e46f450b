use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use ledgerforge_autojournal::{AutoJournalConfig, AutoJournalLog, AutoJournalStatus};
use ledgerforge_budget::{
    Availability, Budget, BudgetCommitment, BudgetPosition, BudgetRealization, BudgetStatus, ReferenceType,
};
use ledgerforge_core::{
    AccountId, AccountingPeriod, AutoJournalLogId, BudgetId, CommitmentId, CompanyId, DomainError, Entity,
    JournalEntryId, RealizationId, UserId,
};
use ledgerforge_journal::{EntryNumberFormat, JournalEntry, JournalEntryFilter};

use super::{AutoJournalStore, BudgetStore, JournalStore};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    entries: HashMap<JournalEntryId, JournalEntry>,
    entry_numbers: HashSet<(CompanyId, String)>,
    sequences: HashMap<(CompanyId, AccountingPeriod), u64>,
    budgets: HashMap<BudgetId, Budget>,
    commitments: HashMap<CommitmentId, BudgetCommitment>,
    realizations: HashMap<RealizationId, BudgetRealization>,
    configs: HashMap<(String, String), AutoJournalConfig>,
    logs: HashMap<AutoJournalLogId, AutoJournalLog>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. One mutex guards all state, so every trait method
/// is trivially atomic and budget checks are serialized store-wide.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> StoreResult<T>) -> StoreResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::backend("lock poisoned"))?;
        f(&mut state)
    }
}

/// `Conflict` when a record with the same id is already stored.
fn ensure_vacant<E: Entity>(map: &HashMap<E::Id, E>, item: &E) -> StoreResult<()> {
    if map.contains_key(&item.id()) {
        return Err(StoreError::Conflict(format!("{} {} already exists", E::KIND, item.id())));
    }
    Ok(())
}

/// The record with `id`, if `company_id` can see it.
fn scoped<E: Entity>(map: &HashMap<E::Id, E>, company_id: CompanyId, id: E::Id) -> StoreResult<&E> {
    map.get(&id)
        .filter(|e| e.visible_to(company_id))
        .ok_or_else(|| E::not_found(id).into())
}

impl State {
    fn entry(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<&JournalEntry> {
        scoped(&self.entries, company_id, id)
    }

    fn allocate_number(
        &mut self,
        company_id: CompanyId,
        period: AccountingPeriod,
        numbering: &EntryNumberFormat,
    ) -> String {
        let seq = self.sequences.entry((company_id, period)).or_insert(0);
        *seq += 1;
        numbering.format(period, *seq)
    }

    /// Number (if needed) and register an entry. Caller has validated it.
    fn put_new_entry(&mut self, mut entry: JournalEntry, numbering: &EntryNumberFormat) -> StoreResult<JournalEntry> {
        ensure_vacant(&self.entries, &entry)?;
        let number = match entry.entry_number.take() {
            Some(n) => n,
            None => self.allocate_number(entry.company_id, AccountingPeriod::of(entry.entry_date), numbering),
        };
        if !self.entry_numbers.insert((entry.company_id, number.clone())) {
            return Err(StoreError::Conflict(format!("entry number {number} is already used")));
        }
        entry.entry_number = Some(number);
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    fn budget(&self, company_id: CompanyId, id: BudgetId) -> StoreResult<&Budget> {
        scoped(&self.budgets, company_id, id)
    }

    fn committed(&self, budget_id: BudgetId, account_id: AccountId) -> Decimal {
        self.commitments
            .values()
            .filter(|c| c.budget_id == budget_id && c.account_id == account_id && c.is_active())
            .map(|c| c.amount)
            .sum()
    }

    fn realized(&self, budget_id: BudgetId, account_id: AccountId) -> Decimal {
        self.realizations
            .values()
            .filter(|r| r.budget_id == budget_id && r.account_id == account_id)
            .map(|r| r.amount)
            .sum()
    }

    /// Budget must accept spending and carry a line for the account.
    fn spending_position(
        &self,
        company_id: CompanyId,
        budget_id: BudgetId,
        account_id: AccountId,
    ) -> StoreResult<BudgetPosition> {
        let budget = self.budget(company_id, budget_id)?;
        budget.ensure_accepts_spending()?;
        let budgeted = budget.budgeted_for(account_id).ok_or_else(|| {
            DomainError::not_found(format!("account {account_id} has no line in budget {budget_id}"))
        })?;
        Ok(BudgetPosition::new(
            budgeted,
            self.committed(budget_id, account_id),
            self.realized(budget_id, account_id),
        ))
    }

    /// `replacing` is the budget moving out of `Active` in the same step.
    fn ensure_single_active(&self, budget: &Budget, replacing: Option<BudgetId>) -> StoreResult<()> {
        let clash = self.budgets.values().any(|b| {
            b.id != budget.id
                && Some(b.id) != replacing
                && b.company_id == budget.company_id
                && b.fiscal_year == budget.fiscal_year
                && b.budget_type == budget.budget_type
                && b.status == BudgetStatus::Active
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "another {} budget is already active for fiscal year {}",
                budget.budget_type.as_str(),
                budget.fiscal_year
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl JournalStore for InMemoryLedgerStore {
    async fn insert_entry(&self, entry: JournalEntry, numbering: &EntryNumberFormat) -> StoreResult<JournalEntry> {
        entry.check_lines()?;
        self.with_state(|s| s.put_new_entry(entry, numbering))
    }

    async fn get_entry(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<Option<JournalEntry>> {
        self.with_state(|s| Ok(s.entry(company_id, id).ok().cloned()))
    }

    async fn list_entries(&self, filter: &JournalEntryFilter) -> StoreResult<Vec<JournalEntry>> {
        self.with_state(|s| {
            let mut out: Vec<JournalEntry> = s.entries.values().filter(|e| filter.matches(e)).cloned().collect();
            out.sort_by(|a, b| {
                a.entry_date
                    .cmp(&b.entry_date)
                    .then_with(|| a.entry_number.cmp(&b.entry_number))
            });
            let page = out.into_iter().skip(filter.offset);
            Ok(match filter.limit {
                Some(limit) => page.take(limit).collect(),
                None => page.collect(),
            })
        })
    }

    async fn update_draft(&self, mut entry: JournalEntry) -> StoreResult<JournalEntry> {
        entry.check_lines()?;
        self.with_state(|s| {
            let existing = s.entry(entry.company_id, entry.id)?;
            if !existing.is_draft() {
                return Err(DomainError::invalid_state(format!(
                    "journal entry {} is {} and can no longer be edited",
                    entry.id, existing.status
                ))
                .into());
            }
            entry.entry_number = existing.entry_number.clone();
            entry.status = existing.status;
            s.entries.insert(entry.id, entry.clone());
            Ok(entry)
        })
    }

    async fn delete_draft(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<()> {
        self.with_state(|s| {
            s.entry(company_id, id)?.ensure_deletable()?;
            if let Some(removed) = s.entries.remove(&id) {
                if let Some(number) = removed.entry_number {
                    s.entry_numbers.remove(&(company_id, number));
                }
            }
            Ok(())
        })
    }

    async fn post_entry(
        &self,
        company_id: CompanyId,
        id: JournalEntryId,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<JournalEntry> {
        self.with_state(|s| {
            let mut entry = s.entry(company_id, id)?.clone();
            entry.mark_posted(by, at)?;
            s.entries.insert(id, entry.clone());
            Ok(entry)
        })
    }

    async fn reverse_entry(
        &self,
        company_id: CompanyId,
        id: JournalEntryId,
        reversal_id: JournalEntryId,
        numbering: &EntryNumberFormat,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<(JournalEntry, JournalEntry)> {
        self.with_state(|s| {
            let mut original = s.entry(company_id, id)?.clone();
            let reversal = original.reversal(reversal_id, by, at)?;
            original.mark_reversed(reversal_id, by, at)?;
            let reversal = s.put_new_entry(reversal, numbering)?;
            s.entries.insert(id, original.clone());
            Ok((original, reversal))
        })
    }

    async fn next_entry_number(
        &self,
        company_id: CompanyId,
        period: AccountingPeriod,
        numbering: &EntryNumberFormat,
    ) -> StoreResult<String> {
        self.with_state(|s| Ok(s.allocate_number(company_id, period, numbering)))
    }
}

#[async_trait::async_trait]
impl BudgetStore for InMemoryLedgerStore {
    async fn insert_budget(&self, budget: Budget) -> StoreResult<Budget> {
        self.with_state(|s| {
            ensure_vacant(&s.budgets, &budget)?;
            if budget.status == BudgetStatus::Active {
                s.ensure_single_active(&budget, None)?;
            }
            s.budgets.insert(budget.id, budget.clone());
            Ok(budget)
        })
    }

    async fn get_budget(&self, company_id: CompanyId, id: BudgetId) -> StoreResult<Option<Budget>> {
        self.with_state(|s| Ok(s.budget(company_id, id).ok().cloned()))
    }

    async fn set_budget_status(
        &self,
        company_id: CompanyId,
        id: BudgetId,
        to: BudgetStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Budget> {
        self.with_state(|s| {
            let mut budget = s.budget(company_id, id)?.clone();
            budget.transition(to, at)?;
            if to == BudgetStatus::Active {
                s.ensure_single_active(&budget, None)?;
            }
            s.budgets.insert(id, budget.clone());
            Ok(budget)
        })
    }

    async fn revise_budget(&self, revision: Budget, at: DateTime<Utc>) -> StoreResult<Budget> {
        self.with_state(|s| {
            let prior_id = revision
                .revision_of
                .ok_or_else(|| DomainError::validation("a revision must reference the budget it replaces"))?;
            ensure_vacant(&s.budgets, &revision)?;
            let mut prior = s.budget(revision.company_id, prior_id)?.clone();
            prior.transition(BudgetStatus::Revised, at)?;
            if revision.status == BudgetStatus::Active {
                s.ensure_single_active(&revision, Some(prior_id))?;
            }
            s.budgets.insert(prior_id, prior);
            s.budgets.insert(revision.id, revision.clone());
            Ok(revision)
        })
    }

    async fn find_active_budget(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        fiscal_year: i32,
    ) -> StoreResult<Option<Budget>> {
        self.with_state(|s| {
            Ok(s.budgets
                .values()
                .filter(|b| {
                    b.company_id == company_id
                        && b.status == BudgetStatus::Active
                        && b.fiscal_year == fiscal_year
                        && b.budgeted_for(account_id).is_some()
                })
                .min_by_key(|b| (b.created_at, b.id))
                .cloned())
        })
    }

    async fn total_committed(&self, budget_id: BudgetId, account_id: AccountId) -> StoreResult<Decimal> {
        self.with_state(|s| Ok(s.committed(budget_id, account_id)))
    }

    async fn total_realized(&self, budget_id: BudgetId, account_id: AccountId) -> StoreResult<Decimal> {
        self.with_state(|s| Ok(s.realized(budget_id, account_id)))
    }

    async fn insert_commitment(&self, commitment: BudgetCommitment, enforce: bool) -> StoreResult<BudgetCommitment> {
        self.with_state(|s| {
            ensure_vacant(&s.commitments, &commitment)?;
            let position = s.spending_position(commitment.company_id, commitment.budget_id, commitment.account_id)?;
            if enforce {
                Availability::controlled(commitment.budget_id, commitment.account_id, position, commitment.amount)
                    .ensure_sufficient()?;
            }
            s.commitments.insert(commitment.id, commitment.clone());
            Ok(commitment)
        })
    }

    async fn insert_realization(
        &self,
        realization: BudgetRealization,
        enforce: bool,
    ) -> StoreResult<BudgetRealization> {
        self.with_state(|s| {
            ensure_vacant(&s.realizations, &realization)?;
            let mut position =
                s.spending_position(realization.company_id, realization.budget_id, realization.account_id)?;

            let linked = match realization.commitment_id {
                Some(cid) => {
                    let mut commitment = scoped(&s.commitments, realization.company_id, cid)?.clone();
                    if commitment.budget_id != realization.budget_id
                        || commitment.account_id != realization.account_id
                    {
                        return Err(DomainError::validation(format!(
                            "commitment {cid} belongs to a different budget line"
                        ))
                        .into());
                    }
                    commitment.mark_realized(realization.realized_at)?;
                    position = position.without_commitment(commitment.amount);
                    Some(commitment)
                }
                None => None,
            };

            if enforce {
                Availability::controlled(realization.budget_id, realization.account_id, position, realization.amount)
                    .ensure_sufficient()?;
            }
            if let Some(commitment) = linked {
                s.commitments.insert(commitment.id, commitment);
            }
            s.realizations.insert(realization.id, realization.clone());
            Ok(realization)
        })
    }

    async fn release_commitment(
        &self,
        company_id: CompanyId,
        id: CommitmentId,
        by: UserId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<BudgetCommitment> {
        self.with_state(|s| {
            let mut commitment = scoped(&s.commitments, company_id, id)?.clone();
            commitment.release(by, reason, at)?;
            s.commitments.insert(id, commitment.clone());
            Ok(commitment)
        })
    }

    async fn adjust_realization(
        &self,
        company_id: CompanyId,
        id: RealizationId,
        new_amount: Decimal,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<BudgetRealization> {
        self.with_state(|s| {
            let mut realization = scoped(&s.realizations, company_id, id)?.clone();
            let previous = realization.adjust(new_amount, reason, at)?;
            let increase = realization.amount - previous;
            if increase > Decimal::ZERO {
                let position = s.spending_position(company_id, realization.budget_id, realization.account_id)?;
                Availability::controlled(realization.budget_id, realization.account_id, position, increase)
                    .ensure_sufficient()?;
            }
            s.realizations.insert(id, realization.clone());
            Ok(realization)
        })
    }

    async fn get_commitment(&self, company_id: CompanyId, id: CommitmentId) -> StoreResult<Option<BudgetCommitment>> {
        self.with_state(|s| Ok(scoped(&s.commitments, company_id, id).ok().cloned()))
    }

    async fn get_realization(
        &self,
        company_id: CompanyId,
        id: RealizationId,
    ) -> StoreResult<Option<BudgetRealization>> {
        self.with_state(|s| Ok(scoped(&s.realizations, company_id, id).ok().cloned()))
    }

    async fn commitments_by_reference(
        &self,
        company_id: CompanyId,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> StoreResult<Vec<BudgetCommitment>> {
        self.with_state(|s| {
            let mut out: Vec<BudgetCommitment> = s
                .commitments
                .values()
                .filter(|c| {
                    c.company_id == company_id
                        && c.reference.reference_type == reference_type
                        && c.reference.reference_id == reference_id
                })
                .cloned()
                .collect();
            out.sort_by_key(|c| (c.committed_at, c.id));
            Ok(out)
        })
    }
}

#[async_trait::async_trait]
impl AutoJournalStore for InMemoryLedgerStore {
    async fn find_config(&self, source_module: &str, transaction_type: &str) -> StoreResult<Option<AutoJournalConfig>> {
        self.with_state(|s| {
            Ok(s.configs
                .get(&(source_module.to_string(), transaction_type.to_string()))
                .cloned())
        })
    }

    async fn upsert_config(&self, config: AutoJournalConfig) -> StoreResult<()> {
        self.with_state(|s| {
            let key = (config.source_module().to_string(), config.transaction_type().to_string());
            s.configs.insert(key, config);
            Ok(())
        })
    }

    async fn insert_log(&self, log: AutoJournalLog) -> StoreResult<AutoJournalLog> {
        self.with_state(|s| {
            ensure_vacant(&s.logs, &log)?;
            let blocked = s.logs.values().any(|l| {
                l.company_id == log.company_id
                    && l.source_module == log.source_module
                    && l.source_id == log.source_id
                    && matches!(l.status, AutoJournalStatus::Pending | AutoJournalStatus::Success)
            });
            if blocked {
                return Err(StoreError::Conflict(format!(
                    "{}:{} already has a pending or successful auto-journal attempt",
                    log.source_module, log.source_id
                )));
            }
            s.logs.insert(log.id, log.clone());
            Ok(log)
        })
    }

    async fn complete_log(&self, log: &AutoJournalLog) -> StoreResult<()> {
        self.with_state(|s| {
            let stored = s
                .logs
                .get_mut(&log.id)
                .ok_or_else(|| AutoJournalLog::not_found(log.id))?;
            if stored.status != AutoJournalStatus::Pending || log.status == AutoJournalStatus::Pending {
                return Err(DomainError::invalid_state(format!(
                    "auto-journal log {} cannot move from {} to {}",
                    log.id,
                    stored.status.as_str(),
                    log.status.as_str()
                ))
                .into());
            }
            *stored = log.clone();
            Ok(())
        })
    }

    async fn logs_by_source(
        &self,
        company_id: CompanyId,
        source_module: &str,
        source_id: &str,
    ) -> StoreResult<Vec<AutoJournalLog>> {
        self.with_state(|s| {
            let mut out: Vec<AutoJournalLog> = s
                .logs
                .values()
                .filter(|l| l.company_id == company_id && l.source_module == source_module && l.source_id == source_id)
                .cloned()
                .collect();
            out.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            Ok(out)
        })
    }

    async fn logs_by_status(
        &self,
        company_id: CompanyId,
        status: AutoJournalStatus,
        limit: usize,
    ) -> StoreResult<Vec<AutoJournalLog>> {
        self.with_state(|s| {
            let mut out: Vec<AutoJournalLog> = s
                .logs
                .values()
                .filter(|l| l.company_id == company_id && l.status == status)
                .cloned()
                .collect();
            out.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            out.truncate(limit);
            Ok(out)
        })
    }
}
