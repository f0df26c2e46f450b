//! Budget control ledger.
//!
//! `check_availability` is advisory. The safe primitive is `commit`/`realize`:
//! the store re-validates availability inside the inserting transaction, so
//! concurrent callers can never oversell a budget line.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use ledgerforge_budget::{
    Availability, Budget, BudgetCommitment, BudgetPolicy, BudgetRealization, BudgetStatus, BudgetSummary,
    CommitMode, DocumentRef, NewBudget, ReferenceType,
};
use ledgerforge_core::{
    AccountId, BudgetId, CommitmentId, CompanyId, DomainError, DomainResult, RealizationId, UserId,
    round_amount,
};

use crate::error::LedgerResult;
use crate::store::BudgetStore;

/// Reserve budget for a document that will be spent later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub company_id: CompanyId,
    pub account_id: AccountId,
    pub amount: Decimal,
    /// Used to find the active budget when `budget_id` is not given.
    pub fiscal_year: i32,
    pub budget_id: Option<BudgetId>,
    pub reference: DocumentRef,
    pub description: String,
    pub committed_by: UserId,
    #[serde(default)]
    pub mode: CommitMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    Committed(BudgetCommitment),
    /// No budget governs the account and policy allows the spend.
    Uncontrolled(Availability),
}

/// Record actual spend, optionally consuming an active commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizeRequest {
    pub company_id: CompanyId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub fiscal_year: i32,
    pub budget_id: Option<BudgetId>,
    pub commitment_id: Option<CommitmentId>,
    pub reference: DocumentRef,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub realized_by: UserId,
    #[serde(default)]
    pub mode: CommitMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealizeOutcome {
    Realized(BudgetRealization),
    Uncontrolled(Availability),
}

/// Positive once rounded to the stored scale.
fn require_positive(amount: Decimal) -> DomainResult<()> {
    if round_amount(amount) <= Decimal::ZERO {
        return Err(DomainError::validation(format!("amount must be positive (got {amount})")));
    }
    Ok(())
}

pub struct BudgetLedger<S> {
    store: Arc<S>,
    policy: BudgetPolicy,
}

impl<S> Clone for BudgetLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
        }
    }
}

impl<S> BudgetLedger<S>
where
    S: BudgetStore,
{
    pub fn new(store: Arc<S>, policy: BudgetPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    /// Budget that governs `account_id`: the explicit one, or the active budget of the year.
    async fn resolve_budget(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        fiscal_year: i32,
        budget_id: Option<BudgetId>,
    ) -> LedgerResult<Option<Budget>> {
        match budget_id {
            Some(id) => Ok(Some(self.get_budget(company_id, id).await?)),
            None => Ok(self.store.find_active_budget(company_id, account_id, fiscal_year).await?),
        }
    }

    #[instrument(skip(self), fields(company_id = %company_id, account_id = %account_id, amount = %amount), err)]
    pub async fn check_availability(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        amount: Decimal,
        fiscal_year: i32,
        budget_id: Option<BudgetId>,
    ) -> LedgerResult<Availability> {
        require_positive(amount)?;
        let Some(budget) = self.resolve_budget(company_id, account_id, fiscal_year, budget_id).await? else {
            return Ok(self.policy.when_missing(account_id, amount)?);
        };
        // Only active budgets take spending.
        budget.ensure_accepts_spending()?;
        if budget.budgeted_for(account_id).is_none() {
            return Ok(Availability::account_not_budgeted(budget.id, account_id, amount));
        }
        let position = self.store.position(&budget, account_id).await?;
        Ok(Availability::controlled(budget.id, account_id, position, amount))
    }

    #[instrument(
        skip(self, request),
        fields(
            company_id = %request.company_id,
            account_id = %request.account_id,
            amount = %request.amount,
            mode = ?request.mode
        ),
        err
    )]
    pub async fn commit(&self, request: CommitRequest) -> LedgerResult<CommitOutcome> {
        require_positive(request.amount)?;
        let enforce = self.policy.enforce(request.mode)?;
        let budget = self
            .resolve_budget(request.company_id, request.account_id, request.fiscal_year, request.budget_id)
            .await?;
        let Some(budget) = budget else {
            let availability = self.policy.when_missing(request.account_id, request.amount)?;
            info!("commit outside budget control");
            return Ok(CommitOutcome::Uncontrolled(availability));
        };

        let commitment = BudgetCommitment::new(
            CommitmentId::new(),
            request.company_id,
            budget.id,
            request.account_id,
            request.amount,
            request.reference,
            request.description,
            request.committed_by,
            Utc::now(),
        )?;
        let commitment = self.store.insert_commitment(commitment, enforce).await?;
        info!(
            commitment_id = %commitment.id,
            budget_id = %commitment.budget_id,
            overridden = !enforce,
            "budget committed"
        );
        Ok(CommitOutcome::Committed(commitment))
    }

    #[instrument(
        skip(self, request),
        fields(
            company_id = %request.company_id,
            account_id = %request.account_id,
            amount = %request.amount,
            commitment_id = ?request.commitment_id
        ),
        err
    )]
    pub async fn realize(&self, request: RealizeRequest) -> LedgerResult<RealizeOutcome> {
        require_positive(request.amount)?;
        let enforce = self.policy.enforce(request.mode)?;

        let budget_id = match (request.budget_id, request.commitment_id) {
            (Some(id), _) => Some(id),
            (None, Some(cid)) => Some(self.get_commitment(request.company_id, cid).await?.budget_id),
            (None, None) => None,
        };
        let budget = self
            .resolve_budget(request.company_id, request.account_id, request.fiscal_year, budget_id)
            .await?;
        let Some(budget) = budget else {
            let availability = self.policy.when_missing(request.account_id, request.amount)?;
            info!("realization outside budget control");
            return Ok(RealizeOutcome::Uncontrolled(availability));
        };

        let realization = BudgetRealization::new(
            RealizationId::new(),
            request.company_id,
            budget.id,
            request.account_id,
            request.commitment_id,
            request.amount,
            request.reference,
            request.description,
            request.transaction_date,
            request.realized_by,
            Utc::now(),
        )?;
        let realization = self.store.insert_realization(realization, enforce).await?;
        info!(
            realization_id = %realization.id,
            budget_id = %realization.budget_id,
            "budget realized"
        );
        Ok(RealizeOutcome::Realized(realization))
    }

    #[instrument(skip(self, reason), fields(company_id = %company_id, commitment_id = %id), err)]
    pub async fn release(
        &self,
        company_id: CompanyId,
        id: CommitmentId,
        by: UserId,
        reason: &str,
    ) -> LedgerResult<BudgetCommitment> {
        let commitment = self
            .store
            .release_commitment(company_id, id, by, reason, Utc::now())
            .await?;
        info!(commitment_id = %id, reason = reason.trim(), "budget commitment released");
        Ok(commitment)
    }

    /// Rewrite a realization's amount; the reason is appended to its description.
    #[instrument(skip(self, reason), fields(company_id = %company_id, realization_id = %id), err)]
    pub async fn adjust_realization(
        &self,
        company_id: CompanyId,
        id: RealizationId,
        new_amount: Decimal,
        reason: &str,
    ) -> LedgerResult<BudgetRealization> {
        let previous = self.get_realization(company_id, id).await?.amount;
        let realization = self
            .store
            .adjust_realization(company_id, id, new_amount, reason, Utc::now())
            .await?;
        info!(
            realization_id = %id,
            previous = %previous,
            amount = %realization.amount,
            reason = reason.trim(),
            "budget realization adjusted"
        );
        Ok(realization)
    }

    #[instrument(skip(self, new), fields(company_id = %new.company_id, code = %new.code), err)]
    pub async fn create_budget(&self, new: NewBudget, created_by: UserId) -> LedgerResult<Budget> {
        let budget = Budget::draft(BudgetId::new(), new, created_by, Utc::now())?;
        Ok(self.store.insert_budget(budget).await?)
    }

    pub async fn activate_budget(&self, company_id: CompanyId, id: BudgetId) -> LedgerResult<Budget> {
        self.set_status(company_id, id, BudgetStatus::Active).await
    }

    pub async fn close_budget(&self, company_id: CompanyId, id: BudgetId) -> LedgerResult<Budget> {
        self.set_status(company_id, id, BudgetStatus::Closed).await
    }

    #[instrument(skip(self), fields(company_id = %company_id, budget_id = %id, to = to.as_str()), err)]
    async fn set_status(&self, company_id: CompanyId, id: BudgetId, to: BudgetStatus) -> LedgerResult<Budget> {
        let budget = self.store.set_budget_status(company_id, id, to, Utc::now()).await?;
        info!(budget_id = %id, status = budget.status.as_str(), "budget status changed");
        Ok(budget)
    }

    /// Replace an active budget. The prior becomes `Revised`; its commitments stay with it.
    #[instrument(skip(self, new), fields(company_id = %company_id, budget_id = %id), err)]
    pub async fn revise_budget(
        &self,
        company_id: CompanyId,
        id: BudgetId,
        new: NewBudget,
        created_by: UserId,
    ) -> LedgerResult<Budget> {
        let prior = self.get_budget(company_id, id).await?;
        let now = Utc::now();
        let revision = prior.revision(BudgetId::new(), new, created_by, now)?;
        let revision = self.store.revise_budget(revision, now).await?;
        info!(budget_id = %id, revision_id = %revision.id, "budget revised");
        Ok(revision)
    }

    pub async fn budget_summary(&self, company_id: CompanyId, id: BudgetId) -> LedgerResult<BudgetSummary> {
        let budget = self.get_budget(company_id, id).await?;
        let mut positions = Vec::with_capacity(budget.lines.len());
        for line in &budget.lines {
            positions.push((line.account_id, self.store.position(&budget, line.account_id).await?));
        }
        Ok(BudgetSummary::new(&budget, positions))
    }

    pub async fn get_budget(&self, company_id: CompanyId, id: BudgetId) -> LedgerResult<Budget> {
        self.store
            .get_budget(company_id, id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("budget {id}")).into())
    }

    pub async fn get_commitment(&self, company_id: CompanyId, id: CommitmentId) -> LedgerResult<BudgetCommitment> {
        self.store
            .get_commitment(company_id, id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("commitment {id}")).into())
    }

    pub async fn get_realization(&self, company_id: CompanyId, id: RealizationId) -> LedgerResult<BudgetRealization> {
        self.store
            .get_realization(company_id, id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("realization {id}")).into())
    }

    pub async fn commitments_for_reference(
        &self,
        company_id: CompanyId,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> LedgerResult<Vec<BudgetCommitment>> {
        Ok(self
            .store
            .commitments_by_reference(company_id, reference_type, reference_id)
            .await?)
    }
}
