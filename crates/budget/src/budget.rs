use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerforge_core::{AccountId, BudgetId, CompanyId, DomainError, DomainResult, Entity, UserId, round_amount};

/// Budget lifecycle: `Draft -> Active -> Closed`, or `Active -> Revised` when superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BudgetStatus {
    Draft,
    Active,
    Closed,
    Revised,
}

impl BudgetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetStatus::Draft => "DRAFT",
            BudgetStatus::Active => "ACTIVE",
            BudgetStatus::Closed => "CLOSED",
            BudgetStatus::Revised => "REVISED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(BudgetStatus::Draft),
            "ACTIVE" => Some(BudgetStatus::Active),
            "CLOSED" => Some(BudgetStatus::Closed),
            "REVISED" => Some(BudgetStatus::Revised),
            _ => None,
        }
    }

    pub fn can_transition_to(self, to: BudgetStatus) -> bool {
        matches!(
            (self, to),
            (BudgetStatus::Draft, BudgetStatus::Active)
                | (BudgetStatus::Active, BudgetStatus::Closed)
                | (BudgetStatus::Active, BudgetStatus::Revised)
        )
    }
}

impl core::fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetType {
    Annual,
    Quarterly,
    Monthly,
    Project,
}

impl BudgetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetType::Annual => "ANNUAL",
            BudgetType::Quarterly => "QUARTERLY",
            BudgetType::Monthly => "MONTHLY",
            BudgetType::Project => "PROJECT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ANNUAL" => Some(BudgetType::Annual),
            "QUARTERLY" => Some(BudgetType::Quarterly),
            "MONTHLY" => Some(BudgetType::Monthly),
            "PROJECT" => Some(BudgetType::Project),
            _ => None,
        }
    }
}

/// Approved amount for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLine {
    pub account_id: AccountId,
    pub budgeted_amount: Decimal,
}

impl BudgetLine {
    pub fn new(account_id: AccountId, budgeted_amount: Decimal) -> Self {
        Self {
            account_id,
            budgeted_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBudget {
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
    pub fiscal_year: i32,
    pub budget_type: BudgetType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub lines: Vec<BudgetLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: BudgetId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
    pub fiscal_year: i32,
    pub budget_type: BudgetType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: BudgetStatus,
    /// The budget this one supersedes.
    pub revision_of: Option<BudgetId>,
    pub lines: Vec<BudgetLine>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Budget {
    type Id = BudgetId;
    const KIND: &'static str = "budget";

    fn id(&self) -> BudgetId {
        self.id
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

fn validate_new_budget(new: &NewBudget) -> DomainResult<()> {
    let mut violations = Vec::new();
    if new.code.trim().is_empty() {
        violations.push("budget code is required".to_string());
    }
    if new.name.trim().is_empty() {
        violations.push("budget name is required".to_string());
    }
    if new.period_end < new.period_start {
        violations.push(format!(
            "period end {} is before period start {}",
            new.period_end, new.period_start
        ));
    }
    if new.lines.is_empty() {
        violations.push("a budget needs at least one line".to_string());
    }
    let mut seen = HashSet::new();
    for line in &new.lines {
        if line.budgeted_amount.is_sign_negative() {
            violations.push(format!("account {}: budgeted amount must not be negative", line.account_id));
        }
        if !seen.insert(line.account_id) {
            violations.push(format!("account {} appears more than once", line.account_id));
        }
    }
    DomainError::from_violations(violations)
}

impl Budget {
    pub fn draft(id: BudgetId, new: NewBudget, created_by: UserId, now: DateTime<Utc>) -> DomainResult<Self> {
        validate_new_budget(&new)?;
        let lines = new
            .lines
            .into_iter()
            .map(|l| BudgetLine::new(l.account_id, round_amount(l.budgeted_amount)))
            .collect();
        Ok(Self {
            id,
            company_id: new.company_id,
            code: new.code,
            name: new.name,
            fiscal_year: new.fiscal_year,
            budget_type: new.budget_type,
            period_start: new.period_start,
            period_end: new.period_end,
            status: BudgetStatus::Draft,
            revision_of: None,
            lines,
            created_by,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build the active budget that supersedes this one.
    ///
    /// The caller must store it together with moving this budget to `Revised`.
    pub fn revision(
        &self,
        id: BudgetId,
        new: NewBudget,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if self.status != BudgetStatus::Active {
            return Err(DomainError::invalid_state(format!(
                "only active budgets can be revised (budget {} is {})",
                self.id, self.status
            )));
        }
        if new.company_id != self.company_id {
            return Err(DomainError::validation("a revision must belong to the same company"));
        }
        let mut next = Self::draft(id, new, created_by, now)?;
        next.revision_of = Some(self.id);
        next.status = BudgetStatus::Active;
        Ok(next)
    }

    pub fn budgeted_for(&self, account_id: AccountId) -> Option<Decimal> {
        self.lines
            .iter()
            .find(|l| l.account_id == account_id)
            .map(|l| l.budgeted_amount)
    }

    pub fn total_budgeted(&self) -> Decimal {
        self.lines.iter().map(|l| l.budgeted_amount).sum()
    }

    pub fn ensure_transition(&self, to: BudgetStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_state(format!(
                "budget {} cannot move from {} to {to}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn transition(&mut self, to: BudgetStatus, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_transition(to)?;
        self.status = to;
        self.updated_at = at;
        Ok(())
    }

    /// Commitments and realizations are only accepted against active budgets.
    pub fn ensure_accepts_spending(&self) -> DomainResult<()> {
        if self.status != BudgetStatus::Active {
            return Err(DomainError::invalid_state(format!(
                "budget {} is {} and does not accept commitments or realizations",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_budget(lines: Vec<BudgetLine>) -> NewBudget {
        NewBudget {
            company_id: CompanyId::new(),
            code: "OPEX-2026".into(),
            name: "Operating 2026".into(),
            fiscal_year: 2026,
            budget_type: BudgetType::Annual,
            period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            lines,
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let account = AccountId::new();
        let mut b = Budget::draft(
            BudgetId::new(),
            new_budget(vec![BudgetLine::new(account, dec!(1000000))]),
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        assert!(b.ensure_accepts_spending().is_err());
        assert!(b.transition(BudgetStatus::Closed, Utc::now()).is_err());

        b.transition(BudgetStatus::Active, Utc::now()).unwrap();
        b.ensure_accepts_spending().unwrap();
        assert_eq!(b.budgeted_for(account), Some(dec!(1000000)));
        assert_eq!(b.budgeted_for(AccountId::new()), None);

        b.transition(BudgetStatus::Closed, Utc::now()).unwrap();
        assert!(matches!(
            b.transition(BudgetStatus::Active, Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn duplicate_accounts_and_negative_amounts_are_rejected() {
        let account = AccountId::new();
        let mut new = new_budget(vec![
            BudgetLine::new(account, dec!(10)),
            BudgetLine::new(account, dec!(-1)),
        ]);
        new.code = String::new();
        let Err(DomainError::Validation(v)) = Budget::draft(BudgetId::new(), new, UserId::new(), Utc::now()) else {
            panic!("expected validation error");
        };
        assert_eq!(v.len(), 3, "{v:?}");
    }

    #[test]
    fn revision_requires_active_and_links_prior() {
        let account = AccountId::new();
        let mut b = Budget::draft(
            BudgetId::new(),
            new_budget(vec![BudgetLine::new(account, dec!(100))]),
            UserId::new(),
            Utc::now(),
        )
        .unwrap();

        let mut next = new_budget(vec![BudgetLine::new(account, dec!(150))]);
        next.company_id = b.company_id;
        assert!(b.revision(BudgetId::new(), next.clone(), UserId::new(), Utc::now()).is_err());

        b.transition(BudgetStatus::Active, Utc::now()).unwrap();
        let rev = b.revision(BudgetId::new(), next, UserId::new(), Utc::now()).unwrap();
        assert_eq!(rev.revision_of, Some(b.id));
        assert_eq!(rev.status, BudgetStatus::Active);
        b.transition(BudgetStatus::Revised, Utc::now()).unwrap();
        assert_eq!(rev.total_budgeted(), dec!(150));
    }
}
