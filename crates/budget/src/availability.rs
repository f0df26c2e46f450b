use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerforge_core::{AccountId, BudgetId, DomainError, DomainResult};

/// Budgeted, committed and realized totals for one `(budget, account)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPosition {
    pub budgeted: Decimal,
    /// Sum of `Active` commitments only.
    pub committed: Decimal,
    /// Sum of all realizations.
    pub realized: Decimal,
}

impl BudgetPosition {
    pub fn new(budgeted: Decimal, committed: Decimal, realized: Decimal) -> Self {
        Self {
            budgeted,
            committed,
            realized,
        }
    }

    pub fn available(&self) -> Decimal {
        self.budgeted - self.committed - self.realized
    }

    /// Position as it will look once an active commitment of `amount` stops counting.
    pub fn without_commitment(self, amount: Decimal) -> Self {
        Self {
            committed: self.committed - amount,
            ..self
        }
    }
}

/// Result of an availability check.
///
/// `controlled == false` means no budget governs the account and the request
/// was allowed by policy; the money fields are then zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub budget_id: Option<BudgetId>,
    pub account_id: AccountId,
    pub budgeted: Decimal,
    pub committed: Decimal,
    pub realized: Decimal,
    pub available: Decimal,
    pub requested: Decimal,
    pub is_available: bool,
    pub shortfall: Decimal,
    pub controlled: bool,
    pub message: Option<String>,
}

impl Availability {
    pub fn controlled(
        budget_id: BudgetId,
        account_id: AccountId,
        position: BudgetPosition,
        requested: Decimal,
    ) -> Self {
        let available = position.available();
        let is_available = requested <= available;
        let shortfall = if is_available { Decimal::ZERO } else { requested - available };
        Self {
            budget_id: Some(budget_id),
            account_id,
            budgeted: position.budgeted,
            committed: position.committed,
            realized: position.realized,
            available,
            requested,
            is_available,
            shortfall,
            controlled: true,
            message: (!is_available)
                .then(|| format!("insufficient budget: requested {requested}, available {available}")),
        }
    }

    /// The budget exists but has no line for the account.
    pub fn account_not_budgeted(budget_id: BudgetId, account_id: AccountId, requested: Decimal) -> Self {
        Self {
            message: Some(format!("account {account_id} is not part of budget {budget_id}")),
            ..Self::controlled(budget_id, account_id, BudgetPosition::default(), requested)
        }
    }

    pub fn uncontrolled(account_id: AccountId, requested: Decimal) -> Self {
        Self {
            budget_id: None,
            account_id,
            budgeted: Decimal::ZERO,
            committed: Decimal::ZERO,
            realized: Decimal::ZERO,
            available: Decimal::ZERO,
            requested,
            is_available: true,
            shortfall: Decimal::ZERO,
            controlled: false,
            message: Some("no active budget for this account; budget control not enforced".to_string()),
        }
    }

    pub fn ensure_sufficient(&self) -> DomainResult<()> {
        if self.is_available {
            return Ok(());
        }
        Err(DomainError::InsufficientBudget {
            requested: self.requested,
            available: self.available,
            shortfall: self.shortfall,
        })
    }
}
