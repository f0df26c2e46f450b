use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerforge_core::{AccountId, BudgetId, round_amount};

use crate::availability::BudgetPosition;
use crate::budget::{Budget, BudgetStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLineSummary {
    pub account_id: AccountId,
    pub position: BudgetPosition,
    pub available: Decimal,
    /// `(committed + realized) / budgeted` in percent, 2 dp; zero when nothing is budgeted.
    pub utilisation: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub budget_id: BudgetId,
    pub code: String,
    pub fiscal_year: i32,
    pub status: BudgetStatus,
    pub lines: Vec<BudgetLineSummary>,
    pub totals: BudgetPosition,
    pub total_available: Decimal,
    pub utilisation: Decimal,
}

fn utilisation(position: &BudgetPosition) -> Decimal {
    if position.budgeted.is_zero() {
        return Decimal::ZERO;
    }
    round_amount((position.committed + position.realized) * Decimal::ONE_HUNDRED / position.budgeted)
}

impl BudgetSummary {
    /// `positions` must follow the order of `budget.lines`.
    pub fn new(budget: &Budget, positions: Vec<(AccountId, BudgetPosition)>) -> Self {
        let lines: Vec<BudgetLineSummary> = positions
            .into_iter()
            .map(|(account_id, position)| BudgetLineSummary {
                account_id,
                available: position.available(),
                utilisation: utilisation(&position),
                position,
            })
            .collect();
        let totals = lines.iter().fold(BudgetPosition::default(), |acc, l| {
            BudgetPosition::new(
                acc.budgeted + l.position.budgeted,
                acc.committed + l.position.committed,
                acc.realized + l.position.realized,
            )
        });
        Self {
            budget_id: budget.id,
            code: budget.code.clone(),
            fiscal_year: budget.fiscal_year,
            status: budget.status,
            lines,
            total_available: totals.available(),
            utilisation: utilisation(&totals),
            totals,
        }
    }
}
