use serde::{Deserialize, Serialize};

use rust_decimal::Decimal;

use ledgerforge_core::{AccountId, DomainError, DomainResult};

use crate::availability::Availability;

/// What to do when no active budget governs an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingBudgetPolicy {
    /// Treat the request as available and uncontrolled.
    #[default]
    Allow,
    /// Reject with `NotFound`.
    Deny,
}

impl MissingBudgetPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(MissingBudgetPolicy::Allow),
            "deny" => Some(MissingBudgetPolicy::Deny),
            _ => None,
        }
    }
}

/// How a commit treats the availability check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Re-check availability inside the inserting transaction.
    #[default]
    Enforce,
    /// Commit even past the available amount. Requires `allow_commit_override`.
    Override,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub missing_budget: MissingBudgetPolicy,
    pub allow_commit_override: bool,
}

impl BudgetPolicy {
    /// Whether the store must enforce availability for a commit in `mode`.
    pub fn enforce(&self, mode: CommitMode) -> DomainResult<bool> {
        match mode {
            CommitMode::Enforce => Ok(true),
            CommitMode::Override if self.allow_commit_override => Ok(false),
            CommitMode::Override => Err(DomainError::invalid_state(
                "commit override is disabled by budget policy",
            )),
        }
    }

    pub fn when_missing(&self, account_id: AccountId, requested: Decimal) -> DomainResult<Availability> {
        match self.missing_budget {
            MissingBudgetPolicy::Allow => Ok(Availability::uncontrolled(account_id, requested)),
            MissingBudgetPolicy::Deny => Err(DomainError::not_found(format!(
                "no active budget for account {account_id}"
            ))),
        }
    }
}
