//! Runtime configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use ledgerforge_budget::{BudgetPolicy, MissingBudgetPolicy};
use ledgerforge_core::is_valid_currency_code;
use ledgerforge_journal::{DEFAULT_ENTRY_PREFIX, EntryNumberFormat};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub entry_prefix: String,
    pub base_currency: String,
    pub budget_policy: BudgetPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            entry_prefix: DEFAULT_ENTRY_PREFIX.to_string(),
            base_currency: "IDR".to_string(),
            budget_policy: BudgetPolicy::default(),
        }
    }
}

impl LedgerConfig {
    /// Read `DATABASE_URL`, `LEDGER_ENTRY_PREFIX`, `LEDGER_BASE_CURRENCY`,
    /// `LEDGER_MISSING_BUDGET_POLICY` and `LEDGER_ALLOW_COMMIT_OVERRIDE`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let entry_prefix = lookup("LEDGER_ENTRY_PREFIX").unwrap_or(defaults.entry_prefix);

        let base_currency = lookup("LEDGER_BASE_CURRENCY").unwrap_or(defaults.base_currency);
        if !is_valid_currency_code(&base_currency) {
            anyhow::bail!("LEDGER_BASE_CURRENCY must be a 3-letter uppercase code, got '{base_currency}'");
        }

        let missing_budget = match lookup("LEDGER_MISSING_BUDGET_POLICY") {
            Some(raw) => MissingBudgetPolicy::parse(&raw)
                .with_context(|| format!("LEDGER_MISSING_BUDGET_POLICY must be 'allow' or 'deny', got '{raw}'"))?,
            None => defaults.budget_policy.missing_budget,
        };
        let allow_commit_override = match lookup("LEDGER_ALLOW_COMMIT_OVERRIDE") {
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .with_context(|| format!("LEDGER_ALLOW_COMMIT_OVERRIDE must be true or false, got '{raw}'"))?,
            None => defaults.budget_policy.allow_commit_override,
        };

        Ok(Self {
            database_url,
            entry_prefix,
            base_currency,
            budget_policy: BudgetPolicy {
                missing_budget,
                allow_commit_override,
            },
        })
    }

    pub fn entry_numbering(&self) -> EntryNumberFormat {
        EntryNumberFormat::new(self.entry_prefix.clone())
    }
}
