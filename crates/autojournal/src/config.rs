//! Auto-journal configuration: posting rules keyed by `(source module, transaction type)`.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerforge_core::{AccountId, DomainError, DomainResult};
use ledgerforge_journal::{NewJournalEntry, NewJournalLine, Side, SourceRef};

use crate::request::{AmountField, TransactionRequest};
use crate::template::{TemplateContext, render, unknown_placeholders};

/// Where a rule takes its amount from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountSource {
    Field(AmountField),
    /// `field - minus`, e.g. revenue = total - tax.
    Difference { field: AmountField, minus: AmountField },
}

impl AmountSource {
    pub fn resolve(&self, request: &dyn TransactionRequest) -> DomainResult<Decimal> {
        let read = |f: AmountField| {
            request.amount(f).ok_or_else(|| {
                DomainError::validation(format!(
                    "{} transaction does not carry field {f}",
                    request.source_module()
                ))
            })
        };
        match self {
            AmountSource::Field(f) => read(*f),
            AmountSource::Difference { field, minus } => Ok(read(*field)? - read(*minus)?),
        }
    }
}

impl core::fmt::Display for AmountSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AmountSource::Field(field) => write!(f, "{field}"),
            AmountSource::Difference { field, minus } => write!(f, "{field} - {minus}"),
        }
    }
}

/// One line template: which account role, which amount, which side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRule {
    pub role: String,
    pub amount: AmountSource,
    pub side: Side,
    #[serde(default)]
    pub description_template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAutoJournalConfig {
    source_module: String,
    transaction_type: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_active")]
    is_active: bool,
    accounts: BTreeMap<String, AccountId>,
    rules: Vec<PostingRule>,
}

fn default_active() -> bool {
    true
}

/// Validated mapping. Instances only exist if every rule checks out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAutoJournalConfig")]
pub struct AutoJournalConfig {
    source_module: String,
    transaction_type: String,
    description: String,
    is_active: bool,
    accounts: BTreeMap<String, AccountId>,
    rules: Vec<PostingRule>,
}

impl TryFrom<RawAutoJournalConfig> for AutoJournalConfig {
    type Error = DomainError;

    fn try_from(raw: RawAutoJournalConfig) -> Result<Self, Self::Error> {
        Self::new(
            raw.source_module,
            raw.transaction_type,
            raw.description,
            raw.is_active,
            raw.accounts,
            raw.rules,
        )
    }
}

impl AutoJournalConfig {
    pub fn new(
        source_module: impl Into<String>,
        transaction_type: impl Into<String>,
        description: impl Into<String>,
        is_active: bool,
        accounts: BTreeMap<String, AccountId>,
        rules: Vec<PostingRule>,
    ) -> DomainResult<Self> {
        let config = Self {
            source_module: source_module.into(),
            transaction_type: transaction_type.into(),
            description: description.into(),
            is_active,
            accounts,
            rules,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> DomainResult<Self> {
        serde_json::from_str(json).map_err(|e| DomainError::validation(format!("invalid auto-journal config: {e}")))
    }

    fn validate(&self) -> DomainResult<()> {
        let mut violations = Vec::new();
        if self.source_module.trim().is_empty() {
            violations.push("source module is required".to_string());
        }
        if self.transaction_type.trim().is_empty() {
            violations.push("transaction type is required".to_string());
        }
        if !self.rules.iter().any(|r| r.side == Side::Debit) {
            violations.push("at least one debit rule is required".to_string());
        }
        if !self.rules.iter().any(|r| r.side == Side::Credit) {
            violations.push("at least one credit rule is required".to_string());
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            let n = idx + 1;
            if !self.accounts.contains_key(&rule.role) {
                violations.push(format!("rule {n}: account role '{}' is not mapped", rule.role));
            }
            for name in unknown_placeholders(&rule.description_template) {
                violations.push(format!("rule {n}: unknown placeholder {{{name}}}"));
            }
        }
        DomainError::from_violations(violations)
    }

    pub fn source_module(&self) -> &str {
        &self.source_module
    }

    pub fn transaction_type(&self) -> &str {
        &self.transaction_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    pub fn accounts(&self) -> &BTreeMap<String, AccountId> {
        &self.accounts
    }

    pub fn rules(&self) -> &[PostingRule] {
        &self.rules
    }

    /// Resolve every rule against `request`.
    ///
    /// Zero amounts produce no line. Negative amounts and missing fields are
    /// collected and returned together. Balance is not checked here.
    pub fn build_lines(
        &self,
        request: &dyn TransactionRequest,
        ctx: &TemplateContext<'_>,
    ) -> DomainResult<Vec<NewJournalLine>> {
        let mut lines = Vec::with_capacity(self.rules.len());
        let mut violations = Vec::new();

        for (idx, rule) in self.rules.iter().enumerate() {
            let n = idx + 1;
            let amount = match rule.amount.resolve(request) {
                Ok(a) => a,
                Err(DomainError::Validation(v)) => {
                    violations.extend(v.into_iter().map(|m| format!("rule {n}: {m}")));
                    continue;
                }
                Err(other) => return Err(other),
            };
            if amount.is_zero() {
                continue;
            }
            if amount.is_sign_negative() {
                violations.push(format!("rule {n}: amount {} resolved to {amount}", rule.amount));
                continue;
            }
            let Some(account_id) = self.accounts.get(&rule.role) else {
                violations.push(format!("rule {n}: account role '{}' is not mapped", rule.role));
                continue;
            };
            lines.push(NewJournalLine::new(
                *account_id,
                rule.side,
                amount,
                render(&rule.description_template, ctx),
            ));
        }

        DomainError::from_violations(violations)?;
        Ok(lines)
    }

    /// Build the journal entry for one request.
    pub fn build_entry(&self, request: &dyn TransactionRequest) -> DomainResult<NewJournalEntry> {
        let header = request.header();
        let ctx = TemplateContext {
            source_module: &self.source_module,
            transaction_type: &self.transaction_type,
            source_id: &header.source_id,
            reference: header.reference.as_deref().unwrap_or_default(),
            description: &header.description,
        };
        let lines = self.build_lines(request, &ctx)?;
        let description = if header.description.trim().is_empty() {
            format!("{} {} {}", self.source_module, self.transaction_type, header.source_id)
        } else {
            header.description.clone()
        };

        Ok(NewJournalEntry {
            company_id: header.company_id,
            entry_date: Some(header.transaction_date),
            description,
            reference: header.reference.clone(),
            currency_code: header.currency_code.clone(),
            exchange_rate: Some(header.exchange_rate),
            source: Some(SourceRef::new(&self.source_module, &header.source_id)),
            lines,
        })
    }
}
