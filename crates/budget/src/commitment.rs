//! Commitments (reserved funds) and realizations (actual spend).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerforge_core::{
    AccountId, BudgetId, CommitmentId, CompanyId, DomainError, DomainResult, Entity, RealizationId, UserId,
    round_amount,
};

/// Kind of business document a commitment or realization points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    PurchaseRequest,
    PurchaseOrder,
    GoodsReceipt,
    SupplierInvoice,
    Payment,
    JournalEntry,
    Manual,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::PurchaseRequest => "PURCHASE_REQUEST",
            ReferenceType::PurchaseOrder => "PURCHASE_ORDER",
            ReferenceType::GoodsReceipt => "GOODS_RECEIPT",
            ReferenceType::SupplierInvoice => "SUPPLIER_INVOICE",
            ReferenceType::Payment => "PAYMENT",
            ReferenceType::JournalEntry => "JOURNAL_ENTRY",
            ReferenceType::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            ReferenceType::PurchaseRequest,
            ReferenceType::PurchaseOrder,
            ReferenceType::GoodsReceipt,
            ReferenceType::SupplierInvoice,
            ReferenceType::Payment,
            ReferenceType::JournalEntry,
            ReferenceType::Manual,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }
}

/// Pointer to the originating document (e.g. the purchase order being approved).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub reference_number: String,
}

impl DocumentRef {
    pub fn new(
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        reference_number: impl Into<String>,
    ) -> Self {
        Self {
            reference_type,
            reference_id: reference_id.into(),
            reference_number: reference_number.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommitmentStatus {
    Active,
    Realized,
    Released,
}

impl CommitmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentStatus::Active => "ACTIVE",
            CommitmentStatus::Realized => "REALIZED",
            CommitmentStatus::Released => "RELEASED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(CommitmentStatus::Active),
            "REALIZED" => Some(CommitmentStatus::Realized),
            "RELEASED" => Some(CommitmentStatus::Released),
            _ => None,
        }
    }
}

impl core::fmt::Display for CommitmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `amount` must already be rounded to the stored scale.
fn require_positive(amount: Decimal, out: &mut Vec<String>) {
    if amount <= Decimal::ZERO {
        out.push(format!("amount must be positive (got {amount})"));
    }
}

fn require_reference(reference: &DocumentRef, out: &mut Vec<String>) {
    if reference.reference_id.trim().is_empty() {
        out.push("reference id is required".to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCommitment {
    pub id: CommitmentId,
    pub company_id: CompanyId,
    pub budget_id: BudgetId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub reference: DocumentRef,
    pub description: String,
    pub status: CommitmentStatus,
    pub committed_by: UserId,
    pub committed_at: DateTime<Utc>,
    pub realized_at: Option<DateTime<Utc>>,
    pub released_by: Option<UserId>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,
}

impl Entity for BudgetCommitment {
    type Id = CommitmentId;
    const KIND: &'static str = "commitment";

    fn id(&self) -> CommitmentId {
        self.id
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

impl BudgetCommitment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: CommitmentId,
        company_id: CompanyId,
        budget_id: BudgetId,
        account_id: AccountId,
        amount: Decimal,
        reference: DocumentRef,
        description: impl Into<String>,
        committed_by: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let amount = round_amount(amount);
        let mut violations = Vec::new();
        require_positive(amount, &mut violations);
        require_reference(&reference, &mut violations);
        DomainError::from_violations(violations)?;

        Ok(Self {
            id,
            company_id,
            budget_id,
            account_id,
            amount,
            reference,
            description: description.into(),
            status: CommitmentStatus::Active,
            committed_by,
            committed_at: at,
            realized_at: None,
            released_by: None,
            released_at: None,
            release_reason: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == CommitmentStatus::Active
    }

    /// `Realized` and `Released` are terminal.
    pub fn ensure_active(&self) -> DomainResult<()> {
        match self.status {
            CommitmentStatus::Active => Ok(()),
            CommitmentStatus::Released => Err(DomainError::AlreadyReleased(self.id.to_string())),
            CommitmentStatus::Realized => Err(DomainError::AlreadyRealized(self.id.to_string())),
        }
    }

    pub fn release(&mut self, by: UserId, reason: &str, at: DateTime<Utc>) -> DomainResult<()> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("a release reason is required"));
        }
        self.ensure_active()?;
        self.status = CommitmentStatus::Released;
        self.released_by = Some(by);
        self.released_at = Some(at);
        self.release_reason = Some(reason.trim().to_string());
        Ok(())
    }

    pub fn mark_realized(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.status = CommitmentStatus::Realized;
        self.realized_at = Some(at);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRealization {
    pub id: RealizationId,
    pub company_id: CompanyId,
    pub budget_id: BudgetId,
    pub account_id: AccountId,
    /// Linking a commitment marks it `Realized` in the same transaction.
    pub commitment_id: Option<CommitmentId>,
    pub amount: Decimal,
    pub reference: DocumentRef,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub realized_by: UserId,
    pub realized_at: DateTime<Utc>,
    pub adjusted_at: Option<DateTime<Utc>>,
}

impl Entity for BudgetRealization {
    type Id = RealizationId;
    const KIND: &'static str = "realization";

    fn id(&self) -> RealizationId {
        self.id
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

impl BudgetRealization {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RealizationId,
        company_id: CompanyId,
        budget_id: BudgetId,
        account_id: AccountId,
        commitment_id: Option<CommitmentId>,
        amount: Decimal,
        reference: DocumentRef,
        description: impl Into<String>,
        transaction_date: NaiveDate,
        realized_by: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let amount = round_amount(amount);
        let mut violations = Vec::new();
        require_positive(amount, &mut violations);
        require_reference(&reference, &mut violations);
        DomainError::from_violations(violations)?;

        Ok(Self {
            id,
            company_id,
            budget_id,
            account_id,
            commitment_id,
            amount,
            reference,
            description: description.into(),
            transaction_date,
            realized_by,
            realized_at: at,
            adjusted_at: None,
        })
    }

    /// Rewrite the amount and record the reason in the description.
    ///
    /// Returns the previous amount.
    pub fn adjust(&mut self, new_amount: Decimal, reason: &str, at: DateTime<Utc>) -> DomainResult<Decimal> {
        let new_amount = round_amount(new_amount);
        let mut violations = Vec::new();
        require_positive(new_amount, &mut violations);
        if reason.trim().is_empty() {
            violations.push("an adjustment reason is required".to_string());
        }
        DomainError::from_violations(violations)?;

        let previous = self.amount;
        self.amount = new_amount;
        self.description = adjusted_description(&self.description, reason);
        self.adjusted_at = Some(at);
        Ok(previous)
    }
}

/// `"<description> [Adjusted: <reason>]"`
pub fn adjusted_description(description: &str, reason: &str) -> String {
    format!("{description} [Adjusted: {}]", reason.trim())
}
