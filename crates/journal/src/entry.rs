use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerforge_core::{
    AccountId, CompanyId, CurrencyLevel, DomainError, DomainResult, Entity, JournalEntryId, UserId,
    is_valid_currency_code, round_amount, to_base,
};

/// Journal entry status lifecycle.
///
/// `Draft` is editable, `Posted` only changes through a reversal, `Reversed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalEntryStatus {
    Draft,
    Posted,
    Reversed,
}

impl JournalEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalEntryStatus::Draft => "draft",
            JournalEntryStatus::Posted => "posted",
            JournalEntryStatus::Reversed => "reversed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(JournalEntryStatus::Draft),
            "posted" => Some(JournalEntryStatus::Posted),
            "reversed" => Some(JournalEntryStatus::Reversed),
            _ => None,
        }
    }
}

impl core::fmt::Display for JournalEntryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Debit or credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }
}

/// Back-reference to the business event that produced an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// e.g. "SALES", "PURCHASE".
    pub module: String,
    /// Identifier of the originating document in that module.
    pub id: String,
}

impl SourceRef {
    pub fn new(module: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            id: id.into(),
        }
    }
}

/// Caller-supplied line, before numbering and base-currency conversion.
///
/// Both sides are exposed so that malformed input (both or neither side set)
/// can be reported instead of being unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalLine {
    pub account_id: AccountId,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl NewJournalLine {
    pub fn new(account_id: AccountId, side: Side, amount: Decimal, description: impl Into<String>) -> Self {
        let (debit, credit) = match side {
            Side::Debit => (amount, Decimal::ZERO),
            Side::Credit => (Decimal::ZERO, amount),
        };
        Self {
            account_id,
            description: description.into(),
            debit,
            credit,
        }
    }

    pub fn debit(account_id: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self::new(account_id, Side::Debit, amount, description)
    }

    pub fn credit(account_id: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self::new(account_id, Side::Credit, amount, description)
    }
}

/// Caller-supplied entry for `create`/`update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub company_id: CompanyId,
    pub entry_date: Option<NaiveDate>,
    pub description: String,
    pub reference: Option<String>,
    pub currency_code: String,
    pub exchange_rate: Option<Decimal>,
    pub source: Option<SourceRef>,
    pub lines: Vec<NewJournalLine>,
}

/// One stored line of a journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryLine {
    /// 1-based, contiguous; defines display order.
    pub line_number: u32,
    pub account_id: AccountId,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub base_debit: Decimal,
    pub base_credit: Decimal,
}

impl JournalEntryLine {
    pub fn side(&self) -> Side {
        if self.debit.is_zero() { Side::Credit } else { Side::Debit }
    }

    pub fn amount(&self) -> Decimal {
        self.debit + self.credit
    }

    /// Same line with debit and credit exchanged (native and base).
    pub fn swapped(&self) -> Self {
        Self {
            line_number: self.line_number,
            account_id: self.account_id,
            description: self.description.clone(),
            debit: self.credit,
            credit: self.debit,
            base_debit: self.base_credit,
            base_credit: self.base_debit,
        }
    }

    fn violations(&self, expected_number: u32, out: &mut Vec<String>) {
        let n = self.line_number;
        if n != expected_number {
            out.push(format!("line {n}: expected line number {expected_number}"));
        }
        push_side_violations(n, self.debit, self.credit, out);
        if self.debit.is_zero() != self.base_debit.is_zero()
            || self.credit.is_zero() != self.base_credit.is_zero()
        {
            out.push(format!("line {n}: base amounts must be on the same side as native amounts"));
        }
    }
}

fn push_side_violations(n: u32, debit: Decimal, credit: Decimal, out: &mut Vec<String>) {
    if debit.is_sign_negative() || credit.is_sign_negative() {
        out.push(format!("line {n}: amounts must not be negative"));
    }
    match (debit.is_zero(), credit.is_zero()) {
        (true, true) => out.push(format!("line {n}: either debit or credit must be non-zero")),
        (false, false) => out.push(format!("line {n}: a line cannot be both debit and credit")),
        _ => {}
    }
}

/// Header totals at native and base level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTotals {
    pub debit: Decimal,
    pub credit: Decimal,
    pub base_debit: Decimal,
    pub base_credit: Decimal,
}

impl EntryTotals {
    pub fn of(lines: &[JournalEntryLine]) -> Self {
        lines.iter().fold(Self::default(), |acc, l| Self {
            debit: acc.debit + l.debit,
            credit: acc.credit + l.credit,
            base_debit: acc.base_debit + l.base_debit,
            base_credit: acc.base_credit + l.base_credit,
        })
    }

    /// `Ok` when balanced at both levels; native is checked first.
    pub fn check_balanced(&self) -> DomainResult<()> {
        if self.debit != self.credit {
            return Err(DomainError::NotBalanced {
                level: CurrencyLevel::Native,
                debit: self.debit,
                credit: self.credit,
            });
        }
        if self.base_debit != self.base_credit {
            return Err(DomainError::NotBalanced {
                level: CurrencyLevel::Base,
                debit: self.base_debit,
                credit: self.base_credit,
            });
        }
        Ok(())
    }
}

/// Journal entry header + lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalEntryId,
    pub company_id: CompanyId,
    /// Assigned by the store when the entry is first written.
    pub entry_number: Option<String>,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub currency_code: String,
    pub exchange_rate: Decimal,
    pub source: Option<SourceRef>,
    pub status: JournalEntryStatus,
    pub lines: Vec<JournalEntryLine>,
    pub totals: EntryTotals,
    /// Set on a reversal entry: the entry it cancels.
    pub reversal_of: Option<JournalEntryId>,
    /// Set on a reversed entry: the entry that cancelled it.
    pub reversal_entry_id: Option<JournalEntryId>,
    pub created_by: UserId,
    pub posted_by: Option<UserId>,
    pub posted_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<UserId>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for JournalEntry {
    type Id = JournalEntryId;
    const KIND: &'static str = "journal entry";

    fn id(&self) -> JournalEntryId {
        self.id
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

/// Check every creation rule and return all violations at once.
pub fn validate_new_entry(entry: &NewJournalEntry) -> DomainResult<()> {
    let mut violations = Vec::new();

    if entry.description.trim().is_empty() {
        violations.push("description is required".to_string());
    }
    if entry.entry_date.is_none() {
        violations.push("entry date is required".to_string());
    }
    if entry.lines.len() < 2 {
        violations.push(format!(
            "a journal entry needs at least 2 lines (got {})",
            entry.lines.len()
        ));
    }
    // Sides are judged on the stored (rounded) amounts.
    for (idx, line) in entry.lines.iter().enumerate() {
        push_side_violations(
            idx as u32 + 1,
            round_amount(line.debit),
            round_amount(line.credit),
            &mut violations,
        );
    }
    if entry.currency_code.trim().is_empty() {
        violations.push("currency code is required".to_string());
    } else if !is_valid_currency_code(&entry.currency_code) {
        violations.push(format!("currency code '{}' is not a 3-letter code", entry.currency_code));
    }
    match entry.exchange_rate {
        None => violations.push("exchange rate is required".to_string()),
        Some(rate) if rate <= Decimal::ZERO => {
            violations.push(format!("exchange rate must be positive (got {rate})"))
        }
        Some(_) => {}
    }

    DomainError::from_violations(violations)
}

/// Number lines from 1 and compute rounded native and base amounts.
fn build_lines(lines: &[NewJournalLine], exchange_rate: Decimal) -> Vec<JournalEntryLine> {
    lines
        .iter()
        .enumerate()
        .map(|(idx, l)| {
            let debit = round_amount(l.debit);
            let credit = round_amount(l.credit);
            JournalEntryLine {
                line_number: idx as u32 + 1,
                account_id: l.account_id,
                description: l.description.clone(),
                debit,
                credit,
                base_debit: to_base(debit, exchange_rate),
                base_credit: to_base(credit, exchange_rate),
            }
        })
        .collect()
}

impl JournalEntry {
    /// Build a `Draft` entry from validated input. The entry number stays empty.
    pub fn draft(
        id: JournalEntryId,
        new: NewJournalEntry,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        validate_new_entry(&new)?;
        let (entry_date, exchange_rate) = match (new.entry_date, new.exchange_rate) {
            (Some(d), Some(r)) => (d, r),
            _ => return Err(DomainError::validation("entry date and exchange rate are required")),
        };

        let lines = build_lines(&new.lines, exchange_rate);
        let totals = EntryTotals::of(&lines);

        Ok(Self {
            id,
            company_id: new.company_id,
            entry_number: None,
            entry_date,
            description: new.description,
            reference: new.reference,
            currency_code: new.currency_code,
            exchange_rate,
            source: new.source,
            status: JournalEntryStatus::Draft,
            lines,
            totals,
            reversal_of: None,
            reversal_entry_id: None,
            created_by,
            posted_by: None,
            posted_at: None,
            reversed_by: None,
            reversed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace header fields and lines of a draft. Entry number and company are kept.
    pub fn revise_draft(&mut self, new: NewJournalEntry, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(JournalEntryStatus::Draft, "update")?;
        if new.company_id != self.company_id {
            return Err(DomainError::validation("company of a journal entry cannot change"));
        }
        let rebuilt = Self::draft(self.id, new, self.created_by, now)?;

        self.entry_date = rebuilt.entry_date;
        self.description = rebuilt.description;
        self.reference = rebuilt.reference;
        self.currency_code = rebuilt.currency_code;
        self.exchange_rate = rebuilt.exchange_rate;
        self.source = rebuilt.source;
        self.lines = rebuilt.lines;
        self.totals = rebuilt.totals;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_draft(&self) -> bool {
        self.status == JournalEntryStatus::Draft
    }

    fn ensure_status(&self, expected: JournalEntryStatus, operation: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "cannot {operation} journal entry {} in status {} (requires {expected})",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Structural checks on stored lines: count, numbering, one side per line.
    pub fn check_lines(&self) -> DomainResult<()> {
        let mut violations = Vec::new();
        if self.lines.len() < 2 {
            violations.push(format!(
                "a journal entry needs at least 2 lines (got {})",
                self.lines.len()
            ));
        }
        for (idx, line) in self.lines.iter().enumerate() {
            line.violations(idx as u32 + 1, &mut violations);
        }
        DomainError::from_violations(violations)
    }

    /// Recompute totals from the lines (header totals are not trusted) and compare.
    pub fn check_balance(&self) -> DomainResult<()> {
        EntryTotals::of(&self.lines).check_balanced()
    }

    /// `Draft` and balanced; the precondition of posting.
    pub fn ensure_postable(&self) -> DomainResult<()> {
        self.ensure_status(JournalEntryStatus::Draft, "post")?;
        self.check_lines()?;
        self.check_balance()
    }

    pub fn ensure_deletable(&self) -> DomainResult<()> {
        self.ensure_status(JournalEntryStatus::Draft, "delete")
    }

    pub fn mark_posted(&mut self, by: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_postable()?;
        self.totals = EntryTotals::of(&self.lines);
        self.status = JournalEntryStatus::Posted;
        self.posted_by = Some(by);
        self.posted_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Build the mirrored, already-posted entry that cancels this one.
    ///
    /// The reversal is dated at `at`, carries the original's currency and rate,
    /// and has every line's debit and credit exchanged.
    pub fn reversal(&self, id: JournalEntryId, by: UserId, at: DateTime<Utc>) -> DomainResult<Self> {
        self.ensure_status(JournalEntryStatus::Posted, "reverse")?;

        let original_number = self
            .entry_number
            .clone()
            .unwrap_or_else(|| self.id.to_string());
        let lines: Vec<JournalEntryLine> = self.lines.iter().map(JournalEntryLine::swapped).collect();
        let totals = EntryTotals::of(&lines);

        Ok(Self {
            id,
            company_id: self.company_id,
            entry_number: None,
            entry_date: at.date_naive(),
            description: format!("Reversal of {original_number}: {}", self.description),
            reference: Some(original_number),
            currency_code: self.currency_code.clone(),
            exchange_rate: self.exchange_rate,
            source: self.source.clone(),
            status: JournalEntryStatus::Posted,
            lines,
            totals,
            reversal_of: Some(self.id),
            reversal_entry_id: None,
            created_by: by,
            posted_by: Some(by),
            posted_at: Some(at),
            reversed_by: None,
            reversed_at: None,
            created_at: at,
            updated_at: at,
        })
    }

    pub fn mark_reversed(
        &mut self,
        reversal_id: JournalEntryId,
        by: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_status(JournalEntryStatus::Posted, "reverse")?;
        self.status = JournalEntryStatus::Reversed;
        self.reversal_entry_id = Some(reversal_id);
        self.reversed_by = Some(by);
        self.reversed_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}
