//! Postgres-backed ledger store.
//!
//! Every trait method runs in one transaction. Rules that depend on current
//! state (draft-only edits, budget availability, single release) are checked
//! after the affected rows have been locked with `FOR UPDATE`, so concurrent
//! callers serialize on the row they compete for.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / RowNotFound / Other | N/A | `Backend` |

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use ledgerforge_autojournal::{AutoJournalConfig, AutoJournalLog, AutoJournalStatus};
use ledgerforge_budget::{
    Availability, Budget, BudgetCommitment, BudgetLine, BudgetPosition, BudgetRealization, BudgetStatus,
    BudgetType, CommitmentStatus, DocumentRef, ReferenceType,
};
use ledgerforge_core::{
    AccountId, AccountingPeriod, BudgetId, CommitmentId, CompanyId, DomainError, JournalEntryId, RealizationId,
    UserId,
};
use ledgerforge_journal::{
    EntryNumberFormat, EntryTotals, JournalEntry, JournalEntryFilter, JournalEntryLine, JournalEntryStatus,
    SourceRef,
};

use super::{AutoJournalStore, BudgetStore, JournalStore};
use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

const ENTRY_COLUMNS: &str = r#"
    id, company_id, entry_number, entry_date, description, reference, currency_code,
    exchange_rate, source_module, source_id, status, reversal_of, reversal_entry_id,
    created_by, posted_by, posted_at, reversed_by, reversed_at, created_at, updated_at
"#;

const BUDGET_COLUMNS: &str = r#"
    id, company_id, code, name, fiscal_year, budget_type, period_start, period_end,
    status, revision_of, created_by, created_at, updated_at
"#;

const COMMITMENT_COLUMNS: &str = r#"
    id, company_id, budget_id, account_id, amount, reference_type, reference_id,
    reference_number, description, status, committed_by, committed_at, realized_at,
    released_by, released_at, release_reason
"#;

const REALIZATION_COLUMNS: &str = r#"
    id, company_id, budget_id, account_id, commitment_id, amount, reference_type,
    reference_id, reference_number, description, transaction_date, realized_by,
    realized_at, adjusted_at
"#;

const LOG_COLUMNS: &str = r#"
    id, company_id, journal_entry_id, source_module, source_id, transaction_type,
    status, error_message, processed_at, created_at
"#;

/// Ledger store on a shared `PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to ledger database")?;
        Ok(Self::new(pool))
    }

    /// Apply the ledger schema. Safe to run on every start.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .context("failed to apply ledger schema")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::backend(format!("connection pool closed in {}", operation)),
        sqlx::Error::RowNotFound => StoreError::backend(format!("unexpected row not found in {}", operation)),
        _ => StoreError::backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_error(what: &str, err: sqlx::Error) -> StoreError {
    StoreError::corrupt(format!("failed to decode {what} row: {err}"))
}

fn unknown_value(column: &str, value: &str) -> StoreError {
    StoreError::corrupt(format!("unknown {column} '{value}'"))
}

fn lock_clause(lock: bool) -> &'static str {
    if lock {
        " FOR UPDATE"
    } else {
        ""
    }
}

// SQLx row types

#[derive(Debug)]
struct EntryRow {
    id: Uuid,
    company_id: Uuid,
    entry_number: String,
    entry_date: NaiveDate,
    description: String,
    reference: Option<String>,
    currency_code: String,
    exchange_rate: Decimal,
    source_module: Option<String>,
    source_id: Option<String>,
    status: String,
    reversal_of: Option<Uuid>,
    reversal_entry_id: Option<Uuid>,
    created_by: Uuid,
    posted_by: Option<Uuid>,
    posted_at: Option<DateTime<Utc>>,
    reversed_by: Option<Uuid>,
    reversed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for EntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntryRow {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            entry_number: row.try_get("entry_number")?,
            entry_date: row.try_get("entry_date")?,
            description: row.try_get("description")?,
            reference: row.try_get("reference")?,
            currency_code: row.try_get("currency_code")?,
            exchange_rate: row.try_get("exchange_rate")?,
            source_module: row.try_get("source_module")?,
            source_id: row.try_get("source_id")?,
            status: row.try_get("status")?,
            reversal_of: row.try_get("reversal_of")?,
            reversal_entry_id: row.try_get("reversal_entry_id")?,
            created_by: row.try_get("created_by")?,
            posted_by: row.try_get("posted_by")?,
            posted_at: row.try_get("posted_at")?,
            reversed_by: row.try_get("reversed_by")?,
            reversed_at: row.try_get("reversed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl EntryRow {
    fn into_entry(self, lines: Vec<JournalEntryLine>) -> StoreResult<JournalEntry> {
        let status = JournalEntryStatus::parse(&self.status).ok_or_else(|| unknown_value("entry status", &self.status))?;
        let source = match (self.source_module, self.source_id) {
            (Some(module), Some(id)) => Some(SourceRef { module, id }),
            _ => None,
        };
        let totals = EntryTotals::of(&lines);
        Ok(JournalEntry {
            id: JournalEntryId::from_uuid(self.id),
            company_id: CompanyId::from_uuid(self.company_id),
            entry_number: Some(self.entry_number),
            entry_date: self.entry_date,
            description: self.description,
            reference: self.reference,
            currency_code: self.currency_code,
            exchange_rate: self.exchange_rate,
            source,
            status,
            lines,
            totals,
            reversal_of: self.reversal_of.map(JournalEntryId::from_uuid),
            reversal_entry_id: self.reversal_entry_id.map(JournalEntryId::from_uuid),
            created_by: UserId::from_uuid(self.created_by),
            posted_by: self.posted_by.map(UserId::from_uuid),
            posted_at: self.posted_at,
            reversed_by: self.reversed_by.map(UserId::from_uuid),
            reversed_at: self.reversed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug)]
struct LineRow {
    entry_id: Uuid,
    line_number: i32,
    account_id: Uuid,
    description: String,
    debit: Decimal,
    credit: Decimal,
    base_debit: Decimal,
    base_credit: Decimal,
}

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineRow {
            entry_id: row.try_get("entry_id")?,
            line_number: row.try_get("line_number")?,
            account_id: row.try_get("account_id")?,
            description: row.try_get("description")?,
            debit: row.try_get("debit")?,
            credit: row.try_get("credit")?,
            base_debit: row.try_get("base_debit")?,
            base_credit: row.try_get("base_credit")?,
        })
    }
}

impl From<LineRow> for JournalEntryLine {
    fn from(row: LineRow) -> Self {
        JournalEntryLine {
            line_number: row.line_number.max(0) as u32,
            account_id: AccountId::from_uuid(row.account_id),
            description: row.description,
            debit: row.debit,
            credit: row.credit,
            base_debit: row.base_debit,
            base_credit: row.base_credit,
        }
    }
}

#[derive(Debug)]
struct BudgetRow {
    id: Uuid,
    company_id: Uuid,
    code: String,
    name: String,
    fiscal_year: i32,
    budget_type: String,
    period_start: NaiveDate,
    period_end: NaiveDate,
    status: String,
    revision_of: Option<Uuid>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for BudgetRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BudgetRow {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            fiscal_year: row.try_get("fiscal_year")?,
            budget_type: row.try_get("budget_type")?,
            period_start: row.try_get("period_start")?,
            period_end: row.try_get("period_end")?,
            status: row.try_get("status")?,
            revision_of: row.try_get("revision_of")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl BudgetRow {
    fn into_budget(self, lines: Vec<BudgetLine>) -> StoreResult<Budget> {
        Ok(Budget {
            id: BudgetId::from_uuid(self.id),
            company_id: CompanyId::from_uuid(self.company_id),
            code: self.code,
            name: self.name,
            fiscal_year: self.fiscal_year,
            budget_type: BudgetType::parse(&self.budget_type)
                .ok_or_else(|| unknown_value("budget type", &self.budget_type))?,
            period_start: self.period_start,
            period_end: self.period_end,
            status: BudgetStatus::parse(&self.status).ok_or_else(|| unknown_value("budget status", &self.status))?,
            revision_of: self.revision_of.map(BudgetId::from_uuid),
            lines,
            created_by: UserId::from_uuid(self.created_by),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn document_ref(row: &PgRow) -> Result<(String, String, String), sqlx::Error> {
    Ok((
        row.try_get("reference_type")?,
        row.try_get("reference_id")?,
        row.try_get("reference_number")?,
    ))
}

fn into_document_ref((reference_type, reference_id, reference_number): (String, String, String)) -> StoreResult<DocumentRef> {
    Ok(DocumentRef {
        reference_type: ReferenceType::parse(&reference_type)
            .ok_or_else(|| unknown_value("reference type", &reference_type))?,
        reference_id,
        reference_number,
    })
}

#[derive(Debug)]
struct CommitmentRow {
    id: Uuid,
    company_id: Uuid,
    budget_id: Uuid,
    account_id: Uuid,
    amount: Decimal,
    reference: (String, String, String),
    description: String,
    status: String,
    committed_by: Uuid,
    committed_at: DateTime<Utc>,
    realized_at: Option<DateTime<Utc>>,
    released_by: Option<Uuid>,
    released_at: Option<DateTime<Utc>>,
    release_reason: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for CommitmentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CommitmentRow {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            budget_id: row.try_get("budget_id")?,
            account_id: row.try_get("account_id")?,
            amount: row.try_get("amount")?,
            reference: document_ref(row)?,
            description: row.try_get("description")?,
            status: row.try_get("status")?,
            committed_by: row.try_get("committed_by")?,
            committed_at: row.try_get("committed_at")?,
            realized_at: row.try_get("realized_at")?,
            released_by: row.try_get("released_by")?,
            released_at: row.try_get("released_at")?,
            release_reason: row.try_get("release_reason")?,
        })
    }
}

impl TryFrom<CommitmentRow> for BudgetCommitment {
    type Error = StoreError;

    fn try_from(row: CommitmentRow) -> Result<Self, Self::Error> {
        Ok(BudgetCommitment {
            id: CommitmentId::from_uuid(row.id),
            company_id: CompanyId::from_uuid(row.company_id),
            budget_id: BudgetId::from_uuid(row.budget_id),
            account_id: AccountId::from_uuid(row.account_id),
            amount: row.amount,
            reference: into_document_ref(row.reference)?,
            description: row.description,
            status: CommitmentStatus::parse(&row.status)
                .ok_or_else(|| unknown_value("commitment status", &row.status))?,
            committed_by: UserId::from_uuid(row.committed_by),
            committed_at: row.committed_at,
            realized_at: row.realized_at,
            released_by: row.released_by.map(UserId::from_uuid),
            released_at: row.released_at,
            release_reason: row.release_reason,
        })
    }
}

#[derive(Debug)]
struct RealizationRow {
    id: Uuid,
    company_id: Uuid,
    budget_id: Uuid,
    account_id: Uuid,
    commitment_id: Option<Uuid>,
    amount: Decimal,
    reference: (String, String, String),
    description: String,
    transaction_date: NaiveDate,
    realized_by: Uuid,
    realized_at: DateTime<Utc>,
    adjusted_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for RealizationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RealizationRow {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            budget_id: row.try_get("budget_id")?,
            account_id: row.try_get("account_id")?,
            commitment_id: row.try_get("commitment_id")?,
            amount: row.try_get("amount")?,
            reference: document_ref(row)?,
            description: row.try_get("description")?,
            transaction_date: row.try_get("transaction_date")?,
            realized_by: row.try_get("realized_by")?,
            realized_at: row.try_get("realized_at")?,
            adjusted_at: row.try_get("adjusted_at")?,
        })
    }
}

impl TryFrom<RealizationRow> for BudgetRealization {
    type Error = StoreError;

    fn try_from(row: RealizationRow) -> Result<Self, Self::Error> {
        Ok(BudgetRealization {
            id: RealizationId::from_uuid(row.id),
            company_id: CompanyId::from_uuid(row.company_id),
            budget_id: BudgetId::from_uuid(row.budget_id),
            account_id: AccountId::from_uuid(row.account_id),
            commitment_id: row.commitment_id.map(CommitmentId::from_uuid),
            amount: row.amount,
            reference: into_document_ref(row.reference)?,
            description: row.description,
            transaction_date: row.transaction_date,
            realized_by: UserId::from_uuid(row.realized_by),
            realized_at: row.realized_at,
            adjusted_at: row.adjusted_at,
        })
    }
}

#[derive(Debug)]
struct LogRow {
    id: Uuid,
    company_id: Uuid,
    journal_entry_id: Option<Uuid>,
    source_module: String,
    source_id: String,
    transaction_type: String,
    status: String,
    error_message: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LogRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LogRow {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            journal_entry_id: row.try_get("journal_entry_id")?,
            source_module: row.try_get("source_module")?,
            source_id: row.try_get("source_id")?,
            transaction_type: row.try_get("transaction_type")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<LogRow> for AutoJournalLog {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(AutoJournalLog {
            id: row.id.into(),
            company_id: CompanyId::from_uuid(row.company_id),
            journal_entry_id: row.journal_entry_id.map(JournalEntryId::from_uuid),
            source_module: row.source_module,
            source_id: row.source_id,
            transaction_type: row.transaction_type,
            status: AutoJournalStatus::parse(&row.status)
                .ok_or_else(|| unknown_value("auto-journal status", &row.status))?,
            error_message: row.error_message,
            processed_at: row.processed_at,
            created_at: row.created_at,
        })
    }
}

fn decode_logs(rows: Vec<PgRow>) -> StoreResult<Vec<AutoJournalLog>> {
    rows.iter()
        .map(|row| {
            LogRow::from_row(row)
                .map_err(|e| decode_error("auto-journal log", e))
                .and_then(AutoJournalLog::try_from)
        })
        .collect()
}

// Journal helpers

async fn load_lines(conn: &mut PgConnection, entry_ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Vec<JournalEntryLine>>> {
    let rows = sqlx::query(
        r#"
        SELECT entry_id, line_number, account_id, description, debit, credit, base_debit, base_credit
        FROM journal_entry_lines
        WHERE entry_id = ANY($1)
        ORDER BY entry_id, line_number
        "#,
    )
    .bind(entry_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_lines", e))?;

    let mut by_entry: HashMap<Uuid, Vec<JournalEntryLine>> = HashMap::new();
    for row in rows {
        let line = LineRow::from_row(&row).map_err(|e| decode_error("journal line", e))?;
        by_entry.entry(line.entry_id).or_default().push(line.into());
    }
    Ok(by_entry)
}

async fn assemble_entries(conn: &mut PgConnection, rows: Vec<PgRow>) -> StoreResult<Vec<JournalEntry>> {
    let headers = rows
        .iter()
        .map(|row| EntryRow::from_row(row).map_err(|e| decode_error("journal entry", e)))
        .collect::<StoreResult<Vec<_>>>()?;
    let ids: Vec<Uuid> = headers.iter().map(|h| h.id).collect();
    let mut lines = load_lines(conn, &ids).await?;
    headers
        .into_iter()
        .map(|h| {
            let entry_lines = lines.remove(&h.id).unwrap_or_default();
            h.into_entry(entry_lines)
        })
        .collect()
}

async fn load_entry(
    conn: &mut PgConnection,
    company_id: CompanyId,
    id: JournalEntryId,
    lock: bool,
) -> StoreResult<Option<JournalEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE company_id = $1 AND id = $2{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(company_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_entry", e))?;
    match row {
        Some(row) => Ok(assemble_entries(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

async fn require_entry(
    conn: &mut PgConnection,
    company_id: CompanyId,
    id: JournalEntryId,
) -> StoreResult<JournalEntry> {
    load_entry(conn, company_id, id, true)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("journal entry {id}")).into())
}

async fn allocate_number(
    conn: &mut PgConnection,
    company_id: CompanyId,
    period: AccountingPeriod,
    numbering: &EntryNumberFormat,
) -> StoreResult<String> {
    let row = sqlx::query(
        r#"
        INSERT INTO journal_entry_sequences (company_id, period, last_value)
        VALUES ($1, $2, 1)
        ON CONFLICT (company_id, period)
        DO UPDATE SET last_value = journal_entry_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(company_id.as_uuid())
    .bind(period.to_string())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("allocate_number", e))?;
    let seq: i64 = row.try_get("last_value").map_err(|e| decode_error("sequence", e))?;
    Ok(numbering.format(period, seq.max(0) as u64))
}

async fn insert_lines(conn: &mut PgConnection, entry: &JournalEntry) -> StoreResult<()> {
    for line in &entry.lines {
        sqlx::query(
            r#"
            INSERT INTO journal_entry_lines (
                entry_id, line_number, account_id, description,
                debit, credit, base_debit, base_credit
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(line.line_number as i32)
        .bind(line.account_id.as_uuid())
        .bind(&line.description)
        .bind(line.debit)
        .bind(line.credit)
        .bind(line.base_debit)
        .bind(line.base_credit)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;
    }
    Ok(())
}

/// Number (if needed) and insert an entry with its lines.
async fn insert_entry_rows(
    conn: &mut PgConnection,
    mut entry: JournalEntry,
    numbering: &EntryNumberFormat,
) -> StoreResult<JournalEntry> {
    let number = match entry.entry_number.take() {
        Some(n) => n,
        None => allocate_number(conn, entry.company_id, AccountingPeriod::of(entry.entry_date), numbering).await?,
    };
    entry.entry_number = Some(number);
    entry.totals = EntryTotals::of(&entry.lines);

    sqlx::query(
        r#"
        INSERT INTO journal_entries (
            id, company_id, entry_number, entry_date, description, reference,
            currency_code, exchange_rate, source_module, source_id, status,
            total_debit, total_credit, base_total_debit, base_total_credit,
            reversal_of, reversal_entry_id, created_by, posted_by, posted_at,
            reversed_by, reversed_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24)
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.company_id.as_uuid())
    .bind(&entry.entry_number)
    .bind(entry.entry_date)
    .bind(&entry.description)
    .bind(&entry.reference)
    .bind(&entry.currency_code)
    .bind(entry.exchange_rate)
    .bind(entry.source.as_ref().map(|s| s.module.as_str()))
    .bind(entry.source.as_ref().map(|s| s.id.as_str()))
    .bind(entry.status.as_str())
    .bind(entry.totals.debit)
    .bind(entry.totals.credit)
    .bind(entry.totals.base_debit)
    .bind(entry.totals.base_credit)
    .bind(entry.reversal_of.map(Uuid::from))
    .bind(entry.reversal_entry_id.map(Uuid::from))
    .bind(entry.created_by.as_uuid())
    .bind(entry.posted_by.map(Uuid::from))
    .bind(entry.posted_at)
    .bind(entry.reversed_by.map(Uuid::from))
    .bind(entry.reversed_at)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_entry", e))?;

    insert_lines(conn, &entry).await?;
    Ok(entry)
}

/// Rewrite the mutable header columns of an existing entry.
async fn update_entry_header(conn: &mut PgConnection, entry: &JournalEntry) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE journal_entries SET
            entry_date = $3, description = $4, reference = $5, currency_code = $6,
            exchange_rate = $7, source_module = $8, source_id = $9, status = $10,
            total_debit = $11, total_credit = $12, base_total_debit = $13, base_total_credit = $14,
            reversal_entry_id = $15, posted_by = $16, posted_at = $17,
            reversed_by = $18, reversed_at = $19, updated_at = $20
        WHERE company_id = $1 AND id = $2
        "#,
    )
    .bind(entry.company_id.as_uuid())
    .bind(entry.id.as_uuid())
    .bind(entry.entry_date)
    .bind(&entry.description)
    .bind(&entry.reference)
    .bind(&entry.currency_code)
    .bind(entry.exchange_rate)
    .bind(entry.source.as_ref().map(|s| s.module.as_str()))
    .bind(entry.source.as_ref().map(|s| s.id.as_str()))
    .bind(entry.status.as_str())
    .bind(entry.totals.debit)
    .bind(entry.totals.credit)
    .bind(entry.totals.base_debit)
    .bind(entry.totals.base_credit)
    .bind(entry.reversal_entry_id.map(Uuid::from))
    .bind(entry.posted_by.map(Uuid::from))
    .bind(entry.posted_at)
    .bind(entry.reversed_by.map(Uuid::from))
    .bind(entry.reversed_at)
    .bind(entry.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_entry", e))?;
    Ok(())
}

// Budget helpers

async fn load_budget(
    conn: &mut PgConnection,
    company_id: CompanyId,
    id: BudgetId,
    lock: bool,
) -> StoreResult<Option<Budget>> {
    let sql = format!(
        "SELECT {BUDGET_COLUMNS} FROM budgets WHERE company_id = $1 AND id = $2{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(company_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_budget", e))?;
    let Some(row) = row else {
        return Ok(None);
    };
    let header = BudgetRow::from_row(&row).map_err(|e| decode_error("budget", e))?;
    let lines = load_budget_lines(conn, header.id).await?;
    header.into_budget(lines).map(Some)
}

async fn require_budget(conn: &mut PgConnection, company_id: CompanyId, id: BudgetId, lock: bool) -> StoreResult<Budget> {
    load_budget(conn, company_id, id, lock)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("budget {id}")).into())
}

async fn load_budget_lines(conn: &mut PgConnection, budget_id: Uuid) -> StoreResult<Vec<BudgetLine>> {
    let rows = sqlx::query(
        r#"
        SELECT account_id, budgeted_amount
        FROM budget_lines
        WHERE budget_id = $1
        ORDER BY account_id
        "#,
    )
    .bind(budget_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_budget_lines", e))?;

    rows.iter()
        .map(|row| -> StoreResult<BudgetLine> {
            Ok(BudgetLine {
                account_id: AccountId::from_uuid(row.try_get("account_id").map_err(|e| decode_error("budget line", e))?),
                budgeted_amount: row.try_get("budgeted_amount").map_err(|e| decode_error("budget line", e))?,
            })
        })
        .collect()
}

async fn insert_budget_rows(conn: &mut PgConnection, budget: &Budget) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO budgets (
            id, company_id, code, name, fiscal_year, budget_type, period_start,
            period_end, status, revision_of, created_by, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(budget.id.as_uuid())
    .bind(budget.company_id.as_uuid())
    .bind(&budget.code)
    .bind(&budget.name)
    .bind(budget.fiscal_year)
    .bind(budget.budget_type.as_str())
    .bind(budget.period_start)
    .bind(budget.period_end)
    .bind(budget.status.as_str())
    .bind(budget.revision_of.map(Uuid::from))
    .bind(budget.created_by.as_uuid())
    .bind(budget.created_at)
    .bind(budget.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_budget", e))?;

    for line in &budget.lines {
        sqlx::query("INSERT INTO budget_lines (budget_id, account_id, budgeted_amount) VALUES ($1, $2, $3)")
            .bind(budget.id.as_uuid())
            .bind(line.account_id.as_uuid())
            .bind(line.budgeted_amount)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_budget_line", e))?;
    }
    Ok(())
}

async fn update_budget_status(conn: &mut PgConnection, budget: &Budget) -> StoreResult<()> {
    sqlx::query("UPDATE budgets SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(budget.id.as_uuid())
        .bind(budget.status.as_str())
        .bind(budget.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("update_budget_status", e))?;
    Ok(())
}

async fn sum_committed(conn: &mut PgConnection, budget_id: BudgetId, account_id: AccountId) -> StoreResult<Decimal> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(amount), 0) AS total
        FROM budget_commitments
        WHERE budget_id = $1 AND account_id = $2 AND status = 'ACTIVE'
        "#,
    )
    .bind(budget_id.as_uuid())
    .bind(account_id.as_uuid())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("sum_committed", e))?;
    row.try_get("total").map_err(|e| decode_error("committed total", e))
}

async fn sum_realized(conn: &mut PgConnection, budget_id: BudgetId, account_id: AccountId) -> StoreResult<Decimal> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(amount), 0) AS total
        FROM budget_realizations
        WHERE budget_id = $1 AND account_id = $2
        "#,
    )
    .bind(budget_id.as_uuid())
    .bind(account_id.as_uuid())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("sum_realized", e))?;
    row.try_get("total").map_err(|e| decode_error("realized total", e))
}

/// Position of a budget line that accepts spending.
///
/// Locks the `(budget, account)` line row; concurrent writers against the
/// same line wait here until this transaction ends.
async fn spending_position(
    conn: &mut PgConnection,
    company_id: CompanyId,
    budget_id: BudgetId,
    account_id: AccountId,
) -> StoreResult<BudgetPosition> {
    let budget = require_budget(conn, company_id, budget_id, false).await?;
    budget.ensure_accepts_spending()?;

    let row = sqlx::query(
        r#"
        SELECT budgeted_amount
        FROM budget_lines
        WHERE budget_id = $1 AND account_id = $2
        FOR UPDATE
        "#,
    )
    .bind(budget_id.as_uuid())
    .bind(account_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("lock_budget_line", e))?
    .ok_or_else(|| DomainError::not_found(format!("account {account_id} has no line in budget {budget_id}")))?;
    let budgeted: Decimal = row.try_get("budgeted_amount").map_err(|e| decode_error("budget line", e))?;

    Ok(BudgetPosition::new(
        budgeted,
        sum_committed(conn, budget_id, account_id).await?,
        sum_realized(conn, budget_id, account_id).await?,
    ))
}

async fn load_commitment(
    conn: &mut PgConnection,
    company_id: CompanyId,
    id: CommitmentId,
    lock: bool,
) -> StoreResult<Option<BudgetCommitment>> {
    let sql = format!(
        "SELECT {COMMITMENT_COLUMNS} FROM budget_commitments WHERE company_id = $1 AND id = $2{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(company_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_commitment", e))?;
    row.map(|row| {
        CommitmentRow::from_row(&row)
            .map_err(|e| decode_error("commitment", e))
            .and_then(BudgetCommitment::try_from)
    })
    .transpose()
}

async fn load_realization(
    conn: &mut PgConnection,
    company_id: CompanyId,
    id: RealizationId,
    lock: bool,
) -> StoreResult<Option<BudgetRealization>> {
    let sql = format!(
        "SELECT {REALIZATION_COLUMNS} FROM budget_realizations WHERE company_id = $1 AND id = $2{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(company_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_realization", e))?;
    row.map(|row| {
        RealizationRow::from_row(&row)
            .map_err(|e| decode_error("realization", e))
            .and_then(BudgetRealization::try_from)
    })
    .transpose()
}

/// Persist the mutable columns of a commitment; only an `ACTIVE` row may change.
async fn update_active_commitment(conn: &mut PgConnection, commitment: &BudgetCommitment) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE budget_commitments SET
            status = $2, realized_at = $3, released_by = $4, released_at = $5, release_reason = $6
        WHERE id = $1 AND status = 'ACTIVE'
        "#,
    )
    .bind(commitment.id.as_uuid())
    .bind(commitment.status.as_str())
    .bind(commitment.realized_at)
    .bind(commitment.released_by.map(Uuid::from))
    .bind(commitment.released_at)
    .bind(&commitment.release_reason)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_commitment", e))?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "commitment {} changed concurrently",
            commitment.id
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl JournalStore for PostgresLedgerStore {
    #[instrument(
        skip(self, entry, numbering),
        fields(company_id = %entry.company_id, entry_id = %entry.id, entry_number),
        err
    )]
    async fn insert_entry(&self, entry: JournalEntry, numbering: &EntryNumberFormat) -> StoreResult<JournalEntry> {
        entry.check_lines()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let entry = insert_entry_rows(&mut tx, entry, numbering).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        if let Some(number) = &entry.entry_number {
            Span::current().record("entry_number", number.as_str());
        }
        Ok(entry)
    }

    #[instrument(skip(self), fields(company_id = %company_id, entry_id = %id), err)]
    async fn get_entry(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<Option<JournalEntry>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        load_entry(&mut conn, company_id, id, false).await
    }

    #[instrument(skip(self, filter), fields(company_id = %filter.company_id, entry_count), err)]
    async fn list_entries(&self, filter: &JournalEntryFilter) -> StoreResult<Vec<JournalEntry>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;

        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM journal_entries
            WHERE company_id = $1
                AND ($2::text IS NULL OR status = $2)
                AND ($3::date IS NULL OR entry_date >= $3)
                AND ($4::date IS NULL OR entry_date <= $4)
                AND ($5::text IS NULL OR source_module = $5)
                AND ($6::text IS NULL OR source_id = $6)
            ORDER BY entry_date ASC, entry_number ASC
            LIMIT $7 OFFSET $8
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.company_id.as_uuid())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.date_from)
            .bind(filter.date_to)
            .bind(filter.source_module.as_deref())
            .bind(filter.source_id.as_deref())
            .bind(filter.limit.map(|l| l as i64))
            .bind(filter.offset as i64)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("list_entries", e))?;

        let entries = assemble_entries(&mut conn, rows).await?;
        Span::current().record("entry_count", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self, entry), fields(company_id = %entry.company_id, entry_id = %entry.id), err)]
    async fn update_draft(&self, mut entry: JournalEntry) -> StoreResult<JournalEntry> {
        entry.check_lines()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let existing = require_entry(&mut tx, entry.company_id, entry.id).await?;
        if !existing.is_draft() {
            return Err(DomainError::invalid_state(format!(
                "journal entry {} is {} and can no longer be edited",
                entry.id, existing.status
            ))
            .into());
        }
        entry.entry_number = existing.entry_number;
        entry.status = existing.status;
        entry.totals = EntryTotals::of(&entry.lines);

        update_entry_header(&mut tx, &entry).await?;
        sqlx::query("DELETE FROM journal_entry_lines WHERE entry_id = $1")
            .bind(entry.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_lines", e))?;
        insert_lines(&mut tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entry)
    }

    #[instrument(skip(self), fields(company_id = %company_id, entry_id = %id), err)]
    async fn delete_draft(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        require_entry(&mut tx, company_id, id).await?.ensure_deletable()?;

        sqlx::query("DELETE FROM journal_entries WHERE company_id = $1 AND id = $2")
            .bind(company_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_entry", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(company_id = %company_id, entry_id = %id), err)]
    async fn post_entry(
        &self,
        company_id: CompanyId,
        id: JournalEntryId,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<JournalEntry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let mut entry = require_entry(&mut tx, company_id, id).await?;
        entry.mark_posted(by, at)?;
        update_entry_header(&mut tx, &entry).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entry)
    }

    #[instrument(
        skip(self, numbering),
        fields(company_id = %company_id, entry_id = %id, reversal_id = %reversal_id),
        err
    )]
    async fn reverse_entry(
        &self,
        company_id: CompanyId,
        id: JournalEntryId,
        reversal_id: JournalEntryId,
        numbering: &EntryNumberFormat,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<(JournalEntry, JournalEntry)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut original = require_entry(&mut tx, company_id, id).await?;
        let reversal = original.reversal(reversal_id, by, at)?;
        original.mark_reversed(reversal_id, by, at)?;

        let reversal = insert_entry_rows(&mut tx, reversal, numbering).await?;
        update_entry_header(&mut tx, &original).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok((original, reversal))
    }

    #[instrument(skip(self, numbering), fields(company_id = %company_id, period = %period), err)]
    async fn next_entry_number(
        &self,
        company_id: CompanyId,
        period: AccountingPeriod,
        numbering: &EntryNumberFormat,
    ) -> StoreResult<String> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        allocate_number(&mut conn, company_id, period, numbering).await
    }
}

#[async_trait::async_trait]
impl BudgetStore for PostgresLedgerStore {
    #[instrument(skip(self, budget), fields(company_id = %budget.company_id, budget_id = %budget.id), err)]
    async fn insert_budget(&self, budget: Budget) -> StoreResult<Budget> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        insert_budget_rows(&mut tx, &budget).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(budget)
    }

    #[instrument(skip(self), fields(company_id = %company_id, budget_id = %id), err)]
    async fn get_budget(&self, company_id: CompanyId, id: BudgetId) -> StoreResult<Option<Budget>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        load_budget(&mut conn, company_id, id, false).await
    }

    #[instrument(skip(self), fields(company_id = %company_id, budget_id = %id, to = to.as_str()), err)]
    async fn set_budget_status(
        &self,
        company_id: CompanyId,
        id: BudgetId,
        to: BudgetStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Budget> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let mut budget = require_budget(&mut tx, company_id, id, true).await?;
        budget.transition(to, at)?;
        update_budget_status(&mut tx, &budget).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(budget)
    }

    #[instrument(skip(self, revision), fields(company_id = %revision.company_id, budget_id = %revision.id), err)]
    async fn revise_budget(&self, revision: Budget, at: DateTime<Utc>) -> StoreResult<Budget> {
        let prior_id = revision
            .revision_of
            .ok_or_else(|| DomainError::validation("a revision must reference the budget it replaces"))?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut prior = require_budget(&mut tx, revision.company_id, prior_id, true).await?;
        prior.transition(BudgetStatus::Revised, at)?;
        // The prior must leave ACTIVE before the revision takes the slot.
        update_budget_status(&mut tx, &prior).await?;
        insert_budget_rows(&mut tx, &revision).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(revision)
    }

    #[instrument(skip(self), fields(company_id = %company_id, account_id = %account_id), err)]
    async fn find_active_budget(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        fiscal_year: i32,
    ) -> StoreResult<Option<Budget>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        let row = sqlx::query(
            r#"
            SELECT b.id
            FROM budgets b
            WHERE b.company_id = $1
                AND b.status = 'ACTIVE'
                AND b.fiscal_year = $3
                AND EXISTS (
                    SELECT 1 FROM budget_lines l
                    WHERE l.budget_id = b.id AND l.account_id = $2
                )
            ORDER BY b.created_at ASC, b.id ASC
            LIMIT 1
            "#,
        )
        .bind(company_id.as_uuid())
        .bind(account_id.as_uuid())
        .bind(fiscal_year)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("find_active_budget", e))?;

        match row {
            Some(row) => {
                let id: Uuid = row.try_get("id").map_err(|e| decode_error("budget", e))?;
                load_budget(&mut conn, company_id, BudgetId::from_uuid(id), false).await
            }
            None => Ok(None),
        }
    }

    async fn total_committed(&self, budget_id: BudgetId, account_id: AccountId) -> StoreResult<Decimal> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        sum_committed(&mut conn, budget_id, account_id).await
    }

    async fn total_realized(&self, budget_id: BudgetId, account_id: AccountId) -> StoreResult<Decimal> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        sum_realized(&mut conn, budget_id, account_id).await
    }

    #[instrument(
        skip(self, commitment),
        fields(
            company_id = %commitment.company_id,
            budget_id = %commitment.budget_id,
            account_id = %commitment.account_id,
            amount = %commitment.amount
        ),
        err
    )]
    async fn insert_commitment(&self, commitment: BudgetCommitment, enforce: bool) -> StoreResult<BudgetCommitment> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let position =
            spending_position(&mut tx, commitment.company_id, commitment.budget_id, commitment.account_id).await?;
        if enforce {
            Availability::controlled(commitment.budget_id, commitment.account_id, position, commitment.amount)
                .ensure_sufficient()?;
        }

        sqlx::query(&format!(
            r#"
            INSERT INTO budget_commitments ({COMMITMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#
        ))
        .bind(commitment.id.as_uuid())
        .bind(commitment.company_id.as_uuid())
        .bind(commitment.budget_id.as_uuid())
        .bind(commitment.account_id.as_uuid())
        .bind(commitment.amount)
        .bind(commitment.reference.reference_type.as_str())
        .bind(&commitment.reference.reference_id)
        .bind(&commitment.reference.reference_number)
        .bind(&commitment.description)
        .bind(commitment.status.as_str())
        .bind(commitment.committed_by.as_uuid())
        .bind(commitment.committed_at)
        .bind(commitment.realized_at)
        .bind(commitment.released_by.map(Uuid::from))
        .bind(commitment.released_at)
        .bind(&commitment.release_reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_commitment", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(commitment)
    }

    #[instrument(
        skip(self, realization),
        fields(
            company_id = %realization.company_id,
            budget_id = %realization.budget_id,
            account_id = %realization.account_id,
            amount = %realization.amount
        ),
        err
    )]
    async fn insert_realization(
        &self,
        realization: BudgetRealization,
        enforce: bool,
    ) -> StoreResult<BudgetRealization> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut position =
            spending_position(&mut tx, realization.company_id, realization.budget_id, realization.account_id).await?;

        let linked = match realization.commitment_id {
            Some(cid) => {
                let mut commitment = load_commitment(&mut tx, realization.company_id, cid, true)
                    .await?
                    .ok_or_else(|| DomainError::not_found(format!("commitment {cid}")))?;
                if commitment.budget_id != realization.budget_id || commitment.account_id != realization.account_id {
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
        if let Some(commitment) = &linked {
            update_active_commitment(&mut tx, commitment).await?;
        }

        sqlx::query(&format!(
            r#"
            INSERT INTO budget_realizations ({REALIZATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#
        ))
        .bind(realization.id.as_uuid())
        .bind(realization.company_id.as_uuid())
        .bind(realization.budget_id.as_uuid())
        .bind(realization.account_id.as_uuid())
        .bind(realization.commitment_id.map(Uuid::from))
        .bind(realization.amount)
        .bind(realization.reference.reference_type.as_str())
        .bind(&realization.reference.reference_id)
        .bind(&realization.reference.reference_number)
        .bind(&realization.description)
        .bind(realization.transaction_date)
        .bind(realization.realized_by.as_uuid())
        .bind(realization.realized_at)
        .bind(realization.adjusted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_realization", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(realization)
    }

    #[instrument(skip(self, reason), fields(company_id = %company_id, commitment_id = %id), err)]
    async fn release_commitment(
        &self,
        company_id: CompanyId,
        id: CommitmentId,
        by: UserId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<BudgetCommitment> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let mut commitment = load_commitment(&mut tx, company_id, id, true)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("commitment {id}")))?;
        commitment.release(by, reason, at)?;
        update_active_commitment(&mut tx, &commitment).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(commitment)
    }

    #[instrument(skip(self, reason), fields(company_id = %company_id, realization_id = %id, new_amount = %new_amount), err)]
    async fn adjust_realization(
        &self,
        company_id: CompanyId,
        id: RealizationId,
        new_amount: Decimal,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<BudgetRealization> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut realization = load_realization(&mut tx, company_id, id, true)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("realization {id}")))?;
        let previous = realization.adjust(new_amount, reason, at)?;
        let increase = realization.amount - previous;
        if increase > Decimal::ZERO {
            let position = spending_position(&mut tx, company_id, realization.budget_id, realization.account_id).await?;
            Availability::controlled(realization.budget_id, realization.account_id, position, increase)
                .ensure_sufficient()?;
        }

        sqlx::query("UPDATE budget_realizations SET amount = $2, description = $3, adjusted_at = $4 WHERE id = $1")
            .bind(realization.id.as_uuid())
            .bind(realization.amount)
            .bind(&realization.description)
            .bind(realization.adjusted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("adjust_realization", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(realization)
    }

    #[instrument(skip(self), fields(company_id = %company_id, commitment_id = %id), err)]
    async fn get_commitment(&self, company_id: CompanyId, id: CommitmentId) -> StoreResult<Option<BudgetCommitment>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        load_commitment(&mut conn, company_id, id, false).await
    }

    #[instrument(skip(self), fields(company_id = %company_id, realization_id = %id), err)]
    async fn get_realization(
        &self,
        company_id: CompanyId,
        id: RealizationId,
    ) -> StoreResult<Option<BudgetRealization>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        load_realization(&mut conn, company_id, id, false).await
    }

    #[instrument(skip(self), fields(company_id = %company_id, reference_type = reference_type.as_str()), err)]
    async fn commitments_by_reference(
        &self,
        company_id: CompanyId,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> StoreResult<Vec<BudgetCommitment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COMMITMENT_COLUMNS}
            FROM budget_commitments
            WHERE company_id = $1 AND reference_type = $2 AND reference_id = $3
            ORDER BY committed_at ASC, id ASC
            "#
        ))
        .bind(company_id.as_uuid())
        .bind(reference_type.as_str())
        .bind(reference_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("commitments_by_reference", e))?;

        rows.iter()
            .map(|row| {
                CommitmentRow::from_row(row)
                    .map_err(|e| decode_error("commitment", e))
                    .and_then(BudgetCommitment::try_from)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl AutoJournalStore for PostgresLedgerStore {
    #[instrument(skip(self), err)]
    async fn find_config(&self, source_module: &str, transaction_type: &str) -> StoreResult<Option<AutoJournalConfig>> {
        let row = sqlx::query(
            r#"
            SELECT config
            FROM auto_journal_configs
            WHERE source_module = $1 AND transaction_type = $2
            "#,
        )
        .bind(source_module)
        .bind(transaction_type)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_config", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: serde_json::Value = row.try_get("config").map_err(|e| decode_error("auto-journal config", e))?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::corrupt(format!("stored auto-journal config is invalid: {e}")))
    }

    #[instrument(
        skip(self, config),
        fields(source_module = config.source_module(), transaction_type = config.transaction_type()),
        err
    )]
    async fn upsert_config(&self, config: AutoJournalConfig) -> StoreResult<()> {
        let value = serde_json::to_value(&config)
            .map_err(|e| StoreError::backend(format!("failed to encode auto-journal config: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO auto_journal_configs (source_module, transaction_type, is_active, config, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (source_module, transaction_type)
            DO UPDATE SET
                is_active = EXCLUDED.is_active,
                config = EXCLUDED.config,
                updated_at = NOW()
            "#,
        )
        .bind(config.source_module())
        .bind(config.transaction_type())
        .bind(config.is_active())
        .bind(value)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_config", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, log),
        fields(company_id = %log.company_id, source_module = %log.source_module, source_id = %log.source_id),
        err
    )]
    async fn insert_log(&self, log: AutoJournalLog) -> StoreResult<AutoJournalLog> {
        sqlx::query(&format!(
            r#"
            INSERT INTO auto_journal_logs ({LOG_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#
        ))
        .bind(log.id.as_uuid())
        .bind(log.company_id.as_uuid())
        .bind(log.journal_entry_id.map(Uuid::from))
        .bind(&log.source_module)
        .bind(&log.source_id)
        .bind(&log.transaction_type)
        .bind(log.status.as_str())
        .bind(&log.error_message)
        .bind(log.processed_at)
        .bind(log.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert_log", e) {
            StoreError::Conflict(_) => StoreError::Conflict(format!(
                "{}:{} already has a pending or successful auto-journal attempt",
                log.source_module, log.source_id
            )),
            other => other,
        })?;
        Ok(log)
    }

    #[instrument(skip(self, log), fields(log_id = %log.id, status = log.status.as_str()), err)]
    async fn complete_log(&self, log: &AutoJournalLog) -> StoreResult<()> {
        if log.status == AutoJournalStatus::Pending {
            return Err(DomainError::invalid_state(format!("auto-journal log {} is still pending", log.id)).into());
        }
        let result = sqlx::query(
            r#"
            UPDATE auto_journal_logs SET
                status = $2, journal_entry_id = $3, error_message = $4, processed_at = $5
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(log.id.as_uuid())
        .bind(log.status.as_str())
        .bind(log.journal_entry_id.map(Uuid::from))
        .bind(&log.error_message)
        .bind(log.processed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_log", e))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM auto_journal_logs WHERE id = $1")
                .bind(log.id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("complete_log", e))?
                .is_some();
            return Err(if exists {
                DomainError::invalid_state(format!("auto-journal log {} is no longer pending", log.id)).into()
            } else {
                DomainError::not_found(format!("auto-journal log {}", log.id)).into()
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(company_id = %company_id), err)]
    async fn logs_by_source(
        &self,
        company_id: CompanyId,
        source_module: &str,
        source_id: &str,
    ) -> StoreResult<Vec<AutoJournalLog>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM auto_journal_logs
            WHERE company_id = $1 AND source_module = $2 AND source_id = $3
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(company_id.as_uuid())
        .bind(source_module)
        .bind(source_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("logs_by_source", e))?;
        decode_logs(rows)
    }

    #[instrument(skip(self), fields(company_id = %company_id, status = status.as_str()), err)]
    async fn logs_by_status(
        &self,
        company_id: CompanyId,
        status: AutoJournalStatus,
        limit: usize,
    ) -> StoreResult<Vec<AutoJournalLog>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM auto_journal_logs
            WHERE company_id = $1 AND status = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(company_id.as_uuid())
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("logs_by_status", e))?;
        decode_logs(rows)
    }
}
