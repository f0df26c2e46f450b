use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerforge_core::{AutoJournalLogId, CompanyId, DomainError, DomainResult, Entity, JournalEntryId};

/// `Pending -> Success | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoJournalStatus {
    Pending,
    Success,
    Failed,
}

impl AutoJournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoJournalStatus::Pending => "pending",
            AutoJournalStatus::Success => "success",
            AutoJournalStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AutoJournalStatus::Pending),
            "success" => Some(AutoJournalStatus::Success),
            "failed" => Some(AutoJournalStatus::Failed),
            _ => None,
        }
    }
}

/// One row per generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoJournalLog {
    pub id: AutoJournalLogId,
    pub company_id: CompanyId,
    pub journal_entry_id: Option<JournalEntryId>,
    pub source_module: String,
    pub source_id: String,
    pub transaction_type: String,
    pub status: AutoJournalStatus,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for AutoJournalLog {
    type Id = AutoJournalLogId;
    const KIND: &'static str = "auto-journal log";

    fn id(&self) -> AutoJournalLogId {
        self.id
    }

    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

impl AutoJournalLog {
    pub fn pending(
        id: AutoJournalLogId,
        company_id: CompanyId,
        source_module: impl Into<String>,
        source_id: impl Into<String>,
        transaction_type: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            company_id,
            journal_entry_id: None,
            source_module: source_module.into(),
            source_id: source_id.into(),
            transaction_type: transaction_type.into(),
            status: AutoJournalStatus::Pending,
            error_message: None,
            processed_at: None,
            created_at: at,
        }
    }

    fn ensure_pending(&self) -> DomainResult<()> {
        if self.status != AutoJournalStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "auto-journal log {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    pub fn succeed(&mut self, entry_id: JournalEntryId, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = AutoJournalStatus::Success;
        self.journal_entry_id = Some(entry_id);
        self.processed_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = AutoJournalStatus::Failed;
        self.error_message = Some(error.into());
        self.processed_at = Some(at);
        Ok(())
    }
}
