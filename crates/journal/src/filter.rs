use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use ledgerforge_core::CompanyId;

use crate::entry::{JournalEntry, JournalEntryStatus};

/// Criteria for listing journal entries of one company.
///
/// Unset fields do not filter. Results are ordered by entry date, then entry number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryFilter {
    pub company_id: CompanyId,
    pub status: Option<JournalEntryStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub source_module: Option<String>,
    pub source_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl JournalEntryFilter {
    pub fn company(company_id: CompanyId) -> Self {
        Self {
            company_id,
            status: None,
            date_from: None,
            date_to: None,
            source_module: None,
            source_id: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JournalEntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn from_source(mut self, module: impl Into<String>, id: Option<String>) -> Self {
        self.source_module = Some(module.into());
        self.source_id = id;
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub fn matches(&self, entry: &JournalEntry) -> bool {
        if entry.company_id != self.company_id {
            return false;
        }
        if self.status.is_some_and(|s| s != entry.status) {
            return false;
        }
        if self.date_from.is_some_and(|d| entry.entry_date < d) {
            return false;
        }
        if self.date_to.is_some_and(|d| entry.entry_date > d) {
            return false;
        }
        if let Some(module) = &self.source_module {
            match &entry.source {
                Some(src) if &src.module == module => {
                    if self.source_id.as_ref().is_some_and(|id| id != &src.id) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }
}
