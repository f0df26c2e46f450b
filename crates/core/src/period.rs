//! Accounting periods.
//!
//! Periods are always derived from an explicit date; there is no process-wide
//! "current period".

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar month used to scope entry numbering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountingPeriod {
    pub year: i32,
    pub month: u32,
}

impl AccountingPeriod {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Fiscal years follow the calendar year.
    pub fn fiscal_year(&self) -> i32 {
        self.year
    }
}

impl core::fmt::Display for AccountingPeriod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}
