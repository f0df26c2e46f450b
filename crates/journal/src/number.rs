use ledgerforge_core::AccountingPeriod;

/// Default prefix for journal entry numbers.
pub const DEFAULT_ENTRY_PREFIX: &str = "JE";

/// `{prefix}{YYYYMM}-{NNNN}` entry numbering.
///
/// The sequence is per company and period; it is allocated by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryNumberFormat {
    prefix: String,
}

impl Default for EntryNumberFormat {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_PREFIX)
    }
}

impl EntryNumberFormat {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Sequences below 10000 are zero-padded to four digits; larger ones widen.
    pub fn format(&self, period: AccountingPeriod, sequence: u64) -> String {
        format!("{}{}-{:04}", self.prefix, period, sequence)
    }

    /// Recover the sequence from a number produced by [`Self::format`] for `period`.
    pub fn parse_sequence(&self, period: AccountingPeriod, number: &str) -> Option<u64> {
        let head = format!("{}{}-", self.prefix, period);
        number.strip_prefix(head.as_str())?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn formats_prefix_period_and_padded_sequence() {
        let period = AccountingPeriod::of(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        let fmt = EntryNumberFormat::default();
        assert_eq!(fmt.format(period, 1), "JE202603-0001");
        assert_eq!(fmt.format(period, 12345), "JE202603-12345");
        assert_eq!(fmt.parse_sequence(period, "JE202603-0042"), Some(42));
        assert_eq!(fmt.parse_sequence(period, "JE202604-0042"), None);
    }

    #[test]
    fn custom_prefix() {
        let period = AccountingPeriod { year: 2025, month: 12 };
        let fmt = EntryNumberFormat::new("GL-");
        assert_eq!(fmt.format(period, 7), "GL-202512-0007");
        assert_eq!(fmt.parse_sequence(period, "GL-202512-0007"), Some(7));
    }
}
