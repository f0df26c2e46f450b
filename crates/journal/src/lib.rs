//! Journal entries (double-entry, multi-currency).
//!
//! Pure domain logic only: validation, balance checks and state transitions.
//! Persistence and numbering allocation live in `ledgerforge-infra`.

pub mod entry;
pub mod filter;
pub mod number;

pub use entry::{
    EntryTotals, JournalEntry, JournalEntryLine, JournalEntryStatus, NewJournalEntry, NewJournalLine, Side,
    SourceRef, validate_new_entry,
};
pub use filter::JournalEntryFilter;
pub use number::{DEFAULT_ENTRY_PREFIX, EntryNumberFormat};
