//! Budget control model: budgets, commitments, realizations and availability.
//!
//! Pure domain logic only. The commit-with-check primitive that makes these
//! rules safe under concurrency lives in the `ledgerforge-infra` store.

pub mod availability;
pub mod budget;
pub mod commitment;
pub mod policy;
pub mod summary;

pub use availability::{Availability, BudgetPosition};
pub use budget::{Budget, BudgetLine, BudgetStatus, BudgetType, NewBudget};
pub use commitment::{
    BudgetCommitment, BudgetRealization, CommitmentStatus, DocumentRef, ReferenceType, adjusted_description,
};
pub use policy::{BudgetPolicy, CommitMode, MissingBudgetPolicy};
pub use summary::{BudgetLineSummary, BudgetSummary};
