//! Company-scoped ledger records.

use crate::{CompanyId, DomainError};

/// A stored ledger record, keyed by its own id and owned by one company.
///
/// A record looked up under another company does not exist for that caller.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Display;

    /// Noun used in lookup and duplicate-id messages, e.g. `"budget"`.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;

    fn company_id(&self) -> CompanyId;

    fn visible_to(&self, company_id: CompanyId) -> bool {
        self.company_id() == company_id
    }

    fn not_found(id: Self::Id) -> DomainError {
        DomainError::not_found(format!("{} {id}", Self::KIND))
    }
}
