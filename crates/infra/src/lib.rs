//! Infrastructure layer: ledger storage backends and the engines built on them.
//!
//! Domain crates stay pure; everything that touches a store, a clock or a log
//! sink lives here.

pub mod auto_journal;
pub mod budget_control;
pub mod config;
pub mod error;
pub mod posting;
pub mod store;

#[cfg(test)]
mod integration_tests;

use std::sync::Arc;

use anyhow::Context;

pub use auto_journal::{AutoJournalEngine, Generated};
pub use budget_control::{BudgetLedger, CommitOutcome, CommitRequest, RealizeOutcome, RealizeRequest};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult, StoreError, StoreResult};
pub use posting::PostingEngine;
pub use store::{
    AutoJournalStore, BudgetStore, InMemoryLedgerStore, JournalStore, LedgerStore, PostgresLedgerStore,
};

/// The three engines wired to one store.
pub struct Ledger<S> {
    pub posting: PostingEngine<S>,
    pub auto_journal: AutoJournalEngine<S>,
    pub budgets: BudgetLedger<S>,
}

impl<S> Ledger<S>
where
    S: LedgerStore,
{
    pub fn new(store: Arc<S>, config: &LedgerConfig) -> Self {
        let posting = PostingEngine::from_config(Arc::clone(&store), config);
        Self {
            auto_journal: AutoJournalEngine::new(posting.clone()),
            budgets: BudgetLedger::new(store, config.budget_policy),
            posting,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.posting.store()
    }
}

impl Ledger<InMemoryLedgerStore> {
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::new(Arc::new(InMemoryLedgerStore::new()), config)
    }
}

impl Ledger<PostgresLedgerStore> {
    /// Connect to `config.database_url` and apply the schema.
    pub async fn connect(config: &LedgerConfig) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required for the Postgres ledger store")?;
        let store = PostgresLedgerStore::connect(url).await?;
        store.migrate().await?;
        tracing::info!(
            entry_prefix = %config.entry_prefix,
            base_currency = %config.base_currency,
            "ledger store ready"
        );
        Ok(Self::new(Arc::new(store), config))
    }
}
