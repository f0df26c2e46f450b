//! Auto-journal rule engine.
//!
//! ```text
//! request
//!   ↓
//! 1. replay check (a successful attempt for the same source returns its entry;
//!    a pending attempt whose entry exists is completed and returned)
//!   ↓
//! 2. pending log row (blocks concurrent attempts for the same source)
//!   ↓
//! 3. config lookup → rule resolution → balance check
//!   ↓
//! 4. create draft, post unless deferred
//!   ↓
//! 5. log row → success | failed
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use ledgerforge_autojournal::{
    AutoJournalConfig, AutoJournalLog, AutoJournalStatus, TransactionHeader, TransactionRequest,
};
use ledgerforge_core::{AutoJournalLogId, CompanyId, DomainError};
use ledgerforge_journal::{JournalEntry, JournalEntryFilter, JournalEntryStatus};

use crate::error::LedgerResult;
use crate::posting::PostingEngine;
use crate::store::{AutoJournalStore, JournalStore};

/// Outcome of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generated {
    pub entry: JournalEntry,
    /// The successful attempt that produced `entry`.
    pub log: AutoJournalLog,
    /// `true` when `entry` came from an earlier attempt for the same source.
    pub replayed: bool,
}

pub struct AutoJournalEngine<S> {
    posting: PostingEngine<S>,
}

impl<S> Clone for AutoJournalEngine<S> {
    fn clone(&self) -> Self {
        Self {
            posting: self.posting.clone(),
        }
    }
}

impl<S> AutoJournalEngine<S>
where
    S: JournalStore + AutoJournalStore,
{
    pub fn new(posting: PostingEngine<S>) -> Self {
        Self { posting }
    }

    pub fn posting(&self) -> &PostingEngine<S> {
        &self.posting
    }

    #[instrument(
        skip(self, config),
        fields(source_module = config.source_module(), transaction_type = config.transaction_type()),
        err
    )]
    pub async fn register_config(&self, config: AutoJournalConfig) -> LedgerResult<()> {
        self.posting.store().upsert_config(config).await?;
        Ok(())
    }

    pub async fn config(&self, source_module: &str, transaction_type: &str) -> LedgerResult<Option<AutoJournalConfig>> {
        Ok(self.posting.store().find_config(source_module, transaction_type).await?)
    }

    /// Generate with the request's own module and derived transaction type.
    pub async fn generate_default(&self, request: &dyn TransactionRequest) -> LedgerResult<Generated> {
        let transaction_type = request.transaction_type();
        self.generate(request.source_module(), &transaction_type, request).await
    }

    /// Turn one business transaction into a journal entry.
    ///
    /// Every attempt that gets past the replay check leaves a log row, also
    /// when it fails. Retrying after a failure starts a new attempt.
    #[instrument(
        skip(self, request),
        fields(
            company_id = %request.header().company_id,
            source_id = %request.header().source_id,
            entry_id
        ),
        err
    )]
    pub async fn generate(
        &self,
        source_module: &str,
        transaction_type: &str,
        request: &dyn TransactionRequest,
    ) -> LedgerResult<Generated> {
        let header = request.header();
        let store = self.posting.store();

        if let Some(replay) = self.replay(source_module, header).await? {
            info!(entry_id = %replay.entry.id, "auto-journal replayed earlier entry");
            return Ok(replay);
        }

        let mut log = store
            .insert_log(AutoJournalLog::pending(
                AutoJournalLogId::new(),
                header.company_id,
                source_module,
                header.source_id.clone(),
                transaction_type,
                Utc::now(),
            ))
            .await?;

        match self.run(source_module, transaction_type, request).await {
            Ok(entry) => {
                log.succeed(entry.id, Utc::now())?;
                if let Err(log_err) = store.complete_log(&log).await {
                    // The entry stands; the next attempt for this source links it to the log.
                    warn!(
                        log_id = %log.id,
                        entry_id = %entry.id,
                        error = %log_err,
                        "failed to record auto-journal success"
                    );
                }
                tracing::Span::current().record("entry_id", tracing::field::display(entry.id));
                info!(
                    entry_id = %entry.id,
                    entry_number = entry.entry_number.as_deref().unwrap_or_default(),
                    "auto-journal entry generated"
                );
                Ok(Generated {
                    entry,
                    log,
                    replayed: false,
                })
            }
            Err(err) => {
                log.fail(err.to_string(), Utc::now())?;
                if let Err(log_err) = store.complete_log(&log).await {
                    warn!(log_id = %log.id, error = %log_err, "failed to record auto-journal failure");
                }
                warn!(log_id = %log.id, error = %err, "auto-journal generation failed");
                Err(err)
            }
        }
    }

    /// Result of an earlier attempt for the same source, if it produced an entry.
    ///
    /// A `Pending` log whose entry already exists is an attempt that could not
    /// record its outcome; it is completed here.
    async fn replay(&self, source_module: &str, header: &TransactionHeader) -> LedgerResult<Option<Generated>> {
        let store = self.posting.store();
        let logs = store
            .logs_by_source(header.company_id, source_module, &header.source_id)
            .await?;

        if let Some(log) = logs.iter().find(|l| l.status == AutoJournalStatus::Success) {
            let entry_id = log.journal_entry_id.ok_or_else(|| {
                DomainError::conflict(format!(
                    "{source_module}:{} was generated before but its entry no longer exists",
                    header.source_id
                ))
            })?;
            let entry = self.posting.get(header.company_id, entry_id).await?;
            return Ok(Some(Generated {
                entry,
                log: log.clone(),
                replayed: true,
            }));
        }

        let Some(mut log) = logs.into_iter().find(|l| l.status == AutoJournalStatus::Pending) else {
            return Ok(None);
        };
        let Some(entry) = self.generated_entry(source_module, header).await? else {
            return Ok(None);
        };
        log.succeed(entry.id, Utc::now())?;
        store.complete_log(&log).await?;
        info!(log_id = %log.id, entry_id = %entry.id, "pending auto-journal log completed from its entry");
        Ok(Some(Generated {
            entry,
            log,
            replayed: true,
        }))
    }

    /// Entry generated for the source: not a reversal, and posted unless posting was deferred.
    async fn generated_entry(
        &self,
        source_module: &str,
        header: &TransactionHeader,
    ) -> LedgerResult<Option<JournalEntry>> {
        let filter = JournalEntryFilter::company(header.company_id)
            .from_source(source_module, Some(header.source_id.clone()));
        Ok(self.posting.list(&filter).await?.into_iter().find(|e| {
            e.reversal_of.is_none() && (e.status != JournalEntryStatus::Draft || !header.auto_post)
        }))
    }

    async fn run(
        &self,
        source_module: &str,
        transaction_type: &str,
        request: &dyn TransactionRequest,
    ) -> LedgerResult<JournalEntry> {
        let header = request.header();
        let config = match self.config(source_module, transaction_type).await? {
            Some(config) if config.is_active() => config,
            found => {
                return Err(DomainError::ConfigNotFound {
                    source_module: source_module.to_string(),
                    transaction_type: transaction_type.to_string(),
                    inactive: found.is_some(),
                }
                .into())
            }
        };

        let new = config.build_entry(request)?;
        let draft = self.posting.prepare(new, header.created_by)?;
        // A mapping whose debits and credits differ is rejected, never corrected.
        draft.check_balance()?;

        let entry = self.posting.insert(draft).await?;
        if !header.auto_post {
            return Ok(entry);
        }
        match self.posting.post(entry.company_id, entry.id, header.created_by).await {
            Ok(posted) => Ok(posted),
            Err(err) => {
                if let Err(cleanup) = self.posting.delete(entry.company_id, entry.id).await {
                    warn!(entry_id = %entry.id, error = %cleanup, "failed to remove unposted auto-journal draft");
                }
                Err(err)
            }
        }
    }

    /// All attempts for one source document, newest first.
    pub async fn logs_for_source(
        &self,
        company_id: CompanyId,
        source_module: &str,
        source_id: &str,
    ) -> LedgerResult<Vec<AutoJournalLog>> {
        Ok(self
            .posting
            .store()
            .logs_by_source(company_id, source_module, source_id)
            .await?)
    }

    pub async fn failed_logs(&self, company_id: CompanyId, limit: usize) -> LedgerResult<Vec<AutoJournalLog>> {
        Ok(self
            .posting
            .store()
            .logs_by_status(company_id, AutoJournalStatus::Failed, limit)
            .await?)
    }
}
