//! The contingency submission pipeline.
//!
//! Documents that failed the normal path wait in the queue until the event
//! stage declares them to the authority in a contingency event. The batch
//! stage then sends their signed payloads as one lote, and the poller carries
//! the per-document outcome back to the queue and the business records.
//!
//! Each stage function handles one company, event or batch and returns a
//! `Result`. The `run_*` passes loop over all candidates and never stop at
//! the first failure.

pub mod batch;
pub mod event;
pub mod poller;
pub mod queue;

use std::sync::Arc;

use uuid::Uuid;

use crate::authority::Authority;
use crate::company::{CompanyDirectory, CredentialStore};
use crate::documents::BusinessDocuments;
use crate::error::ContingencyError;
use crate::signer::Signer;
use crate::store::ContingencyStore;

pub use event::LocalZone;
pub use poller::{PollOutcome, PollSummary};
pub use queue::EnqueueRequest;

/// Largest number of documents one event (and therefore one lote) may carry.
pub const MAX_DOCUMENTS_PER_EVENT: usize = 1000;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_retries: i32,
    pub max_documents: usize,
    pub max_batch_attempts: i64,
    pub zone: LocalZone,
    /// Complete a batch on any non-empty answer instead of waiting for every document.
    pub complete_on_partial: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_documents: MAX_DOCUMENTS_PER_EVENT,
            max_batch_attempts: 3,
            zone: LocalZone::from_name("America/El_Salvador"),
            complete_on_partial: false,
        }
    }
}

/// Everything the pipeline talks to, injected once at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ContingencyStore>,
    pub documents: Arc<dyn BusinessDocuments>,
    pub directory: Arc<dyn CompanyDirectory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub signer: Arc<dyn Signer>,
    pub authority: Arc<dyn Authority>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct ContingencyService {
    store: Arc<dyn ContingencyStore>,
    documents: Arc<dyn BusinessDocuments>,
    directory: Arc<dyn CompanyDirectory>,
    credentials: Arc<dyn CredentialStore>,
    signer: Arc<dyn Signer>,
    authority: Arc<dyn Authority>,
    settings: PipelineSettings,
}

impl ContingencyService {
    pub fn new(collaborators: Collaborators, mut settings: PipelineSettings) -> Self {
        settings.max_documents = settings.max_documents.clamp(1, MAX_DOCUMENTS_PER_EVENT);
        Self {
            store: collaborators.store,
            documents: collaborators.documents,
            directory: collaborators.directory,
            credentials: collaborators.credentials,
            signer: collaborators.signer,
            authority: collaborators.authority,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContingencyStore> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Drop the cached authority session of a company.
    pub fn invalidate_authority_token(&self, company_id: Uuid) -> bool {
        let dropped = self.authority.invalidate_token(company_id);
        tracing::info!(%company_id, dropped, "authority token invalidated by operator");
        dropped
    }

    /// One event attempt per company with eligible pending documents.
    pub async fn run_event_stage(&self) -> Result<PassSummary, ContingencyError> {
        let companies = self.store.list_companies_with_pending().await?;
        let mut summary = PassSummary::default();

        for company_id in companies {
            match self.build_and_submit_event(company_id).await {
                Ok(_) => summary.succeeded += 1,
                Err(ContingencyError::NoPendingDocuments(_)) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(%company_id, error = %e, "contingency event attempt failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "event stage pass finished"
        );
        Ok(summary)
    }

    /// One batch attempt per accepted event that still lacks a live batch.
    pub async fn run_batch_stage(&self) -> Result<PassSummary, ContingencyError> {
        let events = self
            .store
            .list_events_lacking_batch(self.settings.max_batch_attempts)
            .await?;
        let mut summary = PassSummary::default();

        for event in events {
            match self.build_and_submit_batch(event.id).await {
                Ok(Some(_)) => summary.succeeded += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        event_id = %event.id,
                        company_id = %event.company_id,
                        error = %e,
                        "batch attempt failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "batch stage pass finished"
        );
        Ok(summary)
    }

    /// Increment the retry count of every item in `items`, then hand back `err`.
    async fn fail_items(
        &self,
        items: &[crate::models::QueueItem],
        err: ContingencyError,
    ) -> ContingencyError {
        for item in items {
            if let Err(e) = self.store.increment_retry(item.id).await {
                tracing::error!(item_id = %item.id, error = %e, "failed to increment retry count");
            }
        }
        err
    }

    async fn company_nit(&self, company_id: Uuid) -> Result<String, ContingencyError> {
        Ok(self.credentials.load_credentials(company_id).await?.nit)
    }
}
