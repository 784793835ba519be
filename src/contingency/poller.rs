use std::collections::HashSet;

use super::ContingencyService;
use crate::authority::DocumentResult;
use crate::error::ContingencyError;
use crate::models::{ContingencyBatch, QueueStatus};
use crate::store::{BatchProgress, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The authority has not resolved any document yet.
    Processing,
    /// Some documents resolved; the batch stays submitted.
    Partial { processed: i32, rejected: i32 },
    Completed { processed: i32, rejected: i32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub completed: usize,
    pub partial: usize,
    pub processing: usize,
    pub failed: usize,
}

impl ContingencyService {
    /// Poll every submitted batch once. A failing batch never stops the pass.
    pub async fn poll_all(&self) -> Result<PollSummary, ContingencyError> {
        let batches = self.store.list_submitted_batches().await?;
        let mut summary = PollSummary::default();

        for batch in batches {
            match self.poll_batch(&batch).await {
                Ok(PollOutcome::Completed { .. }) => summary.completed += 1,
                Ok(PollOutcome::Partial { .. }) => summary.partial += 1,
                Ok(PollOutcome::Processing) => summary.processing += 1,
                Err(e) => {
                    tracing::error!(
                        batch_id = %batch.id,
                        codigo_lote = batch.codigo_lote.as_deref().unwrap_or(""),
                        error = %e,
                        "batch poll failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            completed = summary.completed,
            partial = summary.partial,
            processing = summary.processing,
            failed = summary.failed,
            "poll pass finished"
        );
        Ok(summary)
    }

    pub async fn poll_batch(&self, batch: &ContingencyBatch) -> Result<PollOutcome, ContingencyError> {
        let codigo_lote = batch
            .codigo_lote
            .as_deref()
            .ok_or(ContingencyError::MissingLoteCode(batch.id))?;

        let token = self.authority.authenticate(batch.company_id).await?;
        let report = self.authority.query_batch_status(&token, codigo_lote).await?;

        if report.is_empty() {
            tracing::debug!(batch_id = %batch.id, codigo_lote, "batch still processing");
            return Ok(PollOutcome::Processing);
        }

        let members: HashSet<String> = self
            .store
            .list_items_by_batch(batch.id)
            .await?
            .into_iter()
            .map(|i| i.codigo_generacion.to_uppercase())
            .collect();

        let mut seen = HashSet::new();
        for result in &report.procesados {
            let Some(sello) = result
                .sello_recibido
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
            else {
                tracing::warn!(
                    batch_id = %batch.id,
                    codigo_generacion = %result.codigo_generacion,
                    "processed document has no sello, leaving it for a later poll"
                );
                continue;
            };
            if let Some(codigo) = self.claim(&members, &mut seen, batch, result) {
                let resolution = Resolution::Success {
                    sello: sello.to_string(),
                    response: serde_json::to_value(result)?,
                };
                self.resolve_logged(&codigo, batch, &resolution).await;
            }
        }
        for result in &report.rechazados {
            if let Some(codigo) = self.claim(&members, &mut seen, batch, result) {
                let resolution = Resolution::Rejected {
                    reason: result.rejection_reason(),
                    response: serde_json::to_value(result)?,
                };
                self.resolve_logged(&codigo, batch, &resolution).await;
            }
        }

        // Counts come from the queue itself so they cover earlier polls too.
        let items = self.store.list_items_by_batch(batch.id).await?;
        let processed = items.iter().filter(|i| i.status == QueueStatus::Success).count() as i32;
        let rejected = items.iter().filter(|i| i.status == QueueStatus::Rejected).count() as i32;
        let complete =
            processed + rejected >= batch.total_dtes || self.settings.complete_on_partial;

        let progress = BatchProgress {
            processed,
            rejected,
            response: serde_json::to_value(&report)?,
            complete,
        };
        if !self.store.record_batch_progress(batch.id, &progress).await? {
            tracing::warn!(batch_id = %batch.id, "batch no longer submitted, progress not recorded");
        }

        tracing::info!(
            batch_id = %batch.id,
            company_id = %batch.company_id,
            codigo_lote,
            processed,
            rejected,
            total = batch.total_dtes,
            complete,
            "batch polled"
        );

        Ok(if complete {
            PollOutcome::Completed { processed, rejected }
        } else {
            PollOutcome::Partial { processed, rejected }
        })
    }

    /// Normalised code of a reported document, if it belongs to the batch and
    /// was not already reported in this answer.
    fn claim(
        &self,
        members: &HashSet<String>,
        seen: &mut HashSet<String>,
        batch: &ContingencyBatch,
        result: &DocumentResult,
    ) -> Option<String> {
        let codigo = result.codigo_generacion.trim().to_uppercase();
        if !members.contains(&codigo) {
            tracing::warn!(
                batch_id = %batch.id,
                codigo_generacion = %codigo,
                "authority reported a document outside this batch, ignored"
            );
            return None;
        }
        seen.insert(codigo.clone()).then_some(codigo)
    }

    async fn resolve_logged(&self, codigo: &str, batch: &ContingencyBatch, resolution: &Resolution) {
        if let Err(e) = self.resolve(codigo, Some(batch.id), resolution).await {
            tracing::error!(
                batch_id = %batch.id,
                codigo_generacion = codigo,
                error = %e,
                "failed to resolve document, will retry on next poll"
            );
        }
    }
}
