use serde_json::Value;
use uuid::Uuid;

use super::ContingencyService;
use crate::error::{ContingencyError, StoreError};
use crate::models::{
    BatchStatus, ContingencyBatch, ContingencyEvent, EventStatus, NewBatch, QueueItem, QueueStatus,
};

/// A failed submission and the authority's answer, when there was one.
type Failure = (ContingencyError, Option<Value>);

fn failure<E: Into<ContingencyError>>(err: E) -> Failure {
    (err.into(), None)
}

impl ContingencyService {
    /// Send the signed documents of an accepted event as one lote.
    ///
    /// Returns `Ok(None)` when the event already has a live batch or nothing
    /// left to send. A batch that
    /// could not be submitted is marked `failed`; the next pass may try again
    /// until the event runs out of batch attempts.
    pub async fn build_and_submit_batch(
        &self,
        event_id: Uuid,
    ) -> Result<Option<ContingencyBatch>, ContingencyError> {
        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(ContingencyError::EventNotFound(event_id))?;
        if event.status != EventStatus::Accepted {
            return Err(ContingencyError::EventNotAccepted {
                event_id,
                status: event.status,
            });
        }

        let items: Vec<QueueItem> = self
            .store
            .list_items_by_event(event_id)
            .await?
            .into_iter()
            .filter(|i| matches!(i.status, QueueStatus::EventCreated | QueueStatus::BatchCreated))
            .collect();
        if items.is_empty() {
            tracing::debug!(%event_id, "event has no documents left to batch");
            return Ok(None);
        }
        if items.len() > self.settings.max_documents {
            return Err(ContingencyError::TooManyDocuments {
                count: items.len(),
                max: self.settings.max_documents,
            });
        }
        let unsigned = items.iter().filter(|i| i.signed_payload().is_none()).count();
        if unsigned > 0 {
            return Err(ContingencyError::MissingSignature {
                event_id,
                count: unsigned,
            });
        }

        let Some(batch) = self
            .store
            .insert_batch(NewBatch {
                contingency_event_id: event_id,
                company_id: event.company_id,
                ambiente: event.ambiente,
                total_dtes: items.len() as i32,
            })
            .await?
        else {
            tracing::debug!(%event_id, "event already has a live batch, nothing to do");
            return Ok(None);
        };

        match self.submit_batch(&event, &batch, &items).await {
            Ok(submitted) => Ok(Some(submitted)),
            Err((e, response)) => {
                if let Err(mark_err) = self
                    .store
                    .mark_batch_failed(batch.id, response.as_ref())
                    .await
                {
                    tracing::error!(batch_id = %batch.id, error = %mark_err, "failed to mark batch failed");
                }
                tracing::warn!(
                    %event_id,
                    batch_id = %batch.id,
                    company_id = %event.company_id,
                    error = %e,
                    "batch marked failed"
                );
                Err(e)
            }
        }
    }

    /// Link, authenticate and submit. On failure returns the authority's answer, if any.
    async fn submit_batch(
        &self,
        event: &ContingencyEvent,
        batch: &ContingencyBatch,
        items: &[QueueItem],
    ) -> Result<ContingencyBatch, Failure> {
        let mut linked = 0usize;
        for item in items {
            if self
                .store
                .link_to_batch(item.id, batch.id)
                .await
                .map_err(failure)?
            {
                linked += 1;
            }
        }
        if linked != items.len() {
            let err = StoreError::Integrity(format!(
                "linked {linked} of {} documents to batch {}",
                items.len(),
                batch.id
            ));
            return Err((err.into(), None));
        }

        let documents: Vec<String> = items
            .iter()
            .filter_map(|i| i.signed_payload().map(str::to_string))
            .collect();

        let nit = self
            .company_nit(event.company_id)
            .await
            .map_err(failure)?;
        let token = self
            .authority
            .authenticate(event.company_id)
            .await
            .map_err(failure)?;
        let receipt = self
            .authority
            .submit_batch(&token, event.ambiente, &nit, &documents)
            .await
            .map_err(failure)?;
        let response = serde_json::to_value(&receipt).map_err(failure)?;

        if !receipt.is_received() {
            return Err((
                ContingencyError::BatchRefused {
                    estado: receipt.estado,
                    message: receipt.descripcion_msg.unwrap_or_default(),
                },
                Some(response),
            ));
        }
        let Some(codigo_lote) = receipt.codigo_lote.filter(|c| !c.is_empty()) else {
            return Err((ContingencyError::MissingLoteCode(batch.id), Some(response)));
        };

        self.store
            .mark_batch_submitted(batch.id, &codigo_lote, &response)
            .await
            .map_err(|e| (ContingencyError::from(e), Some(response.clone())))?;

        let mut advanced = 0usize;
        for item in items {
            match self.store.mark_item_submitted(item.id, batch.id).await {
                Ok(true) => advanced += 1,
                Ok(false) => tracing::warn!(item_id = %item.id, batch_id = %batch.id, "queue item not advanced to batch_submitted"),
                Err(e) => tracing::error!(item_id = %item.id, batch_id = %batch.id, error = %e, "failed to advance queue item"),
            }
        }

        tracing::info!(
            event_id = %event.id,
            batch_id = %batch.id,
            company_id = %event.company_id,
            codigo_lote = %codigo_lote,
            documents = items.len(),
            advanced,
            "batch submitted"
        );

        let submitted = self
            .store
            .find_batch(batch.id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| ContingencyBatch {
                codigo_lote: Some(codigo_lote),
                status: BatchStatus::Submitted,
                ..batch.clone()
            });
        Ok(submitted)
    }
}
