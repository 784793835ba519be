use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::ContingencyService;
use crate::error::ContingencyError;
use crate::models::{DocumentRef, Environment, FailureStage, NewQueueItem, QueueItem};
use crate::store::Resolution;

/// A document the normal submission path gave up on.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    pub document: DocumentRef,
    pub tipo_dte: String,
    pub codigo_generacion: String,
    pub ambiente: Environment,
    pub failure_stage: FailureStage,
    pub failure_reason: String,
    /// Unsigned DTE JSON.
    pub dte_unsigned: Value,
    #[serde(default)]
    pub dte_signed: Option<String>,
    pub company_id: Uuid,
    /// Defaults to the time of the call.
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

/// Normalise a generation code to the uppercase hyphenated form the authority uses.
pub fn normalize_codigo(codigo: &str) -> Result<String, ContingencyError> {
    Uuid::parse_str(codigo.trim())
        .map(|id| id.hyphenated().to_string().to_uppercase())
        .map_err(|_| {
            ContingencyError::InvalidDocument(format!("codigo_generacion {codigo:?} is not a UUID"))
        })
}

impl ContingencyService {
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<QueueItem, ContingencyError> {
        let codigo_generacion = normalize_codigo(&req.codigo_generacion)?;
        let tipo_dte = req.tipo_dte.trim().to_string();
        if tipo_dte.is_empty() {
            return Err(ContingencyError::InvalidDocument("tipo_dte is required".into()));
        }
        if !req.dte_unsigned.is_object() {
            return Err(ContingencyError::InvalidDocument(
                "dte_unsigned must be a JSON object".into(),
            ));
        }

        let item = self
            .store
            .insert_queue_item(NewQueueItem {
                document: req.document,
                tipo_dte,
                codigo_generacion,
                ambiente: req.ambiente,
                failure_stage: req.failure_stage,
                failure_reason: req.failure_reason,
                failure_timestamp: req.failed_at.unwrap_or_else(Utc::now),
                dte_unsigned: serde_json::to_vec(&req.dte_unsigned)?,
                dte_signed: req.dte_signed.filter(|s| !s.is_empty()),
                max_retries: self.settings.max_retries,
                company_id: req.company_id,
            })
            .await?;

        tracing::info!(
            item_id = %item.id,
            company_id = %item.company_id,
            codigo_generacion = %item.codigo_generacion,
            failure_stage = %item.failure_stage,
            "document queued for contingency"
        );
        Ok(item)
    }

    pub async fn link_to_event(&self, item_id: Uuid, event_id: Uuid) -> Result<bool, ContingencyError> {
        Ok(self.store.link_to_event(item_id, event_id).await?)
    }

    pub async fn link_to_batch(&self, item_id: Uuid, batch_id: Uuid) -> Result<bool, ContingencyError> {
        Ok(self.store.link_to_batch(item_id, batch_id).await?)
    }

    pub async fn resolve_success(
        &self,
        codigo_generacion: &str,
        sello: &str,
        response: Value,
    ) -> Result<usize, ContingencyError> {
        let resolution = Resolution::Success {
            sello: sello.to_string(),
            response,
        };
        self.resolve(codigo_generacion, None, &resolution).await
    }

    pub async fn resolve_rejected(
        &self,
        codigo_generacion: &str,
        reason: &str,
        response: Value,
    ) -> Result<usize, ContingencyError> {
        let resolution = Resolution::Rejected {
            reason: reason.to_string(),
            response,
        };
        self.resolve(codigo_generacion, None, &resolution).await
    }

    pub async fn increment_retry(&self, item_id: Uuid) -> Result<bool, ContingencyError> {
        Ok(self.store.increment_retry(item_id).await?)
    }

    /// Give a retry-exhausted pending item a fresh budget.
    pub async fn reset_retries(&self, item_id: Uuid) -> Result<bool, ContingencyError> {
        let reset = self.store.reset_retries(item_id).await?;
        if reset {
            tracing::info!(%item_id, "retry count reset by operator");
        }
        Ok(reset)
    }

    /// Resolve the queue item(s) for a generation code and mirror the outcome
    /// onto the business document. Returns how many items changed.
    pub(crate) async fn resolve(
        &self,
        codigo_generacion: &str,
        batch_id: Option<Uuid>,
        resolution: &Resolution,
    ) -> Result<usize, ContingencyError> {
        let resolved = self
            .store
            .resolve_items(codigo_generacion, batch_id, resolution)
            .await?;
        if resolved.is_empty() {
            tracing::debug!(
                codigo_generacion,
                "no submitted queue item to resolve, already final or unknown"
            );
            return Ok(0);
        }

        for item in &resolved {
            let mirrored = match resolution {
                Resolution::Success { sello, response } => {
                    self.documents
                        .mark_accepted(item.document, sello, response)
                        .await
                }
                Resolution::Rejected { reason, response } => {
                    self.documents
                        .mark_rejected(item.document, reason, response)
                        .await
                }
            };
            match mirrored {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    item_id = %item.id,
                    document_id = %item.document.id(),
                    "business document not found while mirroring resolution"
                ),
                Err(e) => tracing::error!(
                    item_id = %item.id,
                    document_id = %item.document.id(),
                    codigo_generacion = %item.codigo_generacion,
                    sello = item.sello_recibido.as_deref().unwrap_or(""),
                    error = %e,
                    "failed to mirror resolution onto business document"
                ),
            }

            tracing::info!(
                item_id = %item.id,
                company_id = %item.company_id,
                codigo_generacion = %item.codigo_generacion,
                status = %item.status,
                "queue item resolved"
            );
        }
        Ok(resolved.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_codes_are_uppercased() {
        assert_eq!(
            normalize_codigo(" 6f1c2a4e-0b9d-4e3a-9c51-1f2e3d4c5b6a ").unwrap(),
            "6F1C2A4E-0B9D-4E3A-9C51-1F2E3D4C5B6A"
        );
    }

    #[test]
    fn malformed_generation_code_is_rejected() {
        assert!(matches!(
            normalize_codigo("not-a-code"),
            Err(ContingencyError::InvalidDocument(_))
        ));
    }
}
