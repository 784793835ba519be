use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BatchFilter, BatchProgress, ContingencyStore, QueueFilter, Resolution};
use crate::error::StoreError;
use crate::models::{
    BatchStatus, ContingencyBatch, ContingencyEvent, EventStatus, NewBatch, NewContingencyEvent,
    NewQueueItem, QueueItem, QueueStatus,
};

#[derive(Default)]
struct Tables {
    items: HashMap<Uuid, QueueItem>,
    events: HashMap<Uuid, ContingencyEvent>,
    batches: HashMap<Uuid, ContingencyBatch>,
}

/// In-process store with the same guarded transitions as the Postgres one.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted<T: Clone, K: Ord>(rows: impl Iterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut rows: Vec<T> = rows.collect();
    rows.sort_by_key(|r| key(r));
    rows
}

#[async_trait]
impl ContingencyStore for MemoryStore {
    async fn insert_queue_item(&self, new: NewQueueItem) -> Result<QueueItem, StoreError> {
        let now = Utc::now();
        let item = QueueItem {
            id: Uuid::now_v7(),
            document: new.document,
            tipo_dte: new.tipo_dte,
            codigo_generacion: new.codigo_generacion,
            ambiente: new.ambiente,
            failure_stage: new.failure_stage,
            failure_reason: new.failure_reason,
            failure_timestamp: new.failure_timestamp,
            dte_unsigned: new.dte_unsigned,
            dte_signed: new.dte_signed,
            contingency_event_id: None,
            batch_id: None,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries,
            sello_recibido: None,
            rejection_reason: None,
            hacienda_response: None,
            company_id: new.company_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.tables.write().await.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn find_queue_item(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        Ok(self.tables.read().await.items.get(&id).cloned())
    }

    async fn list_queue_items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows = sorted(
            tables
                .items
                .values()
                .filter(|i| filter.company_id.is_none_or(|c| i.company_id == c))
                .filter(|i| filter.status.is_none_or(|s| i.status == s))
                .cloned(),
            |i| (i.created_at, i.id),
        );
        rows.reverse();
        rows.truncate(filter.limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_pending_by_company(
        &self,
        company_id: Uuid,
        limit: i64,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows = sorted(
            tables
                .items
                .values()
                .filter(|i| i.company_id == company_id && i.is_retry_eligible())
                .cloned(),
            |i| (i.failure_timestamp, i.id),
        );
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_companies_with_pending(&self) -> Result<Vec<Uuid>, StoreError> {
        let tables = self.tables.read().await;
        let mut companies: Vec<Uuid> = tables
            .items
            .values()
            .filter(|i| i.is_retry_eligible())
            .map(|i| i.company_id)
            .collect();
        companies.sort();
        companies.dedup();
        Ok(companies)
    }

    async fn list_items_by_event(&self, event_id: Uuid) -> Result<Vec<QueueItem>, StoreError> {
        let tables = self.tables.read().await;
        Ok(sorted(
            tables
                .items
                .values()
                .filter(|i| i.contingency_event_id == Some(event_id))
                .cloned(),
            |i| (i.failure_timestamp, i.id),
        ))
    }

    async fn list_items_by_batch(&self, batch_id: Uuid) -> Result<Vec<QueueItem>, StoreError> {
        let tables = self.tables.read().await;
        Ok(sorted(
            tables
                .items
                .values()
                .filter(|i| i.batch_id == Some(batch_id))
                .cloned(),
            |i| (i.failure_timestamp, i.id),
        ))
    }

    async fn attach_signature(&self, item_id: Uuid, signed: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.items.get_mut(&item_id) {
            Some(item) if item.status == QueueStatus::Pending && item.signed_payload().is_none() => {
                item.dte_signed = Some(signed.to_string());
                item.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn link_to_event(&self, item_id: Uuid, event_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.events.contains_key(&event_id) {
            return Err(StoreError::Integrity(format!("event {event_id} does not exist")));
        }
        match tables.items.get_mut(&item_id) {
            Some(item) if item.status.can_advance_to(QueueStatus::EventCreated) => {
                item.contingency_event_id = Some(event_id);
                item.status = QueueStatus::EventCreated;
                item.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn link_to_batch(&self, item_id: Uuid, batch_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.batches.contains_key(&batch_id) {
            return Err(StoreError::Integrity(format!("batch {batch_id} does not exist")));
        }
        let current_batch_failed = tables
            .items
            .get(&item_id)
            .and_then(|i| i.batch_id)
            .and_then(|b| tables.batches.get(&b))
            .is_some_and(|b| b.status == BatchStatus::Failed);

        match tables.items.get_mut(&item_id) {
            Some(item)
                if item.status.can_advance_to(QueueStatus::BatchCreated)
                    || (item.status == QueueStatus::BatchCreated && current_batch_failed) =>
            {
                item.batch_id = Some(batch_id);
                item.status = QueueStatus::BatchCreated;
                item.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_item_submitted(&self, item_id: Uuid, batch_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.items.get_mut(&item_id) {
            Some(item)
                if item.status.can_advance_to(QueueStatus::BatchSubmitted)
                    && item.batch_id == Some(batch_id) =>
            {
                item.status = QueueStatus::BatchSubmitted;
                item.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve_items(
        &self,
        codigo_generacion: &str,
        batch_id: Option<Uuid>,
        resolution: &Resolution,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut resolved = Vec::new();
        for item in tables.items.values_mut() {
            if !item.status.can_advance_to(resolution.status())
                || !item.codigo_generacion.eq_ignore_ascii_case(codigo_generacion)
                || batch_id.is_some_and(|b| item.batch_id != Some(b))
            {
                continue;
            }
            item.status = resolution.status();
            match resolution {
                Resolution::Success { sello, .. } => item.sello_recibido = Some(sello.clone()),
                Resolution::Rejected { reason, .. } => {
                    item.rejection_reason = Some(reason.clone())
                }
            }
            item.hacienda_response = Some(resolution.response().clone());
            item.completed_at = Some(now);
            item.updated_at = now;
            resolved.push(item.clone());
        }
        Ok(resolved)
    }

    async fn increment_retry(&self, item_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.items.get_mut(&item_id) {
            Some(item) if item.status == QueueStatus::Pending => {
                item.retry_count += 1;
                item.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_retries(&self, item_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.items.get_mut(&item_id) {
            Some(item) if item.status == QueueStatus::Pending => {
                item.retry_count = 0;
                item.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_event(
        &self,
        new: NewContingencyEvent,
    ) -> Result<ContingencyEvent, StoreError> {
        if new.fecha_inicio > new.fecha_fin {
            return Err(StoreError::Integrity("fecha_inicio after fecha_fin".into()));
        }
        let mut tables = self.tables.write().await;
        if tables
            .events
            .values()
            .any(|e| e.codigo_generacion == new.codigo_generacion)
        {
            return Err(StoreError::Integrity(format!(
                "duplicate event codigo_generacion {}",
                new.codigo_generacion
            )));
        }

        let now = Utc::now();
        let event = ContingencyEvent {
            id: Uuid::now_v7(),
            codigo_generacion: new.codigo_generacion,
            company_id: new.company_id,
            ambiente: new.ambiente,
            status: EventStatus::Accepted,
            dte_count: new.dte_count,
            fecha_inicio: new.fecha_inicio,
            fecha_fin: new.fecha_fin,
            tipo_contingencia: new.tipo_contingencia,
            motivo_contingencia: new.motivo_contingencia,
            event_unsigned: new.event_unsigned,
            event_signed: new.event_signed,
            sello_recibido: new.sello_recibido,
            hacienda_response: Some(new.hacienda_response),
            created_at: now,
            accepted_at: Some(now),
        };
        tables.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<ContingencyEvent>, StoreError> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn list_events(
        &self,
        company_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ContingencyEvent>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows = sorted(
            tables
                .events
                .values()
                .filter(|e| company_id.is_none_or(|c| e.company_id == c))
                .cloned(),
            |e| (e.created_at, e.id),
        );
        rows.reverse();
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_events_lacking_batch(
        &self,
        max_failed: i64,
    ) -> Result<Vec<ContingencyEvent>, StoreError> {
        let tables = self.tables.read().await;
        Ok(sorted(
            tables
                .events
                .values()
                .filter(|e| e.status == EventStatus::Accepted)
                .filter(|e| {
                    tables.items.values().any(|i| {
                        i.contingency_event_id == Some(e.id)
                            && matches!(
                                i.status,
                                QueueStatus::EventCreated | QueueStatus::BatchCreated
                            )
                    })
                })
                .filter(|e| {
                    let batches = tables
                        .batches
                        .values()
                        .filter(|b| b.contingency_event_id == e.id);
                    let mut failed = 0i64;
                    for b in batches {
                        if b.status != BatchStatus::Failed {
                            return false;
                        }
                        failed += 1;
                    }
                    failed < max_failed
                })
                .cloned(),
            |e| (e.created_at, e.id),
        ))
    }

    async fn insert_batch(&self, new: NewBatch) -> Result<Option<ContingencyBatch>, StoreError> {
        if new.total_dtes <= 0 {
            return Err(StoreError::Integrity("batch must cover at least one document".into()));
        }
        let mut tables = self.tables.write().await;
        if !tables.events.contains_key(&new.contingency_event_id) {
            return Err(StoreError::Integrity(format!(
                "event {} does not exist",
                new.contingency_event_id
            )));
        }
        let live = tables.batches.values().any(|b| {
            b.contingency_event_id == new.contingency_event_id && b.status != BatchStatus::Failed
        });
        if live {
            return Ok(None);
        }

        let batch = ContingencyBatch {
            id: Uuid::now_v7(),
            contingency_event_id: new.contingency_event_id,
            codigo_lote: None,
            company_id: new.company_id,
            ambiente: new.ambiente,
            status: BatchStatus::Pending,
            total_dtes: new.total_dtes,
            processed_count: 0,
            rejected_count: 0,
            hacienda_response: None,
            created_at: Utc::now(),
            submitted_at: None,
            completed_at: None,
        };
        tables.batches.insert(batch.id, batch.clone());
        Ok(Some(batch))
    }

    async fn find_batch(&self, id: Uuid) -> Result<Option<ContingencyBatch>, StoreError> {
        Ok(self.tables.read().await.batches.get(&id).cloned())
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<ContingencyBatch>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows = sorted(
            tables
                .batches
                .values()
                .filter(|b| filter.company_id.is_none_or(|c| b.company_id == c))
                .filter(|b| filter.status.is_none_or(|s| b.status == s))
                .cloned(),
            |b| (b.created_at, b.id),
        );
        rows.reverse();
        rows.truncate(filter.limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_submitted_batches(&self) -> Result<Vec<ContingencyBatch>, StoreError> {
        let tables = self.tables.read().await;
        Ok(sorted(
            tables
                .batches
                .values()
                .filter(|b| b.status == BatchStatus::Submitted)
                .cloned(),
            |b| (b.submitted_at, b.id),
        ))
    }

    async fn mark_batch_submitted(
        &self,
        batch_id: Uuid,
        codigo_lote: &str,
        response: &Value,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.batches.get_mut(&batch_id) {
            Some(batch) if batch.status == BatchStatus::Pending => {
                batch.status = BatchStatus::Submitted;
                batch.codigo_lote = Some(codigo_lote.to_string());
                batch.hacienda_response = Some(response.clone());
                batch.submitted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_batch_failed(
        &self,
        batch_id: Uuid,
        response: Option<&Value>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.batches.get_mut(&batch_id) {
            Some(batch) if batch.status == BatchStatus::Pending => {
                batch.status = BatchStatus::Failed;
                if let Some(response) = response {
                    batch.hacienda_response = Some(response.clone());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_batch_progress(
        &self,
        batch_id: Uuid,
        progress: &BatchProgress,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(batch) = tables.batches.get_mut(&batch_id) else {
            return Ok(false);
        };
        if batch.status != BatchStatus::Submitted {
            return Ok(false);
        }

        let processed = batch.processed_count.max(progress.processed);
        let rejected = batch.rejected_count.max(progress.rejected);
        if processed + rejected > batch.total_dtes {
            return Err(StoreError::Integrity(format!(
                "batch {batch_id}: {processed} processed + {rejected} rejected exceeds {} documents",
                batch.total_dtes
            )));
        }

        batch.processed_count = processed;
        batch.rejected_count = rejected;
        batch.hacienda_response = Some(progress.response.clone());
        if progress.complete {
            batch.status = BatchStatus::Completed;
            batch.completed_at = Some(Utc::now());
        }
        Ok(true)
    }
}
