pub mod business_documents;
pub mod companies;
pub mod contingency_batches;
pub mod contingency_events;
pub mod contingency_queue;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ContingencyBatch, ContingencyEvent, NewBatch, NewContingencyEvent, NewQueueItem, QueueItem,
};
use crate::store::{BatchFilter, BatchProgress, ContingencyStore, QueueFilter, Resolution};

pub use business_documents::PgBusinessDocuments;
pub use companies::{PgCompanyDirectory, PgCredentialStore};

/// [`ContingencyStore`] over Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContingencyStore for PgStore {
    async fn insert_queue_item(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        Ok(contingency_queue::insert(&self.pool, &item).await?)
    }

    async fn find_queue_item(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        Ok(contingency_queue::find_by_id(&self.pool, id).await?)
    }

    async fn list_queue_items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, StoreError> {
        Ok(
            contingency_queue::list(&self.pool, filter.company_id, filter.status, filter.limit)
                .await?,
        )
    }

    async fn list_pending_by_company(
        &self,
        company_id: Uuid,
        limit: i64,
    ) -> Result<Vec<QueueItem>, StoreError> {
        Ok(contingency_queue::list_pending_by_company(&self.pool, company_id, limit).await?)
    }

    async fn list_companies_with_pending(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(contingency_queue::list_companies_with_pending(&self.pool).await?)
    }

    async fn list_items_by_event(&self, event_id: Uuid) -> Result<Vec<QueueItem>, StoreError> {
        Ok(contingency_queue::list_by_event(&self.pool, event_id).await?)
    }

    async fn list_items_by_batch(&self, batch_id: Uuid) -> Result<Vec<QueueItem>, StoreError> {
        Ok(contingency_queue::list_by_batch(&self.pool, batch_id).await?)
    }

    async fn attach_signature(&self, item_id: Uuid, signed: &str) -> Result<bool, StoreError> {
        Ok(contingency_queue::attach_signature(&self.pool, item_id, signed).await?)
    }

    async fn link_to_event(&self, item_id: Uuid, event_id: Uuid) -> Result<bool, StoreError> {
        Ok(contingency_queue::link_to_event(&self.pool, item_id, event_id).await?)
    }

    async fn link_to_batch(&self, item_id: Uuid, batch_id: Uuid) -> Result<bool, StoreError> {
        Ok(contingency_queue::link_to_batch(&self.pool, item_id, batch_id).await?)
    }

    async fn mark_item_submitted(&self, item_id: Uuid, batch_id: Uuid) -> Result<bool, StoreError> {
        Ok(contingency_queue::mark_submitted(&self.pool, item_id, batch_id).await?)
    }

    async fn resolve_items(
        &self,
        codigo_generacion: &str,
        batch_id: Option<Uuid>,
        resolution: &Resolution,
    ) -> Result<Vec<QueueItem>, StoreError> {
        Ok(contingency_queue::resolve(&self.pool, codigo_generacion, batch_id, resolution).await?)
    }

    async fn increment_retry(&self, item_id: Uuid) -> Result<bool, StoreError> {
        Ok(contingency_queue::increment_retry(&self.pool, item_id).await?)
    }

    async fn reset_retries(&self, item_id: Uuid) -> Result<bool, StoreError> {
        Ok(contingency_queue::reset_retries(&self.pool, item_id).await?)
    }

    async fn insert_event(
        &self,
        event: NewContingencyEvent,
    ) -> Result<ContingencyEvent, StoreError> {
        Ok(contingency_events::insert_accepted(&self.pool, &event).await?)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<ContingencyEvent>, StoreError> {
        Ok(contingency_events::find_by_id(&self.pool, id).await?)
    }

    async fn list_events(
        &self,
        company_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ContingencyEvent>, StoreError> {
        Ok(contingency_events::list(&self.pool, company_id, limit).await?)
    }

    async fn list_events_lacking_batch(
        &self,
        max_failed: i64,
    ) -> Result<Vec<ContingencyEvent>, StoreError> {
        Ok(contingency_events::list_lacking_batch(&self.pool, max_failed).await?)
    }

    async fn insert_batch(&self, batch: NewBatch) -> Result<Option<ContingencyBatch>, StoreError> {
        Ok(contingency_batches::insert(&self.pool, &batch).await?)
    }

    async fn find_batch(&self, id: Uuid) -> Result<Option<ContingencyBatch>, StoreError> {
        Ok(contingency_batches::find_by_id(&self.pool, id).await?)
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<ContingencyBatch>, StoreError> {
        Ok(
            contingency_batches::list(&self.pool, filter.company_id, filter.status, filter.limit)
                .await?,
        )
    }

    async fn list_submitted_batches(&self) -> Result<Vec<ContingencyBatch>, StoreError> {
        Ok(contingency_batches::list_submitted(&self.pool).await?)
    }

    async fn mark_batch_submitted(
        &self,
        batch_id: Uuid,
        codigo_lote: &str,
        response: &Value,
    ) -> Result<bool, StoreError> {
        Ok(contingency_batches::mark_submitted(&self.pool, batch_id, codigo_lote, response).await?)
    }

    async fn mark_batch_failed(
        &self,
        batch_id: Uuid,
        response: Option<&Value>,
    ) -> Result<bool, StoreError> {
        Ok(contingency_batches::mark_failed(&self.pool, batch_id, response).await?)
    }

    async fn record_batch_progress(
        &self,
        batch_id: Uuid,
        progress: &BatchProgress,
    ) -> Result<bool, StoreError> {
        let updated = contingency_batches::record_progress(
            &self.pool,
            batch_id,
            progress.processed,
            progress.rejected,
            &progress.response,
            progress.complete,
        )
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_check_violation() => {
                StoreError::Integrity(db.message().to_string())
            }
            other => StoreError::Database(other),
        })?;
        Ok(updated)
    }
}
